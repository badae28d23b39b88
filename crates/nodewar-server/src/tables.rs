//! SpacetimeDB table definitions for the territory graph.
//!
//! Each row type mirrors an entity in `nodewar_logic::model` and carries a
//! `version` column so the store adapter can offer compare-and-set. Public
//! tables double as the change feed: clients subscribe to `node` and `edge`
//! and receive every committed upsert and delete.

use spacetimedb::{table, Identity, ScheduleAt, Timestamp};

use crate::reducers::reconcile_tick;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Game rules singleton (id always 0)
#[table(name = game_config, public)]
#[derive(Clone)]
pub struct GameConfigRow {
    #[primary_key]
    pub id: u32,
    pub admin: Identity,        // publisher; may reconfigure
    pub capture_cost: u64,
    pub fortify_cost_step: u64,
    pub raid_success_chance: f64,
    pub income_per_node_minute: u64,
    pub reconcile_period_secs: u64,
    pub starting_charge: u64,
    pub max_cas_attempts: u32,
}

// ============================================================================
// PLAYERS
// ============================================================================

/// Player account, created by `player_join`
#[table(name = player, public)]
#[derive(Clone)]
pub struct PlayerRow {
    #[primary_key]
    #[auto_inc]
    pub id: u64,
    #[unique]
    pub identity: Identity,
    pub handle: String,
    pub faction: u8,            // factions::*
    pub charge: u64,
    pub last_income_at: Timestamp,
    pub ally_of: Option<u64>,
    pub version: u64,
}

// ============================================================================
// GRAPH
// ============================================================================

/// Territory node, placed by world generation
#[table(name = node, public)]
#[derive(Clone)]
pub struct NodeRow {
    #[primary_key]
    pub id: u64,
    pub owner_id: Option<u64>,  // FK → PlayerRow, None = neutral
    pub charge: u64,
    pub fortify_lvl: u32,
    pub x: f32,
    pub y: f32,
    pub created_at: Timestamp,
    pub version: u64,
}

/// Directed connection between two nodes, identified by (src_id, dst_id)
#[table(name = edge, public, index(name = endpoints, btree(columns = [src_id, dst_id])))]
#[derive(Clone)]
pub struct EdgeRow {
    #[primary_key]
    #[auto_inc]
    pub id: u64,
    pub src_id: u64,
    pub dst_id: u64,
    pub owner_id: Option<u64>,
    pub created_at: Timestamp,
    pub version: u64,
}

// ============================================================================
// LEADERBOARD
// ============================================================================

/// Cumulative faction income for one week (Sunday-aligned, UTC)
#[table(name = faction_score, public)]
#[derive(Clone)]
pub struct FactionScoreRow {
    #[primary_key]
    pub week_start: String,     // YYYY-MM-DD
    pub red_score: u64,
    pub blue_score: u64,
    pub version: u64,
}

// ============================================================================
// SCHEDULING
// ============================================================================

/// Drives `reconcile_tick` every `reconcile_period_secs`
#[table(name = reconcile_schedule, scheduled(reconcile_tick))]
pub struct ReconcileSchedule {
    #[primary_key]
    #[auto_inc]
    pub scheduled_id: u64,
    pub scheduled_at: ScheduleAt,
}

// ============================================================================
// ENUM CONSTANTS
// ============================================================================

pub mod factions {
    use nodewar_logic::model::Faction;

    pub const RED: u8 = 0;
    pub const BLUE: u8 = 1;

    pub fn to_u8(faction: Faction) -> u8 {
        match faction {
            Faction::Red => RED,
            Faction::Blue => BLUE,
        }
    }

    pub fn from_u8(val: u8) -> Option<Faction> {
        match val {
            RED => Some(Faction::Red),
            BLUE => Some(Faction::Blue),
            _ => None,
        }
    }
}

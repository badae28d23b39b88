//! Client-facing reducers for territory actions and income settlement.

use std::time::Duration;

use nodewar_logic::actions::ActionProcessor;
use nodewar_logic::config::{validate_config, GameConfig};
use nodewar_logic::error::GameError;
use nodewar_logic::graph::GraphState;
use nodewar_logic::model::{EdgeKey, Faction, NodeId, PlayerId};
use nodewar_logic::raid::{FixedRaid, UniformRaid};
use nodewar_logic::reconcile::{IncomeReconciler, ReconcileFailure};
use spacetimedb::{reducer, ReducerContext, ScheduleAt, Table};

use crate::store::{to_datetime, LogNotifier, TableStore};
use crate::tables::*;

type ServerState<'a> = GraphState<TableStore<'a>, LogNotifier>;

fn load_config(ctx: &ReducerContext) -> GameConfig {
    match ctx.db.game_config().id().find(0) {
        Some(row) => GameConfig {
            capture_cost: row.capture_cost,
            fortify_cost_step: row.fortify_cost_step,
            raid_success_chance: row.raid_success_chance,
            income_per_node_minute: row.income_per_node_minute,
            reconcile_period_secs: row.reconcile_period_secs,
            starting_charge: row.starting_charge,
            max_cas_attempts: row.max_cas_attempts,
        },
        None => GameConfig::default(),
    }
}

fn config_row(config: &GameConfig, admin: spacetimedb::Identity) -> GameConfigRow {
    GameConfigRow {
        id: 0,
        admin,
        capture_cost: config.capture_cost,
        fortify_cost_step: config.fortify_cost_step,
        raid_success_chance: config.raid_success_chance,
        income_per_node_minute: config.income_per_node_minute,
        reconcile_period_secs: config.reconcile_period_secs,
        starting_charge: config.starting_charge,
        max_cas_attempts: config.max_cas_attempts,
    }
}

fn state<'a>(ctx: &'a ReducerContext, config: &GameConfig) -> ServerState<'a> {
    GraphState::new(TableStore::new(ctx), LogNotifier, config.max_cas_attempts)
}

/// The caller's player id, if they have joined.
fn caller(ctx: &ReducerContext) -> Result<PlayerId, String> {
    ctx.db
        .player()
        .identity()
        .find(ctx.sender)
        .map(|p| PlayerId(p.id))
        .ok_or_else(|| "Caller has not joined the game".to_string())
}

fn reject(action: &str, e: GameError) -> String {
    log::warn!("{} rejected: {}", action, e);
    e.to_string()
}

/// Replace any pending reconciliation schedule with one at the configured period.
fn reschedule(ctx: &ReducerContext, config: &GameConfig) {
    let pending: Vec<u64> = ctx
        .db
        .reconcile_schedule()
        .iter()
        .map(|s| s.scheduled_id)
        .collect();
    for id in pending {
        ctx.db.reconcile_schedule().scheduled_id().delete(id);
    }
    ctx.db.reconcile_schedule().insert(ReconcileSchedule {
        scheduled_id: 0,
        scheduled_at: ScheduleAt::Interval(
            Duration::from_secs(config.reconcile_period_secs).into(),
        ),
    });
}

// ============================================================================
// LIFECYCLE
// ============================================================================

/// Module publish: store default rules and start the reconciliation schedule.
#[reducer(init)]
pub fn init(ctx: &ReducerContext) {
    let config = GameConfig::default();
    ctx.db.game_config().insert(config_row(&config, ctx.sender));
    reschedule(ctx, &config);
    log::info!(
        "NodeWar initialized, reconciling every {}s",
        config.reconcile_period_secs
    );
}

/// Called when a client connects
#[reducer(client_connected)]
pub fn client_connected(ctx: &ReducerContext) {
    log::info!("Client connected: {:?}", ctx.sender);
}

/// Called when a client disconnects
#[reducer(client_disconnected)]
pub fn client_disconnected(ctx: &ReducerContext) {
    log::info!("Client disconnected: {:?}", ctx.sender);
}

/// Replace the game rules from a JSON document. Admin only.
#[reducer]
pub fn configure(ctx: &ReducerContext, json: String) -> Result<(), String> {
    let Some(current) = ctx.db.game_config().id().find(0) else {
        return Err("Module not initialized".to_string());
    };
    if ctx.sender != current.admin {
        return Err("Only the admin may change the rules".to_string());
    }

    let config = GameConfig::from_json(&json).map_err(|e| e.to_string())?;
    let errors = validate_config(&config);
    if !errors.is_empty() {
        let joined: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        return Err(joined.join("; "));
    }

    let period_changed = config.reconcile_period_secs != current.reconcile_period_secs;
    ctx.db
        .game_config()
        .id()
        .update(config_row(&config, current.admin));
    if period_changed {
        reschedule(ctx, &config);
    }
    log::info!("Rules updated: {:?}", config);
    Ok(())
}

/// Lay out a `cols` x `rows` grid of neutral nodes joined to their right and
/// lower neighbours. Admin only; refuses if nodes already exist.
#[reducer]
pub fn generate_world(ctx: &ReducerContext, cols: u32, rows: u32) -> Result<(), String> {
    let Some(config) = ctx.db.game_config().id().find(0) else {
        return Err("Module not initialized".to_string());
    };
    if ctx.sender != config.admin {
        return Err("Only the admin may generate the world".to_string());
    }
    if ctx.db.node().iter().next().is_some() {
        log::warn!("World already generated!");
        return Err("World already generated".to_string());
    }

    const SPACING: f32 = 10.0;
    let id_of = |c: u32, r: u32| u64::from(r) * u64::from(cols) + u64::from(c);
    for r in 0..rows {
        for c in 0..cols {
            ctx.db.node().insert(NodeRow {
                id: id_of(c, r),
                owner_id: None,
                charge: 0,
                fortify_lvl: 0,
                x: c as f32 * SPACING,
                y: r as f32 * SPACING,
                created_at: ctx.timestamp,
                version: 1,
            });
        }
    }

    let mut edges = 0;
    for r in 0..rows {
        for c in 0..cols {
            let neighbours = [(c + 1 < cols, id_of(c + 1, r)), (r + 1 < rows, id_of(c, r + 1))];
            for (exists, dst) in neighbours {
                if !exists {
                    continue;
                }
                ctx.db.edge().insert(EdgeRow {
                    id: 0,
                    src_id: id_of(c, r),
                    dst_id: dst,
                    owner_id: None,
                    created_at: ctx.timestamp,
                    version: 1,
                });
                edges += 1;
            }
        }
    }

    log::info!(
        "World generated: {} nodes, {} edges",
        u64::from(cols) * u64::from(rows),
        edges
    );
    Ok(())
}

// ============================================================================
// PLAYER REDUCERS
// ============================================================================

/// Create a player for the caller with the starting charge.
#[reducer]
pub fn player_join(ctx: &ReducerContext, handle: String, faction: String) -> Result<(), String> {
    log::info!("Player joining: {} ({})", handle, faction);

    if ctx.db.player().identity().find(ctx.sender).is_some() {
        log::warn!("Player already joined!");
        return Err("Already joined".to_string());
    }
    let faction = Faction::parse(&faction)
        .ok_or_else(|| format!("Unknown faction {:?}, expected red or blue", faction))?;
    let handle = handle.trim().to_string();
    if handle.is_empty() {
        return Err("Handle must not be empty".to_string());
    }

    let config = load_config(ctx);
    let player = ctx.db.player().insert(PlayerRow {
        id: 0,
        identity: ctx.sender,
        handle,
        faction: factions::to_u8(faction),
        charge: config.starting_charge,
        last_income_at: ctx.timestamp,
        ally_of: None,
        version: 1,
    });
    log::info!("Player {} joined {} with {} charge", player.id, faction, player.charge);
    Ok(())
}

/// Claim a neutral node
#[reducer]
pub fn capture_node(ctx: &ReducerContext, node_id: u64) -> Result<(), String> {
    let player = caller(ctx)?;
    let config = load_config(ctx);
    let state = state(ctx, &config);
    ActionProcessor::new(config, FixedRaid(false))
        .capture(&state, NodeId(node_id), player)
        .map(|_| ())
        .map_err(|e| reject("Capture", e))
}

/// Raise an owned node's fortification by one level
#[reducer]
pub fn fortify_node(ctx: &ReducerContext, node_id: u64) -> Result<(), String> {
    let player = caller(ctx)?;
    let config = load_config(ctx);
    let state = state(ctx, &config);
    ActionProcessor::new(config, FixedRaid(false))
        .fortify(&state, NodeId(node_id), player)
        .map(|_| ())
        .map_err(|e| reject("Fortify", e))
}

/// Take an unowned edge whose endpoints the caller both owns.
#[reducer]
pub fn claim_edge(ctx: &ReducerContext, src_id: u64, dst_id: u64) -> Result<(), String> {
    let player = caller(ctx)?;
    let config = load_config(ctx);
    let state = state(ctx, &config);
    ActionProcessor::new(config, FixedRaid(false))
        .claim_edge(&state, EdgeKey::new(NodeId(src_id), NodeId(dst_id)), player)
        .map(|_| ())
        .map_err(|e| reject("Claim", e))
}

/// Attempt to destroy a rival's edge. A failed roll is not an error.
#[reducer]
pub fn raid_edge(ctx: &ReducerContext, src_id: u64, dst_id: u64) -> Result<(), String> {
    let player = caller(ctx)?;
    let config = load_config(ctx);
    let state = state(ctx, &config);
    // Deterministic per call so the host can replay it
    let seed = (ctx.timestamp.to_micros_since_unix_epoch() as u64) ^ player.0.rotate_left(32);
    let raid = UniformRaid::seeded(config.raid_success_chance, seed);
    let result = ActionProcessor::new(config, raid)
        .raid(&state, EdgeKey::new(NodeId(src_id), NodeId(dst_id)), player)
        .map_err(|e| reject("Raid", e))?;
    if !result.success {
        log::info!("{} raid on edge({}->{}) failed", player, src_id, dst_id);
    }
    Ok(())
}

// ============================================================================
// RECONCILIATION
// ============================================================================

fn run_reconciliation(ctx: &ReducerContext) -> Result<(), String> {
    let config = load_config(ctx);
    let now = to_datetime(ctx.timestamp).map_err(|e| e.to_string())?;
    let state = state(ctx, &config);
    match IncomeReconciler::new(config).run(&state, now) {
        Ok(report) => {
            if let Ok(body) = serde_json::to_string(&report) {
                log::info!("Reconciliation report: {}", body);
            }
            Ok(())
        }
        Err(e) => {
            let failure = ReconcileFailure::from(&e);
            log::error!("Reconciliation failed: {}", failure.error);
            Err(failure.error)
        }
    }
}

/// Scheduled income settlement
#[reducer]
pub fn reconcile_tick(ctx: &ReducerContext, _schedule: ReconcileSchedule) -> Result<(), String> {
    if ctx.sender != ctx.identity() {
        return Err("reconcile_tick may only be invoked by the scheduler".to_string());
    }
    run_reconciliation(ctx)
}

/// Manual settlement trigger; safe to repeat
#[reducer]
pub fn reconcile_income(ctx: &ReducerContext) -> Result<(), String> {
    log::info!("Manual reconciliation requested by {:?}", ctx.sender);
    run_reconciliation(ctx)
}

//! `StateStore` over SpacetimeDB tables.
//!
//! A reducer runs as one serializable transaction, so a version check and
//! the write that follows it can never be interleaved by another reducer.
//! The adapter still honours the version contract: the logic crate's retry
//! loops and refunds behave the same here as over the in-memory store.

use chrono::{DateTime, NaiveDate, Utc};
use nodewar_logic::error::StoreError;
use nodewar_logic::model::{Edge, EdgeKey, FactionScore, Node, NodeId, Player, PlayerId};
use nodewar_logic::notify::{ChangeEvent, ChangeNotifier};
use nodewar_logic::store::{CasOutcome, StateStore, Versioned};
use spacetimedb::{ReducerContext, Table, Timestamp};

use crate::tables::*;

/// Week keys are stored as `YYYY-MM-DD`.
pub const WEEK_FORMAT: &str = "%Y-%m-%d";

pub fn to_datetime(ts: Timestamp) -> Result<DateTime<Utc>, StoreError> {
    let micros = ts.to_micros_since_unix_epoch();
    DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| StoreError::Rejected(format!("timestamp {} out of range", micros)))
}

pub fn to_timestamp(dt: DateTime<Utc>) -> Timestamp {
    Timestamp::from_micros_since_unix_epoch(dt.timestamp_micros())
}

pub fn week_key(week: NaiveDate) -> String {
    week.format(WEEK_FORMAT).to_string()
}

fn parse_week(key: &str) -> Result<NaiveDate, StoreError> {
    NaiveDate::parse_from_str(key, WEEK_FORMAT)
        .map_err(|e| StoreError::Rejected(format!("bad week key {:?}: {}", key, e)))
}

fn player_from_row(row: &PlayerRow) -> Result<Versioned<Player>, StoreError> {
    let faction = factions::from_u8(row.faction).ok_or_else(|| {
        StoreError::Rejected(format!("player {} has unknown faction {}", row.id, row.faction))
    })?;
    Ok(Versioned::new(
        row.version,
        Player {
            id: PlayerId(row.id),
            handle: row.handle.clone(),
            faction,
            charge: row.charge,
            last_income_at: to_datetime(row.last_income_at)?,
            ally_of: row.ally_of.map(PlayerId),
        },
    ))
}

fn node_from_row(row: &NodeRow) -> Result<Versioned<Node>, StoreError> {
    Ok(Versioned::new(
        row.version,
        Node {
            id: NodeId(row.id),
            owner_id: row.owner_id.map(PlayerId),
            charge: row.charge,
            fortify_lvl: row.fortify_lvl,
            x: row.x,
            y: row.y,
            created_at: to_datetime(row.created_at)?,
        },
    ))
}

fn edge_from_row(row: &EdgeRow) -> Result<Versioned<Edge>, StoreError> {
    Ok(Versioned::new(
        row.version,
        Edge {
            src_id: NodeId(row.src_id),
            dst_id: NodeId(row.dst_id),
            owner_id: row.owner_id.map(PlayerId),
            created_at: to_datetime(row.created_at)?,
        },
    ))
}

fn score_from_row(row: &FactionScoreRow) -> Result<Versioned<FactionScore>, StoreError> {
    Ok(Versioned::new(
        row.version,
        FactionScore {
            week_start: parse_week(&row.week_start)?,
            red_score: row.red_score,
            blue_score: row.blue_score,
        },
    ))
}

/// Table access scoped to one reducer call.
pub struct TableStore<'a> {
    ctx: &'a ReducerContext,
}

impl<'a> TableStore<'a> {
    pub fn new(ctx: &'a ReducerContext) -> Self {
        Self { ctx }
    }

    fn edge_row(&self, key: EdgeKey) -> Option<EdgeRow> {
        self.ctx
            .db
            .edge()
            .endpoints()
            .filter((key.src_id.0, key.dst_id.0))
            .next()
    }
}

impl StateStore for TableStore<'_> {
    fn player(&self, id: PlayerId) -> Result<Option<Versioned<Player>>, StoreError> {
        self.ctx
            .db
            .player()
            .id()
            .find(id.0)
            .map(|row| player_from_row(&row))
            .transpose()
    }

    fn node(&self, id: NodeId) -> Result<Option<Versioned<Node>>, StoreError> {
        self.ctx
            .db
            .node()
            .id()
            .find(id.0)
            .map(|row| node_from_row(&row))
            .transpose()
    }

    fn edge(&self, key: EdgeKey) -> Result<Option<Versioned<Edge>>, StoreError> {
        self.edge_row(key).map(|row| edge_from_row(&row)).transpose()
    }

    fn faction_score(
        &self,
        week_start: NaiveDate,
    ) -> Result<Option<Versioned<FactionScore>>, StoreError> {
        self.ctx
            .db
            .faction_score()
            .week_start()
            .find(week_key(week_start))
            .map(|row| score_from_row(&row))
            .transpose()
    }

    fn players(&self) -> Result<Vec<Versioned<Player>>, StoreError> {
        self.ctx.db.player().iter().map(|r| player_from_row(&r)).collect()
    }

    fn nodes(&self) -> Result<Vec<Versioned<Node>>, StoreError> {
        self.ctx.db.node().iter().map(|r| node_from_row(&r)).collect()
    }

    fn edges(&self) -> Result<Vec<Versioned<Edge>>, StoreError> {
        self.ctx.db.edge().iter().map(|r| edge_from_row(&r)).collect()
    }

    fn put_player_if(
        &self,
        expected_version: u64,
        player: Player,
    ) -> Result<CasOutcome<Player>, StoreError> {
        let Some(mut row) = self.ctx.db.player().id().find(player.id.0) else {
            return Ok(CasOutcome::Stale(None));
        };
        if row.version != expected_version {
            return Ok(CasOutcome::Stale(Some(player_from_row(&row)?)));
        }
        // identity is not part of the domain row and never changes
        row.handle = player.handle;
        row.faction = factions::to_u8(player.faction);
        row.charge = player.charge;
        row.last_income_at = to_timestamp(player.last_income_at);
        row.ally_of = player.ally_of.map(|p| p.0);
        row.version += 1;
        let row = self.ctx.db.player().id().update(row);
        Ok(CasOutcome::Committed(player_from_row(&row)?))
    }

    fn put_node_if(
        &self,
        expected_version: u64,
        node: Node,
    ) -> Result<CasOutcome<Node>, StoreError> {
        let Some(current) = self.ctx.db.node().id().find(node.id.0) else {
            return Ok(CasOutcome::Stale(None));
        };
        if current.version != expected_version {
            return Ok(CasOutcome::Stale(Some(node_from_row(&current)?)));
        }
        let row = self.ctx.db.node().id().update(NodeRow {
            id: node.id.0,
            owner_id: node.owner_id.map(|p| p.0),
            charge: node.charge,
            fortify_lvl: node.fortify_lvl,
            x: node.x,
            y: node.y,
            created_at: to_timestamp(node.created_at),
            version: current.version + 1,
        });
        Ok(CasOutcome::Committed(node_from_row(&row)?))
    }

    fn put_edge_if(
        &self,
        expected_version: u64,
        edge: Edge,
    ) -> Result<CasOutcome<Edge>, StoreError> {
        let Some(current) = self.edge_row(edge.key()) else {
            return Ok(CasOutcome::Stale(None));
        };
        if current.version != expected_version {
            return Ok(CasOutcome::Stale(Some(edge_from_row(&current)?)));
        }
        let row = self.ctx.db.edge().id().update(EdgeRow {
            id: current.id,
            src_id: edge.src_id.0,
            dst_id: edge.dst_id.0,
            owner_id: edge.owner_id.map(|p| p.0),
            created_at: to_timestamp(edge.created_at),
            version: current.version + 1,
        });
        Ok(CasOutcome::Committed(edge_from_row(&row)?))
    }

    fn delete_edge_if(
        &self,
        key: EdgeKey,
        expected_version: u64,
    ) -> Result<CasOutcome<Edge>, StoreError> {
        let Some(row) = self.edge_row(key) else {
            return Ok(CasOutcome::Stale(None));
        };
        let current = edge_from_row(&row)?;
        if row.version != expected_version {
            return Ok(CasOutcome::Stale(Some(current)));
        }
        self.ctx.db.edge().id().delete(row.id);
        Ok(CasOutcome::Committed(Versioned::new(
            current.version + 1,
            current.value,
        )))
    }

    fn put_faction_score_if(
        &self,
        expected_version: Option<u64>,
        score: FactionScore,
    ) -> Result<CasOutcome<FactionScore>, StoreError> {
        let key = week_key(score.week_start);
        let existing = self.ctx.db.faction_score().week_start().find(key.clone());
        let current_version = existing.as_ref().map(|r| r.version);
        if current_version != expected_version {
            return existing
                .map(|r| score_from_row(&r))
                .transpose()
                .map(CasOutcome::Stale);
        }
        let next = FactionScoreRow {
            week_start: key,
            red_score: score.red_score,
            blue_score: score.blue_score,
            version: current_version.unwrap_or(0) + 1,
        };
        let row = if existing.is_some() {
            self.ctx.db.faction_score().week_start().update(next)
        } else {
            self.ctx.db.faction_score().insert(next)
        };
        Ok(CasOutcome::Committed(score_from_row(&row)?))
    }
}

/// Clients observe changes through their table subscriptions; this only
/// records what the reducer committed.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl ChangeNotifier for LogNotifier {
    fn publish(&self, event: &ChangeEvent) {
        log::debug!(
            "{:?} {:?} v{}",
            event.entity_ref(),
            event.op,
            event.version
        );
    }
}

//! Canonical graph state and its conditional read-modify-write primitives.
//!
//! Every mutation in the crate goes through one of the primitives here:
//!
//! | Primitive | Condition | Publishes |
//! |-----------|-----------|-----------|
//! | [`GraphState::compare_and_set_node_owner`] | owner still `expected` | node upsert |
//! | [`GraphState::compare_and_set_fortify_level`] | caller owns node, level still `expected` | node upsert |
//! | [`GraphState::adjust_charge`] | result stays `>= min_result` | |
//! | [`GraphState::credit_income`] | `last_income_at` still `expected` | |
//! | [`GraphState::claim_edge_if_unowned`] | edge still has no owner | edge upsert |
//! | [`GraphState::delete_edge_if_owned`] | edge still owned by `expected` | edge delete |
//! | [`GraphState::accumulate_faction_score`] | none (adds onto stored totals) | |
//!
//! Each primitive is a compare-and-set loop over a single row. A stale write
//! re-checks the condition against the row the store returned: if the
//! condition still holds the write is retried (someone touched an unrelated
//! field), otherwise the primitive fails without having written anything.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::GameError;
use crate::model::{
    week_start, Edge, EdgeKey, FactionScore, Node, NodeId, Player, PlayerId,
};
use crate::notify::{ChangeEvent, ChangeNotifier};
use crate::store::{CasOutcome, StateStore, Versioned};

/// Full read of the world for a client's initial load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub players: Vec<Player>,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    pub faction_score: FactionScore,
}

pub struct GraphState<S, N> {
    store: S,
    notifier: N,
    max_attempts: u32,
}

impl<S: StateStore, N: ChangeNotifier> GraphState<S, N> {
    pub fn new(store: S, notifier: N, max_attempts: u32) -> Self {
        Self {
            store,
            notifier,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    // ── Reads ──────────────────────────────────────────────────────────

    pub fn player(&self, id: PlayerId) -> Result<Player, GameError> {
        self.store
            .player(id)?
            .map(|row| row.value)
            .ok_or(GameError::PlayerNotFound(id))
    }

    pub fn node(&self, id: NodeId) -> Result<Node, GameError> {
        self.store
            .node(id)?
            .map(|row| row.value)
            .ok_or(GameError::NodeNotFound(id))
    }

    pub fn edge(&self, key: EdgeKey) -> Result<Edge, GameError> {
        self.store
            .edge(key)?
            .map(|row| row.value)
            .ok_or(GameError::EdgeNotFound(key))
    }

    pub fn players(&self) -> Result<Vec<Player>, GameError> {
        Ok(self.store.players()?.into_iter().map(|r| r.value).collect())
    }

    /// Nodes owned per player, read from current state.
    pub fn owned_node_counts(&self) -> Result<HashMap<PlayerId, u64>, GameError> {
        let mut counts = HashMap::new();
        for row in self.store.nodes()? {
            if let Some(owner) = row.value.owner_id {
                *counts.entry(owner).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }

    /// Stored totals for the week, or zeros if nothing was settled yet.
    pub fn faction_score(&self, week: NaiveDate) -> Result<FactionScore, GameError> {
        Ok(self
            .store
            .faction_score(week)?
            .map(|row| row.value)
            .unwrap_or_else(|| FactionScore::empty(week)))
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> Result<Snapshot, GameError> {
        let mut nodes: Vec<Node> = self.store.nodes()?.into_iter().map(|r| r.value).collect();
        nodes.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        let mut edges: Vec<Edge> = self.store.edges()?.into_iter().map(|r| r.value).collect();
        edges.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.key().cmp(&b.key())));
        Ok(Snapshot {
            players: self.players()?,
            nodes,
            edges,
            faction_score: self.faction_score(week_start(now))?,
        })
    }

    // ── Conditional primitives ─────────────────────────────────────────

    fn exhausted(&self, what: String) -> GameError {
        GameError::Conflict(format!(
            "{} still contended after {} attempts",
            what, self.max_attempts
        ))
    }

    fn load_node(&self, id: NodeId) -> Result<Versioned<Node>, GameError> {
        self.store.node(id)?.ok_or(GameError::NodeNotFound(id))
    }

    fn load_player(&self, id: PlayerId) -> Result<Versioned<Player>, GameError> {
        self.store.player(id)?.ok_or(GameError::PlayerNotFound(id))
    }

    /// Set the owner only if it is still `expected`.
    pub fn compare_and_set_node_owner(
        &self,
        id: NodeId,
        expected: Option<PlayerId>,
        new_owner: Option<PlayerId>,
    ) -> Result<Node, GameError> {
        let mut row = self.load_node(id)?;
        for _ in 0..self.max_attempts {
            if row.value.owner_id != expected {
                return Err(GameError::Conflict(format!("{} owner changed", id)));
            }
            let mut next = row.value.clone();
            next.owner_id = new_owner;
            match self.store.put_node_if(row.version, next)? {
                CasOutcome::Committed(done) => {
                    self.notifier.publish(&ChangeEvent::node_upsert(&done));
                    return Ok(done.value);
                }
                CasOutcome::Stale(Some(current)) => {
                    log::debug!("{} owner write stale at v{}, retrying", id, row.version);
                    row = current;
                }
                CasOutcome::Stale(None) => return Err(GameError::NodeNotFound(id)),
            }
        }
        Err(self.exhausted(format!("{} owner", id)))
    }

    /// Move the fortify level from `expected_level` to `new_level`, only if
    /// `owner` still owns the node. Levels never go down.
    pub fn compare_and_set_fortify_level(
        &self,
        id: NodeId,
        owner: PlayerId,
        expected_level: u32,
        new_level: u32,
    ) -> Result<Node, GameError> {
        if new_level <= expected_level {
            return Err(GameError::InvalidTransition(format!(
                "{} fortify level {} -> {}",
                id, expected_level, new_level
            )));
        }
        let mut row = self.load_node(id)?;
        for _ in 0..self.max_attempts {
            if row.value.owner_id != Some(owner) {
                return Err(GameError::NotOwner {
                    node: id,
                    player: owner,
                });
            }
            if row.value.fortify_lvl != expected_level {
                return Err(GameError::Conflict(format!(
                    "{} fortify level is {}, expected {}",
                    id, row.value.fortify_lvl, expected_level
                )));
            }
            let mut next = row.value.clone();
            next.fortify_lvl = new_level;
            match self.store.put_node_if(row.version, next)? {
                CasOutcome::Committed(done) => {
                    self.notifier.publish(&ChangeEvent::node_upsert(&done));
                    return Ok(done.value);
                }
                CasOutcome::Stale(Some(current)) => row = current,
                CasOutcome::Stale(None) => return Err(GameError::NodeNotFound(id)),
            }
        }
        Err(self.exhausted(format!("{} fortify level", id)))
    }

    /// Add `delta` to the player's charge, refusing any result below
    /// `min_result`. A refusal leaves the row untouched; it never clamps.
    pub fn adjust_charge(
        &self,
        id: PlayerId,
        delta: i64,
        min_result: u64,
    ) -> Result<Player, GameError> {
        let mut row = self.load_player(id)?;
        for _ in 0..self.max_attempts {
            let available = row.value.charge;
            let result = i128::from(available) + i128::from(delta);
            if result < i128::from(min_result) {
                let required = (i128::from(min_result) - i128::from(delta)).max(0);
                return Err(GameError::InsufficientCharge {
                    player: id,
                    available,
                    required: u64::try_from(required).unwrap_or(u64::MAX),
                });
            }
            let charge = u64::try_from(result).map_err(|_| {
                GameError::InvalidTransition(format!("{} charge overflow", id))
            })?;
            let mut next = row.value.clone();
            next.charge = charge;
            match self.store.put_player_if(row.version, next)? {
                CasOutcome::Committed(done) => return Ok(done.value),
                CasOutcome::Stale(Some(current)) => {
                    log::debug!("{} charge write stale at v{}, retrying", id, row.version);
                    row = current;
                }
                CasOutcome::Stale(None) => return Err(GameError::PlayerNotFound(id)),
            }
        }
        Err(self.exhausted(format!("{} charge", id)))
    }

    /// Credit `income` and advance `last_income_at` to `now` in one write,
    /// only if the window starting at `expected_last_income_at` has not been
    /// credited by someone else.
    pub fn credit_income(
        &self,
        id: PlayerId,
        expected_last_income_at: DateTime<Utc>,
        income: u64,
        now: DateTime<Utc>,
    ) -> Result<Player, GameError> {
        let mut row = self.load_player(id)?;
        for _ in 0..self.max_attempts {
            if row.value.last_income_at != expected_last_income_at {
                return Err(GameError::Conflict(format!(
                    "{} income window already settled",
                    id
                )));
            }
            let mut next = row.value.clone();
            next.charge = next.charge.checked_add(income).ok_or_else(|| {
                GameError::InvalidTransition(format!("{} charge overflow", id))
            })?;
            next.last_income_at = now;
            match self.store.put_player_if(row.version, next)? {
                CasOutcome::Committed(done) => return Ok(done.value),
                CasOutcome::Stale(Some(current)) => row = current,
                CasOutcome::Stale(None) => return Err(GameError::PlayerNotFound(id)),
            }
        }
        Err(self.exhausted(format!("{} income", id)))
    }

    /// Give an unowned edge to `owner`. Losing to another claim is a
    /// `Conflict`; an edge destroyed mid-claim is `EdgeNotFound`.
    pub fn claim_edge_if_unowned(
        &self,
        key: EdgeKey,
        owner: PlayerId,
    ) -> Result<Edge, GameError> {
        let mut row = self
            .store
            .edge(key)?
            .ok_or(GameError::EdgeNotFound(key))?;
        for _ in 0..self.max_attempts {
            if let Some(current) = row.value.owner_id {
                return Err(GameError::Conflict(format!(
                    "{} already claimed by {}",
                    key, current
                )));
            }
            let mut next = row.value.clone();
            next.owner_id = Some(owner);
            match self.store.put_edge_if(row.version, next)? {
                CasOutcome::Committed(done) => {
                    self.notifier.publish(&ChangeEvent::edge_upsert(&done));
                    return Ok(done.value);
                }
                CasOutcome::Stale(Some(current)) => row = current,
                CasOutcome::Stale(None) => return Err(GameError::EdgeNotFound(key)),
            }
        }
        Err(self.exhausted(format!("{} claim", key)))
    }

    /// Remove the edge only if `expected_owner` still owns it.
    pub fn delete_edge_if_owned(
        &self,
        key: EdgeKey,
        expected_owner: PlayerId,
    ) -> Result<Edge, GameError> {
        let mut row = self
            .store
            .edge(key)?
            .ok_or(GameError::EdgeNotFound(key))?;
        for _ in 0..self.max_attempts {
            if row.value.owner_id != Some(expected_owner) {
                return Err(GameError::Conflict(format!("{} owner changed", key)));
            }
            match self.store.delete_edge_if(key, row.version)? {
                CasOutcome::Committed(tombstone) => {
                    self.notifier.publish(&ChangeEvent::edge_delete(&tombstone));
                    return Ok(tombstone.value);
                }
                CasOutcome::Stale(Some(current)) => row = current,
                CasOutcome::Stale(None) => {
                    return Err(GameError::Conflict(format!("{} already destroyed", key)))
                }
            }
        }
        Err(self.exhausted(key.to_string()))
    }

    /// Add this run's totals onto whatever is stored for the week.
    pub fn accumulate_faction_score(
        &self,
        week: NaiveDate,
        red: u64,
        blue: u64,
    ) -> Result<FactionScore, GameError> {
        let mut row = self.store.faction_score(week)?;
        for _ in 0..self.max_attempts {
            let base = row
                .as_ref()
                .map(|r| r.value.clone())
                .unwrap_or_else(|| FactionScore::empty(week));
            let next = FactionScore {
                week_start: week,
                red_score: base.red_score.saturating_add(red),
                blue_score: base.blue_score.saturating_add(blue),
            };
            match self
                .store
                .put_faction_score_if(row.as_ref().map(|r| r.version), next)?
            {
                CasOutcome::Committed(done) => return Ok(done.value),
                CasOutcome::Stale(current) => row = current,
            }
        }
        Err(self.exhausted(format!("faction score {}", week)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Faction;
    use crate::notify::{Broadcaster, ChangeOp, EntityKind};
    use crate::store::MemoryStore;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 14, 12, 0, 0).unwrap()
    }

    fn world() -> GraphState<MemoryStore, Broadcaster> {
        let players = vec![Player {
            id: PlayerId(1),
            handle: "ada".into(),
            faction: Faction::Red,
            charge: 100,
            last_income_at: t0(),
            ally_of: None,
        }];
        let nodes = vec![Node {
            id: NodeId(10),
            owner_id: None,
            charge: 0,
            fortify_lvl: 0,
            x: 0.0,
            y: 0.0,
            created_at: t0(),
        }];
        let edges = vec![Edge {
            src_id: NodeId(10),
            dst_id: NodeId(11),
            owner_id: Some(PlayerId(2)),
            created_at: t0(),
        }];
        GraphState::new(
            MemoryStore::seeded(players, nodes, edges),
            Broadcaster::new(),
            8,
        )
    }

    #[test]
    fn test_adjust_charge_rejects_below_zero_without_clamping() {
        let g = world();
        let err = g.adjust_charge(PlayerId(1), -101, 0).unwrap_err();
        assert_eq!(
            err,
            GameError::InsufficientCharge {
                player: PlayerId(1),
                available: 100,
                required: 101
            }
        );
        assert_eq!(g.player(PlayerId(1)).unwrap().charge, 100);
    }

    #[test]
    fn test_adjust_charge_to_exactly_zero() {
        let g = world();
        assert_eq!(g.adjust_charge(PlayerId(1), -100, 0).unwrap().charge, 0);
    }

    #[test]
    fn test_adjust_charge_respects_min_result() {
        let g = world();
        assert!(g.adjust_charge(PlayerId(1), -60, 50).is_err());
        assert_eq!(g.adjust_charge(PlayerId(1), -50, 50).unwrap().charge, 50);
    }

    #[test]
    fn test_owner_cas_publishes_upsert() {
        let g = world();
        let mut sub = g.notifier().subscribe();
        let node = g
            .compare_and_set_node_owner(NodeId(10), None, Some(PlayerId(1)))
            .unwrap();
        assert_eq!(node.owner_id, Some(PlayerId(1)));
        let events = sub.drain();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].entity, EntityKind::Node);
        assert_eq!(events[0].op, ChangeOp::Upsert);
    }

    #[test]
    fn test_owner_cas_fails_when_owned() {
        let g = world();
        g.compare_and_set_node_owner(NodeId(10), None, Some(PlayerId(1)))
            .unwrap();
        let err = g
            .compare_and_set_node_owner(NodeId(10), None, Some(PlayerId(2)))
            .unwrap_err();
        assert!(matches!(err, GameError::Conflict(_)));
        assert_eq!(g.node(NodeId(10)).unwrap().owner_id, Some(PlayerId(1)));
    }

    #[test]
    fn test_fortify_cas_checks_owner_and_level() {
        let g = world();
        assert!(matches!(
            g.compare_and_set_fortify_level(NodeId(10), PlayerId(1), 0, 1),
            Err(GameError::NotOwner { .. })
        ));
        g.compare_and_set_node_owner(NodeId(10), None, Some(PlayerId(1)))
            .unwrap();
        assert_eq!(
            g.compare_and_set_fortify_level(NodeId(10), PlayerId(1), 0, 1)
                .unwrap()
                .fortify_lvl,
            1
        );
        assert!(matches!(
            g.compare_and_set_fortify_level(NodeId(10), PlayerId(1), 0, 1),
            Err(GameError::Conflict(_))
        ));
        assert!(matches!(
            g.compare_and_set_fortify_level(NodeId(10), PlayerId(1), 1, 1),
            Err(GameError::InvalidTransition(_))
        ));
    }

    #[test]
    fn test_credit_income_is_single_shot_per_window() {
        let g = world();
        let now = t0() + Duration::minutes(5);
        let p = g.credit_income(PlayerId(1), t0(), 15, now).unwrap();
        assert_eq!(p.charge, 115);
        assert_eq!(p.last_income_at, now);
        assert!(matches!(
            g.credit_income(PlayerId(1), t0(), 15, now),
            Err(GameError::Conflict(_))
        ));
        assert_eq!(g.player(PlayerId(1)).unwrap().charge, 115);
    }

    #[test]
    fn test_delete_edge_publishes_tombstone() {
        let g = world();
        let mut sub = g.notifier().subscribe();
        let key = EdgeKey::new(NodeId(10), NodeId(11));
        g.delete_edge_if_owned(key, PlayerId(2)).unwrap();
        assert!(matches!(g.edge(key), Err(GameError::EdgeNotFound(_))));
        let events = sub.drain();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].op, ChangeOp::Delete);
        assert_eq!(events[0].version, 2);
    }

    #[test]
    fn test_delete_edge_wrong_owner() {
        let g = world();
        let key = EdgeKey::new(NodeId(10), NodeId(11));
        assert!(matches!(
            g.delete_edge_if_owned(key, PlayerId(1)),
            Err(GameError::Conflict(_))
        ));
        assert!(g.edge(key).is_ok());
    }

    fn unowned_edge(g: &GraphState<MemoryStore, Broadcaster>) -> EdgeKey {
        g.store()
            .insert_edge(Edge {
                src_id: NodeId(11),
                dst_id: NodeId(12),
                owner_id: None,
                created_at: t0(),
            })
            .unwrap();
        EdgeKey::new(NodeId(11), NodeId(12))
    }

    #[test]
    fn test_claim_edge_publishes_upsert() {
        let g = world();
        let key = unowned_edge(&g);
        let mut sub = g.notifier().subscribe();
        let edge = g.claim_edge_if_unowned(key, PlayerId(1)).unwrap();
        assert_eq!(edge.owner_id, Some(PlayerId(1)));
        assert_eq!(g.edge(key).unwrap().owner_id, Some(PlayerId(1)));
        let events = sub.drain();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].entity, EntityKind::Edge);
        assert_eq!(events[0].op, ChangeOp::Upsert);
        assert_eq!(events[0].version, 2);
    }

    #[test]
    fn test_claim_edge_second_claimant_conflicts() {
        let g = world();
        let key = unowned_edge(&g);
        g.claim_edge_if_unowned(key, PlayerId(1)).unwrap();
        assert!(matches!(
            g.claim_edge_if_unowned(key, PlayerId(2)),
            Err(GameError::Conflict(_))
        ));
        assert_eq!(g.edge(key).unwrap().owner_id, Some(PlayerId(1)));
    }

    #[test]
    fn test_claim_edge_already_owned_or_missing() {
        let g = world();
        let mut sub = g.notifier().subscribe();
        assert!(matches!(
            g.claim_edge_if_unowned(EdgeKey::new(NodeId(10), NodeId(11)), PlayerId(1)),
            Err(GameError::Conflict(_))
        ));
        assert!(matches!(
            g.claim_edge_if_unowned(EdgeKey::new(NodeId(1), NodeId(2)), PlayerId(1)),
            Err(GameError::EdgeNotFound(_))
        ));
        assert!(sub.drain().is_empty());
    }

    #[test]
    fn test_faction_score_accumulates() {
        let g = world();
        let week = week_start(t0());
        g.accumulate_faction_score(week, 10, 3).unwrap();
        let score = g.accumulate_faction_score(week, 5, 0).unwrap();
        assert_eq!(score.red_score, 15);
        assert_eq!(score.blue_score, 3);
    }

    #[test]
    fn test_owned_node_counts() {
        let g = world();
        assert!(g.owned_node_counts().unwrap().is_empty());
        g.compare_and_set_node_owner(NodeId(10), None, Some(PlayerId(1)))
            .unwrap();
        assert_eq!(g.owned_node_counts().unwrap()[&PlayerId(1)], 1);
    }
}

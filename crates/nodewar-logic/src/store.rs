//! State store adapter contract and an in-process implementation.
//!
//! The durable store is an external collaborator. All this crate needs from
//! it is row reads and single-row compare-and-set: every row carries a
//! version, and a conditional write only lands if the caller's expected
//! version is still current. [`MemoryStore`] provides exactly that over
//! `RwLock`ed maps, for the native harness and tests.

use std::collections::BTreeMap;
use std::sync::RwLock;

use chrono::NaiveDate;

use crate::error::StoreError;
use crate::model::{Edge, EdgeKey, FactionScore, Node, NodeId, Player, PlayerId};

/// A row together with the version it was read at.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub version: u64,
    pub value: T,
}

impl<T> Versioned<T> {
    pub fn new(version: u64, value: T) -> Self {
        Self { version, value }
    }
}

/// Result of a conditional write.
#[derive(Debug, Clone, PartialEq)]
pub enum CasOutcome<T> {
    /// The write landed; carries the row at its new version. For deletes this
    /// is the removed row stamped with its tombstone version.
    Committed(Versioned<T>),
    /// The expected version was no longer current; carries the current row
    /// (`None` if it no longer exists).
    Stale(Option<Versioned<T>>),
}

/// Row access with single-row conditional updates.
///
/// Implementations must make each `*_if` call atomic with respect to every
/// other call touching the same row. Nothing else is required: there are no
/// multi-row transactions.
pub trait StateStore {
    fn player(&self, id: PlayerId) -> Result<Option<Versioned<Player>>, StoreError>;
    fn node(&self, id: NodeId) -> Result<Option<Versioned<Node>>, StoreError>;
    fn edge(&self, key: EdgeKey) -> Result<Option<Versioned<Edge>>, StoreError>;
    fn faction_score(
        &self,
        week_start: NaiveDate,
    ) -> Result<Option<Versioned<FactionScore>>, StoreError>;

    fn players(&self) -> Result<Vec<Versioned<Player>>, StoreError>;
    fn nodes(&self) -> Result<Vec<Versioned<Node>>, StoreError>;
    fn edges(&self) -> Result<Vec<Versioned<Edge>>, StoreError>;

    /// Replace the player row iff its version is still `expected_version`.
    fn put_player_if(
        &self,
        expected_version: u64,
        player: Player,
    ) -> Result<CasOutcome<Player>, StoreError>;

    /// Replace the node row iff its version is still `expected_version`.
    fn put_node_if(&self, expected_version: u64, node: Node)
        -> Result<CasOutcome<Node>, StoreError>;

    /// Replace an existing edge row iff its version is still
    /// `expected_version`. Never creates edges.
    fn put_edge_if(&self, expected_version: u64, edge: Edge)
        -> Result<CasOutcome<Edge>, StoreError>;

    /// Remove the edge iff its version is still `expected_version`.
    fn delete_edge_if(
        &self,
        key: EdgeKey,
        expected_version: u64,
    ) -> Result<CasOutcome<Edge>, StoreError>;

    /// Write the week's score iff its version is still `expected_version`.
    /// `None` means "insert only if no row exists yet".
    fn put_faction_score_if(
        &self,
        expected_version: Option<u64>,
        score: FactionScore,
    ) -> Result<CasOutcome<FactionScore>, StoreError>;
}

type Table<K, T> = RwLock<BTreeMap<K, Versioned<T>>>;

/// In-process store. Each table sits behind its own lock, so a conditional
/// write on one row is linearizable with every other access to that table.
#[derive(Debug, Default)]
pub struct MemoryStore {
    players: Table<PlayerId, Player>,
    nodes: Table<NodeId, Node>,
    edges: Table<EdgeKey, Edge>,
    scores: Table<NaiveDate, FactionScore>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from rows produced by world generation and account
    /// creation. Every row starts at version 1.
    pub fn seeded(players: Vec<Player>, nodes: Vec<Node>, edges: Vec<Edge>) -> Self {
        Self {
            players: RwLock::new(
                players
                    .into_iter()
                    .map(|p| (p.id, Versioned::new(1, p)))
                    .collect(),
            ),
            nodes: RwLock::new(
                nodes
                    .into_iter()
                    .map(|n| (n.id, Versioned::new(1, n)))
                    .collect(),
            ),
            edges: RwLock::new(
                edges
                    .into_iter()
                    .map(|e| (e.key(), Versioned::new(1, e)))
                    .collect(),
            ),
            scores: RwLock::default(),
        }
    }

    pub fn insert_player(&self, player: Player) -> Result<(), StoreError> {
        insert(&self.players, player.id, player, "players")
    }

    pub fn insert_node(&self, node: Node) -> Result<(), StoreError> {
        insert(&self.nodes, node.id, node, "nodes")
    }

    pub fn insert_edge(&self, edge: Edge) -> Result<(), StoreError> {
        insert(&self.edges, edge.key(), edge, "edges")
    }
}

fn poisoned(table: &str) -> StoreError {
    StoreError::Unavailable(format!("{} table lock poisoned", table))
}

fn insert<K: Ord, T>(table: &Table<K, T>, key: K, value: T, name: &str) -> Result<(), StoreError> {
    let mut rows = table.write().map_err(|_| poisoned(name))?;
    if rows.contains_key(&key) {
        return Err(StoreError::Rejected(format!("duplicate key in {}", name)));
    }
    rows.insert(key, Versioned::new(1, value));
    Ok(())
}

fn get<K: Ord, T: Clone>(
    table: &Table<K, T>,
    key: &K,
    name: &str,
) -> Result<Option<Versioned<T>>, StoreError> {
    let rows = table.read().map_err(|_| poisoned(name))?;
    Ok(rows.get(key).cloned())
}

fn all<K, T: Clone>(table: &Table<K, T>, name: &str) -> Result<Vec<Versioned<T>>, StoreError> {
    let rows = table.read().map_err(|_| poisoned(name))?;
    Ok(rows.values().cloned().collect())
}

fn put_if<K: Ord, T: Clone>(
    table: &Table<K, T>,
    key: K,
    expected_version: Option<u64>,
    value: T,
    name: &str,
) -> Result<CasOutcome<T>, StoreError> {
    let mut rows = table.write().map_err(|_| poisoned(name))?;
    let current = rows.get(&key).map(|row| row.version);
    if current != expected_version {
        return Ok(CasOutcome::Stale(rows.get(&key).cloned()));
    }
    let next = Versioned::new(current.unwrap_or(0) + 1, value);
    rows.insert(key, next.clone());
    Ok(CasOutcome::Committed(next))
}

impl StateStore for MemoryStore {
    fn player(&self, id: PlayerId) -> Result<Option<Versioned<Player>>, StoreError> {
        get(&self.players, &id, "players")
    }

    fn node(&self, id: NodeId) -> Result<Option<Versioned<Node>>, StoreError> {
        get(&self.nodes, &id, "nodes")
    }

    fn edge(&self, key: EdgeKey) -> Result<Option<Versioned<Edge>>, StoreError> {
        get(&self.edges, &key, "edges")
    }

    fn faction_score(
        &self,
        week_start: NaiveDate,
    ) -> Result<Option<Versioned<FactionScore>>, StoreError> {
        get(&self.scores, &week_start, "faction_scores")
    }

    fn players(&self) -> Result<Vec<Versioned<Player>>, StoreError> {
        all(&self.players, "players")
    }

    fn nodes(&self) -> Result<Vec<Versioned<Node>>, StoreError> {
        all(&self.nodes, "nodes")
    }

    fn edges(&self) -> Result<Vec<Versioned<Edge>>, StoreError> {
        all(&self.edges, "edges")
    }

    fn put_player_if(
        &self,
        expected_version: u64,
        player: Player,
    ) -> Result<CasOutcome<Player>, StoreError> {
        put_if(
            &self.players,
            player.id,
            Some(expected_version),
            player,
            "players",
        )
    }

    fn put_node_if(
        &self,
        expected_version: u64,
        node: Node,
    ) -> Result<CasOutcome<Node>, StoreError> {
        put_if(&self.nodes, node.id, Some(expected_version), node, "nodes")
    }

    fn put_edge_if(
        &self,
        expected_version: u64,
        edge: Edge,
    ) -> Result<CasOutcome<Edge>, StoreError> {
        put_if(&self.edges, edge.key(), Some(expected_version), edge, "edges")
    }

    fn delete_edge_if(
        &self,
        key: EdgeKey,
        expected_version: u64,
    ) -> Result<CasOutcome<Edge>, StoreError> {
        let mut rows = self.edges.write().map_err(|_| poisoned("edges"))?;
        match rows.get(&key) {
            Some(row) if row.version == expected_version => {}
            other => return Ok(CasOutcome::Stale(other.cloned())),
        }
        match rows.remove(&key) {
            Some(row) => Ok(CasOutcome::Committed(Versioned::new(
                row.version + 1,
                row.value,
            ))),
            None => Ok(CasOutcome::Stale(None)),
        }
    }

    fn put_faction_score_if(
        &self,
        expected_version: Option<u64>,
        score: FactionScore,
    ) -> Result<CasOutcome<FactionScore>, StoreError> {
        put_if(
            &self.scores,
            score.week_start,
            expected_version,
            score,
            "faction_scores",
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Faction;
    use chrono::{TimeZone, Utc};

    fn player(id: u64) -> Player {
        Player {
            id: PlayerId(id),
            handle: format!("p{}", id),
            faction: Faction::Red,
            charge: 100,
            last_income_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            ally_of: None,
        }
    }

    #[test]
    fn test_put_if_advances_version() {
        let store = MemoryStore::seeded(vec![player(1)], vec![], vec![]);
        let row = store.player(PlayerId(1)).unwrap().unwrap();
        assert_eq!(row.version, 1);

        let mut p = row.value.clone();
        p.charge = 50;
        match store.put_player_if(1, p).unwrap() {
            CasOutcome::Committed(row) => {
                assert_eq!(row.version, 2);
                assert_eq!(row.value.charge, 50);
            }
            CasOutcome::Stale(_) => panic!("expected commit"),
        }
    }

    #[test]
    fn test_stale_write_is_refused() {
        let store = MemoryStore::seeded(vec![player(1)], vec![], vec![]);
        let mut p = player(1);
        p.charge = 1;
        assert!(matches!(
            store.put_player_if(1, p.clone()).unwrap(),
            CasOutcome::Committed(_)
        ));
        p.charge = 2;
        match store.put_player_if(1, p).unwrap() {
            CasOutcome::Stale(Some(current)) => {
                assert_eq!(current.version, 2);
                assert_eq!(current.value.charge, 1);
            }
            other => panic!("expected stale, got {:?}", other),
        }
    }

    #[test]
    fn test_score_insert_only_if_absent() {
        let store = MemoryStore::new();
        let week = NaiveDate::from_ymd_opt(2026, 10, 11).unwrap();
        assert!(matches!(
            store
                .put_faction_score_if(None, FactionScore::empty(week))
                .unwrap(),
            CasOutcome::Committed(_)
        ));
        assert!(matches!(
            store
                .put_faction_score_if(None, FactionScore::empty(week))
                .unwrap(),
            CasOutcome::Stale(Some(_))
        ));
    }

    #[test]
    fn test_duplicate_insert_rejected() {
        let store = MemoryStore::new();
        store.insert_player(player(1)).unwrap();
        assert!(matches!(
            store.insert_player(player(1)),
            Err(StoreError::Rejected(_))
        ));
    }
}

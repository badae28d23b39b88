//! Entity types for the territory graph: players, nodes, edges, weekly scores.
//!
//! Players, nodes and edges are created outside this crate (account creation
//! and world generation). The core only ever changes `owner_id`,
//! `fortify_lvl`, `charge`, `last_income_at`, and removes raided edges.

use std::fmt;

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Stable player identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(pub u64);

/// Stable node identifier, fixed at world generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u64);

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "player#{}", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

/// Composite identity of an edge. `(a, b)` and `(b, a)` are different edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EdgeKey {
    pub src_id: NodeId,
    pub dst_id: NodeId,
}

impl EdgeKey {
    pub fn new(src_id: NodeId, dst_id: NodeId) -> Self {
        Self { src_id, dst_id }
    }
}

impl fmt::Display for EdgeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "edge({}->{})", self.src_id.0, self.dst_id.0)
    }
}

/// The two competing teams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Faction {
    Red,
    Blue,
}

impl Faction {
    pub const ALL: [Faction; 2] = [Faction::Red, Faction::Blue];

    pub fn as_str(self) -> &'static str {
        match self {
            Faction::Red => "red",
            Faction::Blue => "blue",
        }
    }

    /// Parse the lowercase wire name.
    pub fn parse(s: &str) -> Option<Faction> {
        match s {
            "red" => Some(Faction::Red),
            "blue" => Some(Faction::Blue),
            _ => None,
        }
    }
}

impl fmt::Display for Faction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub id: PlayerId,
    pub handle: String,
    pub faction: Faction,
    /// Spendable resource. Never negative by construction.
    pub charge: u64,
    /// End of the last window credited by reconciliation.
    pub last_income_at: DateTime<Utc>,
    pub ally_of: Option<PlayerId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    /// `None` means neutral and capturable.
    pub owner_id: Option<PlayerId>,
    /// Stored but not read by any transition.
    pub charge: u64,
    pub fortify_lvl: u32,
    pub x: f32,
    pub y: f32,
    pub created_at: DateTime<Utc>,
}

impl Node {
    pub fn is_capturable(&self) -> bool {
        self.owner_id.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub src_id: NodeId,
    pub dst_id: NodeId,
    pub owner_id: Option<PlayerId>,
    pub created_at: DateTime<Utc>,
}

impl Edge {
    pub fn key(&self) -> EdgeKey {
        EdgeKey::new(self.src_id, self.dst_id)
    }

    /// Owned by someone other than `player`.
    pub fn raidable_by(&self, player: PlayerId) -> bool {
        matches!(self.owner_id, Some(owner) if owner != player)
    }
}

/// Cumulative faction totals for one week bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactionScore {
    /// Sunday of the week, serialized as `YYYY-MM-DD`.
    pub week_start: NaiveDate,
    pub red_score: u64,
    pub blue_score: u64,
}

impl FactionScore {
    pub fn empty(week_start: NaiveDate) -> Self {
        Self {
            week_start,
            red_score: 0,
            blue_score: 0,
        }
    }

    pub fn score(&self, faction: Faction) -> u64 {
        match faction {
            Faction::Red => self.red_score,
            Faction::Blue => self.blue_score,
        }
    }
}

/// Most recent Sunday (UTC) on or before `now`.
pub fn week_start(now: DateTime<Utc>) -> NaiveDate {
    let today = now.date_naive();
    let back = i64::from(today.weekday().num_days_from_sunday());
    today - Duration::days(back)
}

/// Whole minutes between `since` and `now`, truncated. Negative when the
/// stored timestamp is ahead of `now`.
pub fn elapsed_minutes(since: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (now - since).num_minutes()
}

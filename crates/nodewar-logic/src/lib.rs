//! Territory control and idle-income settlement for NodeWar.
//!
//! This crate owns every rule about who holds which node, what actions cost,
//! and how idle income is settled. It has no database or engine dependency:
//! the durable store is reached through the [`store::StateStore`] trait, so the
//! same logic runs inside the SpacetimeDB module and in the native harness.
//!
//! # Module Overview
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`actions`] | Capture, fortify and raid as conditional transitions |
//! | [`config`] | Game rules (costs, raid odds, income rate, period) |
//! | [`error`] | Error taxonomy and retry classification |
//! | [`graph`] | Graph state and its compare-and-set primitives |
//! | [`model`] | Players, nodes, edges, weekly faction scores |
//! | [`notify`] | Committed-mutation events and subscriptions |
//! | [`raid`] | Injectable raid outcome strategies |
//! | [`reconcile`] | Idle-income settlement and weekly aggregation |
//! | [`schedule`] | Clocks and a fixed-period reconciliation loop |
//! | [`store`] | Store adapter contract and in-memory store |
//!
//! ```
//! use nodewar_logic::actions::ActionProcessor;
//! use nodewar_logic::config::GameConfig;
//! use nodewar_logic::graph::GraphState;
//! use nodewar_logic::model::{Faction, Node, NodeId, Player, PlayerId};
//! use nodewar_logic::notify::NullNotifier;
//! use nodewar_logic::raid::FixedRaid;
//! use nodewar_logic::store::MemoryStore;
//! use chrono::{TimeZone, Utc};
//!
//! let t0 = Utc.with_ymd_and_hms(2026, 10, 14, 12, 0, 0).unwrap();
//! let store = MemoryStore::seeded(
//!     vec![Player {
//!         id: PlayerId(1),
//!         handle: "ada".into(),
//!         faction: Faction::Red,
//!         charge: 100,
//!         last_income_at: t0,
//!         ally_of: None,
//!     }],
//!     vec![Node {
//!         id: NodeId(1),
//!         owner_id: None,
//!         charge: 0,
//!         fortify_lvl: 0,
//!         x: 0.0,
//!         y: 0.0,
//!         created_at: t0,
//!     }],
//!     vec![],
//! );
//! let state = GraphState::new(store, NullNotifier, 8);
//! let actions = ActionProcessor::new(GameConfig::default(), FixedRaid(false));
//!
//! actions.capture(&state, NodeId(1), PlayerId(1)).unwrap();
//! assert_eq!(state.player(PlayerId(1)).unwrap().charge, 90);
//! ```

pub mod actions;
pub mod config;
pub mod error;
pub mod graph;
pub mod model;
pub mod notify;
pub mod raid;
pub mod reconcile;
pub mod schedule;
pub mod store;

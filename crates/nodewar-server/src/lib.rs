//! NodeWar Server - SpacetimeDB Module
//!
//! Territory graph and income settlement running as a SpacetimeDB module.
//! Game rules live in `nodewar-logic`; this crate maps them onto tables and
//! reducers. Clients subscribe to the public tables for live updates.

mod reducers;
mod store;
mod tables;

pub use reducers::*;
pub use tables::*;

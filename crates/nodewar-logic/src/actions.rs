//! Player actions: capture, fortify, edge claims, raid.
//!
//! Capture and fortify touch two rows (the player's charge and the node), and
//! the store only offers single-row conditional writes. The processor
//! therefore reserves charge first with [`GraphState::adjust_charge`], then
//! attempts the node write; if the node write loses a race the reservation is
//! refunded. A request that is rejected up front (missing node, wrong owner,
//! not enough charge) writes nothing at all.

use serde::{Deserialize, Serialize};

use crate::config::GameConfig;
use crate::error::GameError;
use crate::graph::GraphState;
use crate::model::{Edge, EdgeKey, Node, NodeId, PlayerId};
use crate::notify::ChangeNotifier;
use crate::raid::RaidResolver;
use crate::store::StateStore;

/// What a successful capture or fortify did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionReceipt {
    pub node: Node,
    pub cost: u64,
    /// Player charge right after the debit.
    pub remaining_charge: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaidResult {
    pub success: bool,
}

/// Validates and applies player actions against a [`GraphState`].
pub struct ActionProcessor<R> {
    config: GameConfig,
    raid: R,
}

impl<R: RaidResolver> ActionProcessor<R> {
    pub fn new(config: GameConfig, raid: R) -> Self {
        Self { config, raid }
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    /// Claim a neutral node.
    pub fn capture<S: StateStore, N: ChangeNotifier>(
        &self,
        state: &GraphState<S, N>,
        node_id: NodeId,
        player_id: PlayerId,
    ) -> Result<ActionReceipt, GameError> {
        let node = state.node(node_id)?;
        if !node.is_capturable() {
            return Err(GameError::Conflict(format!("{} is already owned", node_id)));
        }

        let cost = self.config.capture_cost;
        let reserved = state.adjust_charge(player_id, -signed(cost)?, 0)?;

        match state.compare_and_set_node_owner(node_id, None, Some(player_id)) {
            Ok(node) => {
                log::info!("{} captured {} for {}", player_id, node_id, cost);
                Ok(ActionReceipt {
                    node,
                    cost,
                    remaining_charge: reserved.charge,
                })
            }
            Err(e) => {
                log::warn!("Capture of {} by {} lost: {}", node_id, player_id, e);
                Err(refund(state, player_id, cost, e))
            }
        }
    }

    /// Raise an owned node's fortify level by one, paying `(lvl + 1) * step`.
    pub fn fortify<S: StateStore, N: ChangeNotifier>(
        &self,
        state: &GraphState<S, N>,
        node_id: NodeId,
        player_id: PlayerId,
    ) -> Result<ActionReceipt, GameError> {
        let node = state.node(node_id)?;
        if node.owner_id != Some(player_id) {
            return Err(GameError::NotOwner {
                node: node_id,
                player: player_id,
            });
        }

        let level = node.fortify_lvl;
        let next_level = level.checked_add(1).ok_or_else(|| {
            GameError::InvalidTransition(format!("{} is at max fortify level", node_id))
        })?;
        let cost = self.config.fortify_cost(level).ok_or_else(|| {
            GameError::InvalidTransition(format!(
                "{} fortify cost at level {} overflows",
                node_id, level
            ))
        })?;
        let reserved = state.adjust_charge(player_id, -signed(cost)?, 0)?;

        match state.compare_and_set_fortify_level(node_id, player_id, level, next_level) {
            Ok(node) => {
                log::info!(
                    "{} fortified {} to level {} for {}",
                    player_id,
                    node_id,
                    next_level,
                    cost
                );
                Ok(ActionReceipt {
                    node,
                    cost,
                    remaining_charge: reserved.charge,
                })
            }
            Err(e) => {
                log::warn!("Fortify of {} by {} lost: {}", node_id, player_id, e);
                Err(refund(state, player_id, cost, e))
            }
        }
    }

    /// Take an unowned edge whose endpoints both belong to the player. Free.
    /// Endpoint ownership is read before the edge write and is not re-checked
    /// by it.
    pub fn claim_edge<S: StateStore, N: ChangeNotifier>(
        &self,
        state: &GraphState<S, N>,
        key: EdgeKey,
        player_id: PlayerId,
    ) -> Result<Edge, GameError> {
        let edge = state.edge(key)?;
        if edge.owner_id.is_some() {
            return Err(GameError::Conflict(format!("{} is already owned", key)));
        }
        for node_id in [key.src_id, key.dst_id] {
            if state.node(node_id)?.owner_id != Some(player_id) {
                return Err(GameError::NotOwner {
                    node: node_id,
                    player: player_id,
                });
            }
        }

        let edge = state.claim_edge_if_unowned(key, player_id)?;
        log::info!("{} claimed {}", player_id, key);
        Ok(edge)
    }

    /// Attempt to destroy a rival-owned edge. Free; failure changes nothing.
    pub fn raid<S: StateStore, N: ChangeNotifier>(
        &self,
        state: &GraphState<S, N>,
        key: EdgeKey,
        player_id: PlayerId,
    ) -> Result<RaidResult, GameError> {
        let edge = state.edge(key)?;
        let owner = match edge.owner_id {
            Some(owner) if owner != player_id => owner,
            _ => return Err(GameError::NotRaidable(key)),
        };

        if !self.raid.resolve(player_id, &edge) {
            log::debug!("{} failed to raid {}", player_id, key);
            return Ok(RaidResult { success: false });
        }

        state.delete_edge_if_owned(key, owner)?;
        log::info!("{} destroyed {} owned by {}", player_id, key, owner);
        Ok(RaidResult { success: true })
    }
}

fn signed(cost: u64) -> Result<i64, GameError> {
    i64::try_from(cost)
        .map_err(|_| GameError::InvalidTransition(format!("cost {} out of range", cost)))
}

/// Attempts at returning a reservation. A positive delta can only lose to
/// contention or store failures, both of which clear up.
const REFUND_ATTEMPTS: u32 = 64;

/// Return a reservation after the node write lost with `lost`. Yields the
/// error the caller should see: `lost` itself if the charge is back, or
/// `RefundFailed` if it is not, since the player is then out of pocket.
fn refund<S: StateStore, N: ChangeNotifier>(
    state: &GraphState<S, N>,
    player_id: PlayerId,
    amount: u64,
    lost: GameError,
) -> GameError {
    // amount was already accepted by `signed` when it was reserved
    let result = signed(amount).and_then(|delta| {
        with_retries(REFUND_ATTEMPTS, || state.adjust_charge(player_id, delta, 0))
    });
    match result {
        Ok(_) => lost,
        Err(e) => {
            log::error!(
                "Refund of {} to {} failed, charge is short: {}",
                amount,
                player_id,
                e
            );
            GameError::RefundFailed {
                player: player_id,
                amount,
                reason: e.to_string(),
            }
        }
    }
}

/// Run `op` until it succeeds, fails terminally, or `attempts` runs out.
pub fn with_retries<T, F>(attempts: u32, mut op: F) -> Result<T, GameError>
where
    F: FnMut() -> Result<T, GameError>,
{
    let attempts = attempts.max(1);
    let mut tried = 1;
    loop {
        match op() {
            Err(e) if e.is_retryable() && tried < attempts => {
                log::debug!("Retrying after {} (attempt {}/{})", e, tried, attempts);
                tried += 1;
            }
            other => return other,
        }
    }
}

//! Error taxonomy for actions, reconciliation and the store adapter.
//!
//! | Kind | Variants | Retry |
//! |------|----------|-------|
//! | `NotFound` | node, edge, player missing | no |
//! | `Conflict` | lost an optimistic race, pass already running | yes |
//! | `InsufficientResource` | charge too low | no |
//! | `NotOwner` / `NotRaidable` | authorization or state mismatch | no |
//! | `TransientStoreFailure` | store I/O | yes |
//! | `Unrecoverable` | a reserved charge could not be returned | no |

use std::fmt;

use crate::model::{EdgeKey, NodeId, PlayerId};

/// Failure reported by a [`StateStore`](crate::store::StateStore) adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The backing store could not be reached or timed out.
    Unavailable(String),
    /// The store refused the write for a reason of its own.
    Rejected(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Unavailable(msg) => write!(f, "store unavailable: {}", msg),
            StoreError::Rejected(msg) => write!(f, "store rejected write: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

/// Coarse classification used by callers to decide on retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    InsufficientResource,
    NotOwner,
    NotRaidable,
    InvalidTransition,
    TransientStoreFailure,
    Unrecoverable,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GameError {
    NodeNotFound(NodeId),
    EdgeNotFound(EdgeKey),
    PlayerNotFound(PlayerId),
    /// Another writer changed the entity between read and conditional write.
    Conflict(String),
    InsufficientCharge {
        player: PlayerId,
        available: u64,
        required: u64,
    },
    NotOwner {
        node: NodeId,
        player: PlayerId,
    },
    /// Edge is neutral or owned by the raider.
    NotRaidable(EdgeKey),
    /// A write that would break an entity invariant (e.g. lowering a fortify level).
    InvalidTransition(String),
    /// A reconciliation pass is already in flight; this tick was skipped.
    ReconcileInProgress,
    /// The action lost after reserving charge and the reservation could not
    /// be returned. The player is short `amount` until repaired.
    RefundFailed {
        player: PlayerId,
        amount: u64,
        reason: String,
    },
    Store(StoreError),
}

impl GameError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GameError::NodeNotFound(_)
            | GameError::EdgeNotFound(_)
            | GameError::PlayerNotFound(_) => ErrorKind::NotFound,
            GameError::Conflict(_) | GameError::ReconcileInProgress => ErrorKind::Conflict,
            GameError::InsufficientCharge { .. } => ErrorKind::InsufficientResource,
            GameError::NotOwner { .. } => ErrorKind::NotOwner,
            GameError::NotRaidable(_) => ErrorKind::NotRaidable,
            GameError::InvalidTransition(_) => ErrorKind::InvalidTransition,
            GameError::Store(_) => ErrorKind::TransientStoreFailure,
            GameError::RefundFailed { .. } => ErrorKind::Unrecoverable,
        }
    }

    /// Nothing was committed, so the caller may re-attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Conflict | ErrorKind::TransientStoreFailure
        )
    }
}

impl From<StoreError> for GameError {
    fn from(e: StoreError) -> Self {
        GameError::Store(e)
    }
}

impl fmt::Display for GameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GameError::NodeNotFound(id) => write!(f, "{} not found", id),
            GameError::EdgeNotFound(key) => write!(f, "{} not found", key),
            GameError::PlayerNotFound(id) => write!(f, "{} not found", id),
            GameError::Conflict(what) => write!(f, "conflict: {}", what),
            GameError::InsufficientCharge {
                player,
                available,
                required,
            } => write!(
                f,
                "{} has {} charge, {} required",
                player, available, required
            ),
            GameError::NotOwner { node, player } => {
                write!(f, "{} does not own {}", player, node)
            }
            GameError::NotRaidable(key) => write!(f, "{} is not raidable", key),
            GameError::InvalidTransition(what) => write!(f, "invalid transition: {}", what),
            GameError::ReconcileInProgress => {
                write!(f, "a reconciliation pass is already running")
            }
            GameError::RefundFailed {
                player,
                amount,
                reason,
            } => write!(
                f,
                "refund of {} charge to {} failed: {}",
                amount, player, reason
            ),
            GameError::Store(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for GameError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GameError::Store(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(GameError::Conflict("node".into()).is_retryable());
        assert!(GameError::Store(StoreError::Unavailable("down".into())).is_retryable());
        assert!(GameError::ReconcileInProgress.is_retryable());
    }

    #[test]
    fn test_terminal_kinds() {
        let terminal = [
            GameError::NodeNotFound(NodeId(1)),
            GameError::EdgeNotFound(EdgeKey::new(NodeId(1), NodeId(2))),
            GameError::PlayerNotFound(PlayerId(1)),
            GameError::InsufficientCharge {
                player: PlayerId(1),
                available: 5,
                required: 10,
            },
            GameError::NotOwner {
                node: NodeId(1),
                player: PlayerId(2),
            },
            GameError::NotRaidable(EdgeKey::new(NodeId(1), NodeId(2))),
            GameError::RefundFailed {
                player: PlayerId(1),
                amount: 10,
                reason: "store unavailable".into(),
            },
        ];
        for e in terminal {
            assert!(!e.is_retryable(), "{} should be terminal", e);
        }
    }

    #[test]
    fn test_display() {
        let e = GameError::InsufficientCharge {
            player: PlayerId(7),
            available: 5,
            required: 10,
        };
        assert_eq!(e.to_string(), "player#7 has 5 charge, 10 required");
    }
}

//! Committed-mutation events and the publish side of change notification.
//!
//! Transport is someone else's problem. This module defines the event shape
//! (`{entity, op, payload}` plus the row version), the [`ChangeNotifier`]
//! seam the graph publishes through, and an in-process [`Broadcaster`] whose
//! [`Subscription`]s enforce per-entity ordering by dropping any event older
//! than one already delivered for the same id.

use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::model::{Edge, EdgeKey, Node, NodeId};
use crate::store::Versioned;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Node,
    Edge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOp {
    Upsert,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChangePayload {
    Node(Node),
    Edge(Edge),
}

/// Identity of the entity an event is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityRef {
    Node(NodeId),
    Edge(EdgeKey),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub entity: EntityKind,
    pub op: ChangeOp,
    /// Row version after the mutation; strictly increasing per entity.
    pub version: u64,
    pub payload: ChangePayload,
}

impl ChangeEvent {
    pub fn node_upsert(row: &Versioned<Node>) -> Self {
        Self {
            entity: EntityKind::Node,
            op: ChangeOp::Upsert,
            version: row.version,
            payload: ChangePayload::Node(row.value.clone()),
        }
    }

    pub fn edge_upsert(row: &Versioned<Edge>) -> Self {
        Self {
            entity: EntityKind::Edge,
            op: ChangeOp::Upsert,
            version: row.version,
            payload: ChangePayload::Edge(row.value.clone()),
        }
    }

    pub fn edge_delete(row: &Versioned<Edge>) -> Self {
        Self {
            entity: EntityKind::Edge,
            op: ChangeOp::Delete,
            version: row.version,
            payload: ChangePayload::Edge(row.value.clone()),
        }
    }

    pub fn entity_ref(&self) -> EntityRef {
        match &self.payload {
            ChangePayload::Node(node) => EntityRef::Node(node.id),
            ChangePayload::Edge(edge) => EntityRef::Edge(edge.key()),
        }
    }
}

/// Receives every committed node or edge mutation.
pub trait ChangeNotifier {
    fn publish(&self, event: &ChangeEvent);
}

/// Drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullNotifier;

impl ChangeNotifier for NullNotifier {
    fn publish(&self, _event: &ChangeEvent) {}
}

/// Fans events out to any number of in-process subscribers.
#[derive(Debug, Default)]
pub struct Broadcaster {
    subscribers: Mutex<Vec<Sender<ChangeEvent>>>,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel();
        match self.subscribers.lock() {
            Ok(mut subs) => subs.push(tx),
            Err(poisoned) => poisoned.into_inner().push(tx),
        }
        Subscription {
            rx,
            latest: HashMap::new(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        match self.subscribers.lock() {
            Ok(subs) => subs.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}

impl ChangeNotifier for Broadcaster {
    fn publish(&self, event: &ChangeEvent) {
        let mut subs = match self.subscribers.lock() {
            Ok(subs) => subs,
            Err(poisoned) => poisoned.into_inner(),
        };
        // Dropped subscriptions show up as send errors
        subs.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

/// Receiving end of a [`Broadcaster`].
#[derive(Debug)]
pub struct Subscription {
    rx: Receiver<ChangeEvent>,
    latest: HashMap<EntityRef, u64>,
}

impl Subscription {
    /// Record `event` if it is newer than anything seen for its entity.
    fn accept(&mut self, event: &ChangeEvent) -> bool {
        let key = event.entity_ref();
        match self.latest.get(&key) {
            Some(&seen) if seen >= event.version => false,
            _ => {
                self.latest.insert(key, event.version);
                true
            }
        }
    }

    /// Everything currently queued, minus stale or duplicate deliveries.
    pub fn drain(&mut self) -> Vec<ChangeEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            if self.accept(&event) {
                out.push(event);
            }
        }
        out
    }

    /// Wait up to `timeout` for the next in-order event.
    pub fn recv_timeout(&mut self, timeout: Duration) -> Option<ChangeEvent> {
        loop {
            match self.rx.recv_timeout(timeout) {
                Ok(event) => {
                    if self.accept(&event) {
                        return Some(event);
                    }
                }
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                    return None
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PlayerId;
    use chrono::{TimeZone, Utc};

    fn node_row(version: u64, owner: Option<u64>) -> Versioned<Node> {
        Versioned::new(
            version,
            Node {
                id: NodeId(1),
                owner_id: owner.map(PlayerId),
                charge: 0,
                fortify_lvl: 0,
                x: 0.0,
                y: 0.0,
                created_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            },
        )
    }

    #[test]
    fn test_wire_shape() {
        let event = ChangeEvent::node_upsert(&node_row(2, Some(9)));
        let json: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert_eq!(json["entity"], "node");
        assert_eq!(json["op"], "upsert");
        assert_eq!(json["payload"]["owner_id"], 9);
    }

    #[test]
    fn test_subscription_drops_stale_and_duplicate() {
        let hub = Broadcaster::new();
        let mut sub = hub.subscribe();
        hub.publish(&ChangeEvent::node_upsert(&node_row(3, Some(1))));
        hub.publish(&ChangeEvent::node_upsert(&node_row(2, None)));
        hub.publish(&ChangeEvent::node_upsert(&node_row(3, Some(1))));
        let got = sub.drain();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].version, 3);
    }

    #[test]
    fn test_dropped_subscriber_is_pruned() {
        let hub = Broadcaster::new();
        let sub = hub.subscribe();
        let _keep = hub.subscribe();
        drop(sub);
        hub.publish(&ChangeEvent::node_upsert(&node_row(1, None)));
        assert_eq!(hub.subscriber_count(), 1);
    }
}

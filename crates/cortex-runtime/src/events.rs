//! Memory event bus.
//!
//! Every mutation the [`MemoryEngine`][crate::engine::MemoryEngine] applies
//! is announced as a [`MemoryEvent`] on a [`tokio::sync::broadcast`] channel,
//! so observers (loggers, UIs, sync agents) can follow the graph without
//! taking its lock.  Publishing never fails: with nobody listening the event
//! is simply dropped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::warn;
use uuid::Uuid;

/// Default channel capacity (number of buffered events before old ones are
/// dropped for slow subscribers).
const DEFAULT_CAPACITY: usize = 256;

/// What happened to the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MemoryEventKind {
    EntityUpserted { name: String },
    ObservationsAdded { name: String, count: usize },
    ObservationRemoved { name: String },
    SessionUpdated { name: String },
    EntityDeleted { name: String },
    RelationAdded { from: String, to: String, relation_type: String },
    RelationRemoved { from: String, to: String, relation_type: String },
    RelationsPruned { count: usize },
    Searched { query: String, hits: usize },
    Consolidated { merges: usize, promotions: usize },
    SkillsSynthesized { created: usize },
    Flushed { version: u64 },
}

/// A timestamped [`MemoryEventKind`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: MemoryEventKind,
}

impl MemoryEvent {
    pub fn new(kind: MemoryEventKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            kind,
        }
    }
}

/// Shared memory event bus.  Clone it cheaply; all clones share the same
/// broadcast channel.
#[derive(Clone, Debug)]
pub struct MemoryBus {
    sender: broadcast::Sender<MemoryEvent>,
}

impl MemoryBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event.  Returns the number of subscribers that received
    /// it; `0` when nobody is listening.
    pub fn publish(&self, kind: MemoryEventKind) -> usize {
        self.sender.send(MemoryEvent::new(kind)).unwrap_or(0)
    }

    pub fn subscribe(&self) -> MemorySubscriber {
        MemorySubscriber {
            receiver: self.sender.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// Receiving end of a [`MemoryBus`].
pub struct MemorySubscriber {
    receiver: broadcast::Receiver<MemoryEvent>,
}

impl MemorySubscriber {
    /// Wait for the next event.
    ///
    /// Returns `None` once every bus handle has been dropped.  A subscriber
    /// that fell behind skips the dropped events and keeps going.
    pub async fn recv(&mut self) -> Option<MemoryEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(lagged_by = n, "memory subscriber lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking receive; `None` when no event is queued.
    pub fn try_recv(&mut self) -> Option<MemoryEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_without_subscribers_is_not_an_error() {
        let bus = MemoryBus::default();
        assert_eq!(bus.publish(MemoryEventKind::Flushed { version: 1 }), 0);
    }

    #[tokio::test]
    async fn subscriber_receives_events_in_order() {
        let bus = MemoryBus::new(8);
        let mut sub = bus.subscribe();
        bus.publish(MemoryEventKind::EntityUpserted { name: "Redis".into() });
        bus.publish(MemoryEventKind::EntityDeleted { name: "Redis".into() });

        let first = sub.recv().await.unwrap();
        assert_eq!(first.kind, MemoryEventKind::EntityUpserted { name: "Redis".into() });
        let second = sub.recv().await.unwrap();
        assert_eq!(second.kind, MemoryEventKind::EntityDeleted { name: "Redis".into() });
    }

    #[tokio::test]
    async fn closed_bus_ends_subscription() {
        let bus = MemoryBus::new(4);
        let mut sub = bus.subscribe();
        drop(bus);
        assert!(sub.recv().await.is_none());
    }

    #[test]
    fn lagging_subscriber_skips_ahead() {
        let bus = MemoryBus::new(2);
        let mut sub = bus.subscribe();
        for version in 0..5 {
            bus.publish(MemoryEventKind::Flushed { version });
        }
        let event = sub.try_recv().unwrap();
        assert_eq!(event.kind, MemoryEventKind::Flushed { version: 3 });
    }

    #[test]
    fn event_serializes_with_kind_tag() {
        let event = MemoryEvent::new(MemoryEventKind::Searched {
            query: "redis".into(),
            hits: 1,
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "searched");
        assert_eq!(json["query"], "redis");
        assert_eq!(json["hits"], 1);
    }
}

//! Monitor event log
//!
//! Every notable step of a connection monitor is recorded as a
//! `MonitorEvent`. The `EventStore` keeps a bounded history and broadcasts
//! new events to any number of subscribers (e.g. an SSE endpoint).

use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{RwLock, broadcast};
use tokio_stream::wrappers::BroadcastStream;

use crate::ids::TopicId;
use crate::monitor::MonitorState;

/// A single monitor event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorEvent {
    /// When the event was recorded
    pub timestamp: DateTime<Utc>,
    /// Inbound topic being monitored
    pub topic_id: TopicId,
    /// What happened
    pub kind: EventKind,
}

impl MonitorEvent {
    pub fn new(topic_id: TopicId, kind: EventKind) -> Self {
        Self {
            timestamp: Utc::now(),
            topic_id,
            kind,
        }
    }
}

/// Event classification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    StateChanged {
        state: MonitorState,
    },
    FeedUnavailable {
        reason: String,
    },
    HandshakeCompleted {
        request_id: u64,
        requester: String,
        channel_id: TopicId,
    },
    HandshakeFailed {
        request_id: u64,
        reason: String,
        attempts: u32,
    },
    FollowUpFailed {
        request_id: u64,
        channel_id: TopicId,
        reason: String,
    },
    MalformedEntry {
        sequence_number: u64,
        reason: String,
    },
    DeadLettered {
        request_id: u64,
        attempts: u32,
    },
}

/// Bounded event history with broadcast fan-out
#[derive(Debug, Clone)]
pub struct EventStore {
    events: Arc<RwLock<Vec<MonitorEvent>>>,
    broadcaster: broadcast::Sender<MonitorEvent>,
    capacity: usize,
}

impl EventStore {
    /// Create a new event store with default capacity (1000 events)
    pub fn new() -> Self {
        Self::with_capacity(1000)
    }

    /// Create a new event store with specified capacity
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, _) = broadcast::channel(capacity);
        Self {
            events: Arc::new(RwLock::new(Vec::with_capacity(capacity))),
            broadcaster: tx,
            capacity,
        }
    }

    /// Record an event and broadcast it
    pub async fn push(&self, event: MonitorEvent) {
        let mut events = self.events.write().await;
        if events.len() >= self.capacity {
            events.remove(0);
        }
        events.push(event.clone());

        // No subscribers is fine.
        let _ = self.broadcaster.send(event);
    }

    /// Broadcast an event to live subscribers without retaining it
    pub fn broadcast(&self, event: MonitorEvent) {
        let _ = self.broadcaster.send(event);
    }

    /// All retained events, oldest first
    pub async fn events(&self) -> Vec<MonitorEvent> {
        self.events.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.events.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.events.read().await.is_empty()
    }

    /// Subscribe to events recorded from now on
    ///
    /// Slow subscribers that fall behind skip the overwritten events.
    pub fn subscribe(&self) -> EventStream {
        BroadcastStream::new(self.broadcaster.subscribe())
            .filter_map(|item| async move {
                match item {
                    Ok(event) => Some(event),
                    Err(lagged) => {
                        tracing::warn!("Event subscriber lagged: {}", lagged);
                        None
                    }
                }
            })
            .boxed()
    }

    /// Snapshot of current events plus a subscription for future ones
    pub async fn snapshot_and_subscribe(&self) -> (Vec<MonitorEvent>, EventStream) {
        // Hold the read lock so no event falls between snapshot and subscription.
        let events = self.events.read().await;
        let stream = self.subscribe();
        (events.clone(), stream)
    }
}

impl Default for EventStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Stream of monitor events
pub type EventStream = BoxStream<'static, MonitorEvent>;

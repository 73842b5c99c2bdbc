//! In-process feed
//!
//! Keeps topics in memory with the same append-only, strictly increasing
//! sequence semantics as a consensus topic. Used by tests and the loopback demos.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use tokio::sync::RwLock;

use crate::feed::{FeedError, FeedReader, Hcs10Message, LogEntry};
use crate::ids::TopicId;

/// Append-only in-memory topics
#[derive(Debug)]
pub struct InMemoryFeed {
    topics: RwLock<HashMap<TopicId, Vec<LogEntry>>>,
    next_topic: AtomicU64,
    outages: AtomicU32,
    fetches: AtomicU64,
}

impl InMemoryFeed {
    /// Create an empty feed; created topics are numbered from `0.0.1000`
    pub fn new() -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            next_topic: AtomicU64::new(1000),
            outages: AtomicU32::new(0),
            fetches: AtomicU64::new(0),
        }
    }

    /// Allocate a fresh, empty topic
    pub async fn create_topic(&self) -> TopicId {
        let mut topics = self.topics.write().await;
        loop {
            let num = self.next_topic.fetch_add(1, Ordering::Relaxed);
            let topic = TopicId::new(0, 0, num);
            if !topics.contains_key(&topic) {
                topics.insert(topic, Vec::new());
                return topic;
            }
        }
    }

    /// Register a topic with a well-known id (no-op if it exists)
    pub async fn ensure_topic(&self, topic: TopicId) {
        self.topics.write().await.entry(topic).or_default();
    }

    /// Append a raw payload and return its sequence number
    pub async fn append(
        &self,
        topic: &TopicId,
        payload: impl Into<String>,
    ) -> Result<u64, FeedError> {
        let mut topics = self.topics.write().await;
        let entries = topics
            .get_mut(topic)
            .ok_or(FeedError::TopicNotFound(*topic))?;

        let sequence_number = entries.last().map(|e| e.sequence_number + 1).unwrap_or(1);
        entries.push(LogEntry::from_payload(sequence_number, payload, Utc::now()));
        Ok(sequence_number)
    }

    /// Append an HCS-10 envelope
    pub async fn append_message(
        &self,
        topic: &TopicId,
        message: &Hcs10Message,
    ) -> Result<u64, FeedError> {
        self.append(topic, message.to_payload()).await
    }

    /// Make the next `count` fetches fail with `FeedUnavailable`
    pub fn fail_next_fetches(&self, count: u32) {
        self.outages.store(count, Ordering::SeqCst);
    }

    /// Number of fetch calls served or failed so far
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Current entries of a topic without counting as a fetch
    pub async fn entries(&self, topic: &TopicId) -> Vec<LogEntry> {
        self.topics
            .read()
            .await
            .get(topic)
            .cloned()
            .unwrap_or_default()
    }

    fn take_outage(&self) -> bool {
        self.outages
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Default for InMemoryFeed {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FeedReader for InMemoryFeed {
    async fn fetch(&self, topic: &TopicId) -> Result<Vec<LogEntry>, FeedError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);

        if self.take_outage() {
            return Err(FeedError::FeedUnavailable("simulated outage".to_string()));
        }

        self.topics
            .read()
            .await
            .get(topic)
            .cloned()
            .ok_or(FeedError::TopicNotFound(*topic))
    }

    fn name(&self) -> &str {
        "in-memory"
    }
}

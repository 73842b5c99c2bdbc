//! Loopback peer - the requesting side of a connection, in memory

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

use hcs_agent_core::{
    AccountId, FeedError, Hcs10Message, InMemoryFeed, Operation, OperatorId, TopicId,
};

use crate::handshakes::Connection;

/// A message read from a connection topic
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelMessage {
    pub sequence_number: u64,
    /// `operator_id` of the sender, when present
    pub sender: Option<String>,
    pub text: String,
}

/// An agent identity on an [`InMemoryFeed`]
///
/// Owns an inbound topic, sends connection requests to other agents and
/// reads and writes connection topics.
pub struct LoopbackPeer {
    feed: Arc<InMemoryFeed>,
    operator: OperatorId,
    read_marks: Mutex<HashMap<TopicId, u64>>,
    outgoing: RwLock<Vec<Connection>>,
}

impl LoopbackPeer {
    /// Register a new agent for `account`, creating its inbound topic
    pub async fn register(feed: Arc<InMemoryFeed>, account: AccountId) -> Self {
        let inbound_topic = feed.create_topic().await;
        Self {
            feed,
            operator: OperatorId {
                inbound_topic,
                account,
            },
            read_marks: Mutex::new(HashMap::new()),
            outgoing: RwLock::new(Vec::new()),
        }
    }

    pub fn operator(&self) -> OperatorId {
        self.operator
    }

    pub fn inbound_topic(&self) -> TopicId {
        self.operator.inbound_topic
    }

    /// Post a `connection_request` on `target` and return its request id
    pub async fn request_connection(
        &self,
        target: &TopicId,
        memo: Option<&str>,
    ) -> Result<u64, FeedError> {
        let request = Hcs10Message::connection_request(&self.operator, memo);
        let request_id = self.feed.append_message(target, &request).await?;
        tracing::debug!(%target, request_id, "Connection request sent");
        Ok(request_id)
    }

    /// Connection topic announced for `request_id` on `target`, if confirmed yet
    pub async fn find_confirmation(&self, target: &TopicId, request_id: u64) -> Option<TopicId> {
        self.feed
            .entries(target)
            .await
            .into_iter()
            .find_map(|entry| match entry.operation {
                Operation::Confirmation {
                    request_id: confirmed,
                    connection_topic_id,
                } if confirmed == request_id => connection_topic_id,
                _ => None,
            })
    }

    /// Wait until the other agent confirms `request_id` or `timeout` passes
    ///
    /// A confirmed connection is remembered as outgoing.
    pub async fn await_confirmation(
        &self,
        target: &TopicId,
        request_id: u64,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Option<Connection> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            if let Some(channel) = self.find_confirmation(target, request_id).await {
                let connection = Connection {
                    request_id,
                    peer: self.confirmer(target, request_id).await,
                    channel,
                };
                self.outgoing.write().await.push(connection.clone());
                return Some(connection);
            }

            if tokio::time::Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    /// Connections this peer initiated and saw confirmed
    pub async fn outgoing(&self) -> Vec<Connection> {
        self.outgoing.read().await.clone()
    }

    /// Post `text` on a connection topic
    pub async fn send(&self, channel: &TopicId, text: &str) -> Result<u64, FeedError> {
        let sender = OperatorId {
            inbound_topic: *channel,
            account: self.operator.account,
        };
        self.feed
            .append_message(channel, &Hcs10Message::message(&sender, text))
            .await
    }

    /// Messages on `channel` not returned by a previous call
    pub async fn read_new(&self, channel: &TopicId) -> Vec<ChannelMessage> {
        let mut marks = self.read_marks.lock().await;
        let mark = marks.entry(*channel).or_insert(0);

        let entries = self.feed.entries(channel).await;
        let messages: Vec<ChannelMessage> = entries
            .iter()
            .filter(|entry| entry.sequence_number > *mark)
            .filter_map(|entry| {
                let message: Hcs10Message = serde_json::from_str(&entry.payload).ok()?;
                let text = message.data.or(message.m)?;
                Some(ChannelMessage {
                    sequence_number: entry.sequence_number,
                    sender: message.operator_id,
                    text,
                })
            })
            .collect();

        if let Some(last) = entries.last() {
            *mark = (*mark).max(last.sequence_number);
        }
        messages
    }

    // The confirming agent identifies itself in `operator_id`; fall back to
    // the target topic with an unknown account.
    async fn confirmer(&self, target: &TopicId, request_id: u64) -> OperatorId {
        self.feed
            .entries(target)
            .await
            .iter()
            .filter(|entry| entry.operation.confirmed_request() == Some(request_id))
            .find_map(|entry| {
                let message: Hcs10Message = serde_json::from_str(&entry.payload).ok()?;
                message.operator_id?.parse().ok()
            })
            .unwrap_or(OperatorId {
                inbound_topic: *target,
                account: AccountId::new(0, 0, 0),
            })
    }
}

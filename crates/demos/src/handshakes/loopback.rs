//! Loopback handshake - accepts connections against an [`InMemoryFeed`]

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::RwLock;

use hcs_agent_core::{
    AccountId, HandshakeError, HandshakeInvoker, HandshakePolicy, HandshakeResult, Hcs10Message,
    InMemoryFeed, OperatorId, PendingRequest, TopicId,
};

/// An established connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Connection {
    /// Request id (sequence number on the inbound topic)
    pub request_id: u64,
    /// Agent on the other side
    pub peer: OperatorId,
    /// Shared connection topic
    pub channel: TopicId,
}

/// Simulates the standards SDK's accept flow in memory
///
/// On accept it creates the connection topic, publishes `connection_created`
/// on the inbound topic and remembers the connection. Follow-ups are posted
/// as HCS-10 `message` envelopes on the channel.
pub struct LoopbackHandshake {
    feed: Arc<InMemoryFeed>,
    account: AccountId,
    connections: RwLock<Vec<Connection>>,
    failures: AtomicU32,
}

impl LoopbackHandshake {
    /// Create an invoker accepting on behalf of `account`
    pub fn new(feed: Arc<InMemoryFeed>, account: AccountId) -> Self {
        Self {
            feed,
            account,
            connections: RwLock::new(Vec::new()),
            failures: AtomicU32::new(0),
        }
    }

    /// Make the next `count` accepts fail
    pub fn fail_next_accepts(&self, count: u32) {
        self.failures.store(count, Ordering::SeqCst);
    }

    pub fn account(&self) -> AccountId {
        self.account
    }

    /// Connections accepted so far, oldest first
    pub async fn connections(&self) -> Vec<Connection> {
        self.connections.read().await.clone()
    }

    fn take_failure(&self) -> bool {
        self.failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn operator(&self, inbound_topic: &TopicId) -> OperatorId {
        OperatorId {
            inbound_topic: *inbound_topic,
            account: self.account,
        }
    }
}

#[async_trait]
impl HandshakeInvoker for LoopbackHandshake {
    async fn accept(
        &self,
        inbound_topic: &TopicId,
        request: &PendingRequest,
        policy: &HandshakePolicy,
    ) -> Result<HandshakeResult, HandshakeError> {
        if self.take_failure() {
            return Err(HandshakeError::HandshakeFailed(
                "simulated submission failure".to_string(),
            ));
        }

        let channel = self.feed.create_topic().await;
        if let Some(fee) = policy.connection_fee_tinybars {
            tracing::info!(%channel, fee_tinybars = fee, "Connection topic carries a message fee");
        }

        let confirmation = Hcs10Message::connection_created(
            request.sequence_number,
            &channel,
            &request.requester().account,
            &self.operator(inbound_topic),
        );
        self.feed
            .append_message(inbound_topic, &confirmation)
            .await
            .map_err(|e| HandshakeError::HandshakeFailed(e.to_string()))?;

        self.connections.write().await.push(Connection {
            request_id: request.sequence_number,
            peer: *request.requester(),
            channel,
        });

        tracing::debug!(
            request_id = request.sequence_number,
            %channel,
            "Loopback connection created"
        );

        Ok(HandshakeResult {
            new_channel_id: channel,
        })
    }

    async fn send_follow_up(
        &self,
        channel: &TopicId,
        request: &PendingRequest,
        text: &str,
    ) -> Result<(), HandshakeError> {
        let sender = OperatorId {
            inbound_topic: *channel,
            account: self.account,
        };
        let message = Hcs10Message::message(&sender, text);

        self.feed
            .append_message(channel, &message)
            .await
            .map(|_| ())
            .map_err(|e| {
                HandshakeError::HandshakeFailed(format!(
                    "follow-up for request {} failed: {}",
                    request.sequence_number, e
                ))
            })
    }

    fn name(&self) -> &str {
        "loopback"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hcs_agent_core::{FeedReader, Operation};

    async fn setup() -> (Arc<InMemoryFeed>, TopicId, PendingRequest) {
        let feed = Arc::new(InMemoryFeed::new());
        let inbound = feed.create_topic().await;
        let requester: OperatorId = "0.0.77@0.0.78".parse().unwrap();
        feed.append_message(&inbound, &Hcs10Message::connection_request(&requester, Some("hi")))
            .await
            .unwrap();

        let entries = feed.fetch(&inbound).await.unwrap();
        let pending = PendingRequest::from_entry(&entries[0]).unwrap();
        (feed, inbound, pending)
    }

    #[tokio::test]
    async fn test_accept_confirms_on_inbound_topic() {
        let (feed, inbound, pending) = setup().await;
        let handshake = LoopbackHandshake::new(feed.clone(), AccountId::new(0, 0, 2));

        let result = handshake
            .accept(&inbound, &pending, &HandshakePolicy::default())
            .await
            .unwrap();

        let entries = feed.entries(&inbound).await;
        assert_eq!(entries.len(), 2);
        assert_eq!(
            entries[1].operation,
            Operation::Confirmation {
                request_id: 1,
                connection_topic_id: Some(result.new_channel_id),
            }
        );

        let connections = handshake.connections().await;
        assert_eq!(connections.len(), 1);
        assert_eq!(connections[0].peer.account, AccountId::new(0, 0, 78));
    }

    #[tokio::test]
    async fn test_follow_up_lands_on_channel() {
        let (feed, inbound, pending) = setup().await;
        let handshake = LoopbackHandshake::new(feed.clone(), AccountId::new(0, 0, 2));
        let result = handshake
            .accept(&inbound, &pending, &HandshakePolicy::default())
            .await
            .unwrap();

        handshake
            .send_follow_up(&result.new_channel_id, &pending, "welcome")
            .await
            .unwrap();

        let channel = feed.entries(&result.new_channel_id).await;
        assert_eq!(channel.len(), 1);
        assert!(channel[0].payload.contains("welcome"));
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let (feed, inbound, pending) = setup().await;
        let handshake = LoopbackHandshake::new(feed.clone(), AccountId::new(0, 0, 2));
        handshake.fail_next_accepts(1);

        let policy = HandshakePolicy::default();
        assert!(handshake.accept(&inbound, &pending, &policy).await.is_err());
        assert!(handshake.accept(&inbound, &pending, &policy).await.is_ok());
        assert_eq!(feed.entries(&inbound).await.len(), 2);
    }
}

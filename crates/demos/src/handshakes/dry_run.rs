//! Dry-run handshake - reports accepts without performing them

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};

use hcs_agent_core::{
    HandshakeError, HandshakeInvoker, HandshakePolicy, HandshakeResult, PendingRequest, TopicId,
};

/// Channel id reported for every dry-run accept
pub const PLACEHOLDER_CHANNEL: TopicId = TopicId::new(0, 0, 0);

/// Logs each request it would accept and succeeds without side effects
///
/// Useful for watching a live inbound topic with read-only credentials.
#[derive(Debug, Default)]
pub struct DryRunHandshake {
    accepted: AtomicU64,
}

impl DryRunHandshake {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of accepts reported so far
    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl HandshakeInvoker for DryRunHandshake {
    async fn accept(
        &self,
        inbound_topic: &TopicId,
        request: &PendingRequest,
        policy: &HandshakePolicy,
    ) -> Result<HandshakeResult, HandshakeError> {
        self.accepted.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            %inbound_topic,
            request_id = request.sequence_number,
            requester = %request.requester(),
            memo = request.request.memo.as_deref().unwrap_or(""),
            fee_tinybars = policy.connection_fee_tinybars,
            "[dry run] would accept connection request"
        );

        Ok(HandshakeResult {
            new_channel_id: PLACEHOLDER_CHANNEL,
        })
    }

    async fn send_follow_up(
        &self,
        channel: &TopicId,
        request: &PendingRequest,
        text: &str,
    ) -> Result<(), HandshakeError> {
        tracing::info!(
            %channel,
            request_id = request.sequence_number,
            text,
            "[dry run] would send follow-up"
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "dry-run"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use hcs_agent_core::LogEntry;

    #[tokio::test]
    async fn test_dry_run_accepts_without_side_effects() {
        let entry = LogEntry::from_payload(
            4,
            r#"{"p":"hcs-10","op":"connection_request","operator_id":"0.0.5@0.0.6"}"#,
            Utc::now(),
        );
        let pending = PendingRequest::from_entry(&entry).unwrap();
        let handshake = DryRunHandshake::new();

        let result = handshake
            .accept(&TopicId::new(0, 0, 1), &pending, &HandshakePolicy::default())
            .await
            .unwrap();

        assert_eq!(result.new_channel_id, PLACEHOLDER_CHANNEL);
        assert_eq!(handshake.accepted(), 1);
        assert_eq!(handshake.name(), "dry-run");
    }
}

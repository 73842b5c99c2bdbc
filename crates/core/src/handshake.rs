//! Handshake invoker abstraction
//!
//! Accepting a connection request (creating the shared connection topic and
//! announcing it) is delegated to an external standards SDK. This module
//! defines the seam the monitor calls through.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::feed::{ConnectionRequest, LogEntry, OperatorId};
use crate::ids::TopicId;

/// Handshake errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandshakeError {
    /// The accept or follow-up call failed (insufficient funds, invalid target, network...)
    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),
}

/// Outcome of a successful accept
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeResult {
    /// Shared channel created for the two agents
    pub new_channel_id: TopicId,
}

/// Fee and messaging policy applied to accepted connections
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HandshakePolicy {
    /// Fee charged for messages on the new connection topic, in tinybars
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_fee_tinybars: Option<u64>,

    /// Sent on the new channel right after the accept
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub welcome_message: Option<String>,
}

/// A connection request selected for a handshake
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRequest {
    /// Sequence number of the request on the inbound topic; the request id
    pub sequence_number: u64,
    pub request: ConnectionRequest,
    pub created_at: DateTime<Utc>,
}

impl PendingRequest {
    /// Extract a pending request from a log entry, if it carries one
    pub fn from_entry(entry: &LogEntry) -> Option<Self> {
        entry.as_request().map(|request| Self {
            sequence_number: entry.sequence_number,
            request: request.clone(),
            created_at: entry.created_at,
        })
    }

    pub fn requester(&self) -> &OperatorId {
        &self.request.requester
    }
}

/// Performs the accept side of the connection protocol
#[async_trait]
pub trait HandshakeInvoker: Send + Sync {
    /// Accept `request` received on `inbound_topic`
    ///
    /// Creates the shared connection topic and confirms the request. Called at
    /// most once per successfully handled request.
    async fn accept(
        &self,
        inbound_topic: &TopicId,
        request: &PendingRequest,
        policy: &HandshakePolicy,
    ) -> Result<HandshakeResult, HandshakeError>;

    /// Post a follow-up message (e.g. a greeting) on a fresh channel
    ///
    /// Duplicates are tolerated; the default implementation sends nothing.
    async fn send_follow_up(
        &self,
        _channel: &TopicId,
        _request: &PendingRequest,
        _text: &str,
    ) -> Result<(), HandshakeError> {
        Ok(())
    }

    /// Short name used in logs
    fn name(&self) -> &str {
        "handshake"
    }
}

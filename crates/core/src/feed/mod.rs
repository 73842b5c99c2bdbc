//! Message feed module
//!
//! A feed is an externally-owned, append-only, sequence-numbered message log
//! (a consensus topic). This module defines the entry model, the
//! `FeedReader` seam and the built-in readers: an in-process feed and a
//! mirror node REST reader.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub mod memory;
pub mod message;
pub mod mirror;

pub use memory::InMemoryFeed;
pub use message::{Hcs10Message, parse_operation};
pub use mirror::MirrorNodeFeed;

use crate::ids::{AccountId, EntityIdError, TopicId};

/// Feed errors
#[derive(Debug, Error)]
pub enum FeedError {
    /// The external service could not be reached or answered with an error
    #[error("Feed unavailable: {0}")]
    FeedUnavailable(String),

    /// The referenced log does not exist
    #[error("Topic not found: {0}")]
    TopicNotFound(TopicId),
}

impl FeedError {
    /// Whether retrying the same fetch may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, FeedError::FeedUnavailable(_))
    }
}

/// Identity of an agent that sent a connection request
///
/// Encoded on the wire as `<inboundTopicId>@<accountId>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OperatorId {
    /// Inbound topic of the requesting agent
    pub inbound_topic: TopicId,
    /// Account of the requesting agent
    pub account: AccountId,
}

impl fmt::Display for OperatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.inbound_topic, self.account)
    }
}

impl FromStr for OperatorId {
    type Err = EntityIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (topic, account) = s.split_once('@').ok_or_else(|| EntityIdError {
            input: s.to_string(),
            reason: "expected <topic>@<account>",
        })?;

        Ok(Self {
            inbound_topic: topic.parse()?,
            account: account.parse()?,
        })
    }
}

impl Serialize for OperatorId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for OperatorId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// A parsed connection request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionRequest {
    /// Who is asking to connect
    pub requester: OperatorId,

    /// Optional memo attached by the requester
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memo: Option<String>,
}

/// Operation carried by a log entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Operation {
    /// Someone asks to open a connection
    Request(ConnectionRequest),

    /// A previously received request was accepted
    Confirmation {
        /// Sequence number of the request being confirmed
        request_id: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        connection_topic_id: Option<TopicId>,
    },

    /// A well-formed envelope with an operation we do not act on
    Other { op: String },

    /// A request or confirmation envelope missing required fields
    Malformed { op: String, reason: String },

    /// Not an envelope at all
    Unrecognized { reason: String },
}

impl Operation {
    /// Check if this is a connection request
    pub fn is_request(&self) -> bool {
        matches!(self, Operation::Request(_))
    }

    /// Referenced request id, for confirmations
    pub fn confirmed_request(&self) -> Option<u64> {
        match self {
            Operation::Confirmation { request_id, .. } => Some(*request_id),
            _ => None,
        }
    }
}

/// A single entry of a feed
///
/// Entries are immutable once appended and owned by the external feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Unique, strictly increasing per feed
    pub sequence_number: u64,
    /// Parsed operation
    pub operation: Operation,
    /// Raw payload as published
    pub payload: String,
    /// Consensus timestamp
    pub created_at: DateTime<Utc>,
}

impl LogEntry {
    /// Build an entry by parsing a raw payload
    pub fn from_payload(
        sequence_number: u64,
        payload: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        let payload = payload.into();
        Self {
            sequence_number,
            operation: parse_operation(&payload),
            payload,
            created_at,
        }
    }

    /// The connection request carried by this entry, if any
    pub fn as_request(&self) -> Option<&ConnectionRequest> {
        match &self.operation {
            Operation::Request(request) => Some(request),
            _ => None,
        }
    }
}

/// Read side of a feed
#[async_trait]
pub trait FeedReader: Send + Sync {
    /// Fetch the entries of a topic, ordered by sequence number ascending
    ///
    /// Failures are reported, never retried here; the caller owns the retry policy.
    async fn fetch(&self, topic: &TopicId) -> Result<Vec<LogEntry>, FeedError>;

    /// Short name used in logs
    fn name(&self) -> &str {
        "feed"
    }
}

//! # hcs-agent-core
//!
//! An async Rust library for agents that accept HCS-10 connection requests
//! arriving on an append-only consensus topic.
//!
//! ## Features
//!
//! - Feed readers for the Hedera mirror node and an in-memory topic store
//! - Pure reconciliation of a topic log against the set of confirmed requests
//! - A polling connection monitor with watermarks, retries and dead letters
//! - Pluggable handshake invokers via the `HandshakeInvoker` trait
//! - Monitor events with history and broadcast subscriptions
//! - Operator command parsing, optionally backed by an LLM
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use hcs_agent_core::{AppConfig, ConnectionMonitor, MirrorNodeFeed};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = AppConfig::from_env()?;
//!     let feed = Arc::new(MirrorNodeFeed::new(&config.mirror_node_url));
//!     let invoker = Arc::new(MyInvoker::default());
//!
//!     let monitor = ConnectionMonitor::new(
//!         config.require_inbound_topic()?,
//!         feed,
//!         invoker,
//!         &config.monitor,
//!     );
//!     let handle = monitor.spawn();
//!
//!     tokio::signal::ctrl_c().await?;
//!     handle.stop().await?;
//!     Ok(())
//! }
//! ```
//!
//! ### Custom Handshake
//!
//! ```ignore
//! use hcs_agent_core::{
//!     HandshakeError, HandshakeInvoker, HandshakePolicy, HandshakeResult, PendingRequest, TopicId,
//! };
//!
//! struct MyInvoker;
//!
//! #[async_trait::async_trait]
//! impl HandshakeInvoker for MyInvoker {
//!     async fn accept(
//!         &self,
//!         inbound_topic: &TopicId,
//!         request: &PendingRequest,
//!         policy: &HandshakePolicy,
//!     ) -> Result<HandshakeResult, HandshakeError> {
//!         // Create the connection topic and confirm on the inbound topic
//!     }
//! }
//! ```

pub mod command;
pub mod config;
pub mod error;
pub mod events;
pub mod feed;
pub mod handshake;
pub mod ids;
pub mod ledger;
pub mod llm;
pub mod monitor;
pub mod reconcile;
pub mod retry;

// Convenience re-exports for common types
pub use command::{
    Command, CommandInterpreter, CommandSource, LlmCommandParser, PlainCommandParser,
    ScriptedCommandSource, StdinCommandSource,
};

pub use config::{AppConfig, ConfigError, LlmConfig, MonitorConfig, NetworkKind, OperatorConfig};

pub use error::{HcsError, HcsResult};

pub use events::{EventKind, EventStore, EventStream, MonitorEvent};

pub use feed::{
    ConnectionRequest, FeedError, FeedReader, Hcs10Message, InMemoryFeed, LogEntry,
    MirrorNodeFeed, Operation, OperatorId,
};

pub use handshake::{
    HandshakeError, HandshakeInvoker, HandshakePolicy, HandshakeResult, PendingRequest,
};

pub use ids::{AccountId, EntityId, EntityIdError, TopicId};

pub use ledger::ProcessedSet;

pub use llm::{ChatMessage, ChatModel, ChatRole, LlmClient, LlmError};

pub use monitor::{
    ConnectionMonitor, MonitorHandle, MonitorState, MonitorStats, MonitorStatus, PollOutcome,
};

pub use reconcile::{Reconciliation, reconcile};

pub use retry::RetryPolicy;

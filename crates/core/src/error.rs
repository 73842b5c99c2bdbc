use thiserror::Error;

use crate::config::ConfigError;
use crate::feed::FeedError;
use crate::handshake::HandshakeError;
use crate::llm::LlmError;

/// Errors surfaced by the library's public entry points
#[derive(Debug, Error)]
pub enum HcsError {
    /// Feed error
    #[error("Feed error: {0}")]
    Feed(#[from] FeedError),

    /// Handshake error
    #[error("Handshake error: {0}")]
    Handshake(#[from] HandshakeError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Language model error
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    /// The monitor task panicked or was aborted
    #[error("Monitor task failed: {0}")]
    TaskFailed(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for library operations
pub type HcsResult<T> = Result<T, HcsError>;

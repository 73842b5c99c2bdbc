//! hcs-agent-demos
//!
//! Demo handshake invokers, an in-memory agent peer and the console used by
//! the demo binaries.

pub mod console;
pub mod handshakes;
pub mod peer;

pub use console::{Console, Reply};
pub use handshakes::{Connection, DryRunHandshake, LoopbackHandshake};
pub use peer::{ChannelMessage, LoopbackPeer};

use std::path::{Path, PathBuf};

use hcs_agent_core::{AppConfig, ConfigError};

/// Initialise `tracing` for a demo binary
///
/// Honours `RUST_LOG`, falling back to `default_filter`.
pub fn init_tracing(default_filter: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    // A second initialisation (e.g. from tests) is harmless.
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Env file named by the first command-line argument, if any
pub fn env_file_arg() -> Option<PathBuf> {
    std::env::args_os().nth(1).map(PathBuf::from)
}

/// Load configuration from `env_file`, or from `.env` and the process
/// environment when no file is given
pub fn load_config(env_file: Option<&Path>) -> Result<AppConfig, ConfigError> {
    match env_file {
        Some(path) => AppConfig::from_env_file(path),
        None => {
            dotenvy::dotenv().ok();
            AppConfig::from_env()
        }
    }
}

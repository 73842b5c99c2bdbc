//! Configuration
//!
//! All settings are gathered once at process start into an [`AppConfig`] and
//! passed by reference to the components that need them. Nothing else in
//! the library reads environment variables.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::handshake::HandshakePolicy;
use crate::ids::{AccountId, TopicId};
use crate::retry::RetryPolicy;

pub const ENV_NETWORK: &str = "HEDERA_NETWORK";
pub const ENV_OPERATOR_ID: &str = "HEDERA_OPERATOR_ID";
pub const ENV_MIRROR_NODE_URL: &str = "MIRROR_NODE_URL";
pub const ENV_INBOUND_TOPIC_ID: &str = "INBOUND_TOPIC_ID";
pub const ENV_POLL_INTERVAL_MS: &str = "POLL_INTERVAL_MS";
pub const ENV_FETCH_RETRY_MAX_ATTEMPTS: &str = "FETCH_RETRY_MAX_ATTEMPTS";
pub const ENV_FETCH_RETRY_BASE_DELAY_MS: &str = "FETCH_RETRY_BASE_DELAY_MS";
pub const ENV_FETCH_RETRY_JITTER_MS: &str = "FETCH_RETRY_JITTER_MS";
pub const ENV_MAX_HANDSHAKE_ATTEMPTS: &str = "MAX_HANDSHAKE_ATTEMPTS";
pub const ENV_CONNECTION_FEE_HBAR: &str = "CONNECTION_FEE_HBAR";
pub const ENV_WELCOME_MESSAGE: &str = "WELCOME_MESSAGE";
pub const ENV_OPENAI_API_KEY: &str = "OPENAI_API_KEY";
pub const ENV_OPENAI_MODEL: &str = "OPENAI_MODEL";
pub const ENV_OPENAI_BASE_URL: &str = "OPENAI_BASE_URL";
pub const ENV_SERVER_ADDR: &str = "SERVER_ADDR";

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(2000);
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_SERVER_ADDR: SocketAddr =
    SocketAddr::V4(std::net::SocketAddrV4::new(std::net::Ipv4Addr::LOCALHOST, 3000));

const TINYBARS_PER_HBAR: f64 = 100_000_000.0;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    #[error("Invalid value '{value}' for {var}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("Env file error: {0}")]
    EnvFile(String),
}

/// Ledger network
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkKind {
    Mainnet,
    #[default]
    Testnet,
    Previewnet,
}

impl NetworkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkKind::Mainnet => "mainnet",
            NetworkKind::Testnet => "testnet",
            NetworkKind::Previewnet => "previewnet",
        }
    }

    /// Public mirror node for this network
    pub fn mirror_node_url(&self) -> &'static str {
        match self {
            NetworkKind::Mainnet => "https://mainnet-public.mirrornode.hedera.com",
            NetworkKind::Testnet => "https://testnet.mirrornode.hedera.com",
            NetworkKind::Previewnet => "https://previewnet.mirrornode.hedera.com",
        }
    }

    /// Explorer link for a topic
    pub fn explorer_topic_url(&self, topic: &TopicId) -> String {
        format!("https://hashscan.io/{}/topic/{}", self.as_str(), topic)
    }

    /// Explorer link for an account
    pub fn explorer_account_url(&self, account: &AccountId) -> String {
        format!("https://hashscan.io/{}/account/{}", self.as_str(), account)
    }
}

impl fmt::Display for NetworkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NetworkKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mainnet" => Ok(NetworkKind::Mainnet),
            "testnet" => Ok(NetworkKind::Testnet),
            "previewnet" => Ok(NetworkKind::Previewnet),
            other => Err(format!("unknown network '{}'", other)),
        }
    }
}

/// Account the agent acts as
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperatorConfig {
    pub account_id: AccountId,
}

impl OperatorConfig {
    pub fn new(account_id: AccountId) -> Self {
        Self { account_id }
    }
}

/// Chat completion endpoint settings
#[derive(Clone, PartialEq, Eq)]
pub struct LlmConfig {
    api_key: String,
    pub model: String,
    pub base_url: String,
}

impl LlmConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: DEFAULT_OPENAI_MODEL.to_string(),
            base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }
}

impl fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmConfig")
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// Settings of a connection monitor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Delay between polls
    pub poll_interval: Duration,

    /// Retries of a failing feed fetch within one poll
    pub fetch_retry: RetryPolicy,

    /// Retries of a failing follow-up message
    pub follow_up_retry: RetryPolicy,

    /// Give up on a request after this many failed handshakes (`None` = never)
    #[serde(default)]
    pub max_handshake_attempts: Option<u32>,

    /// Fee and greeting applied to accepted connections
    #[serde(default)]
    pub handshake_policy: HandshakePolicy,

    /// Number of events retained per monitor
    pub event_capacity: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            fetch_retry: RetryPolicy::default(),
            follow_up_retry: RetryPolicy::default(),
            max_handshake_attempts: None,
            handshake_policy: HandshakePolicy::default(),
            event_capacity: 1000,
        }
    }
}

impl MonitorConfig {
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_fetch_retry(mut self, policy: RetryPolicy) -> Self {
        self.fetch_retry = policy;
        self
    }

    pub fn with_follow_up_retry(mut self, policy: RetryPolicy) -> Self {
        self.follow_up_retry = policy;
        self
    }

    pub fn with_max_handshake_attempts(mut self, attempts: u32) -> Self {
        self.max_handshake_attempts = Some(attempts.max(1));
        self
    }

    pub fn with_handshake_policy(mut self, policy: HandshakePolicy) -> Self {
        self.handshake_policy = policy;
        self
    }
}

/// Process-wide configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub network: NetworkKind,
    pub operator: Option<OperatorConfig>,
    pub mirror_node_url: String,
    pub inbound_topic: Option<TopicId>,
    pub monitor: MonitorConfig,
    pub llm: Option<LlmConfig>,
    /// Listen address of the HTTP server
    pub server_addr: SocketAddr,
}

impl Default for AppConfig {
    fn default() -> Self {
        let network = NetworkKind::default();
        Self {
            network,
            operator: None,
            mirror_node_url: network.mirror_node_url().to_string(),
            inbound_topic: None,
            monitor: MonitorConfig::default(),
            llm: None,
            server_addr: DEFAULT_SERVER_ADDR,
        }
    }
}

impl AppConfig {
    /// Build from the process environment
    ///
    /// Binaries call `dotenvy::dotenv()` first so a `.env` file is honoured.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(std::env::vars())
    }

    /// Build from an env file, with process variables taking precedence
    pub fn from_env_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let mut vars: HashMap<String, String> = dotenvy::from_path_iter(path.as_ref())
            .map_err(|e| ConfigError::EnvFile(e.to_string()))?
            .collect::<Result<_, _>>()
            .map_err(|e| ConfigError::EnvFile(e.to_string()))?;
        vars.extend(std::env::vars());
        Self::from_vars(vars)
    }

    /// Build from explicit key/value pairs
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars = Vars(
            vars.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );

        let network = vars
            .parse_with(ENV_NETWORK, |s| s.parse::<NetworkKind>())?
            .unwrap_or_default();

        let operator = vars
            .parse_with(ENV_OPERATOR_ID, |s| s.parse::<AccountId>())?
            .map(OperatorConfig::new);

        let mirror_node_url = vars
            .get(ENV_MIRROR_NODE_URL)
            .map(str::to_string)
            .unwrap_or_else(|| network.mirror_node_url().to_string());

        let inbound_topic = vars.parse_with(ENV_INBOUND_TOPIC_ID, |s| s.parse::<TopicId>())?;

        let mut monitor = MonitorConfig::default();
        if let Some(ms) = vars.parse_with(ENV_POLL_INTERVAL_MS, |s| s.parse::<u64>())? {
            monitor.poll_interval = Duration::from_millis(ms);
        }
        if let Some(n) = vars.parse_with(ENV_FETCH_RETRY_MAX_ATTEMPTS, parse_positive)? {
            monitor.fetch_retry.max_attempts = n;
        }
        if let Some(ms) = vars.parse_with(ENV_FETCH_RETRY_BASE_DELAY_MS, |s| s.parse::<u64>())? {
            monitor.fetch_retry.base_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = vars.parse_with(ENV_FETCH_RETRY_JITTER_MS, |s| s.parse::<u64>())? {
            monitor.fetch_retry.jitter = Duration::from_millis(ms);
        }
        monitor.max_handshake_attempts =
            vars.parse_with(ENV_MAX_HANDSHAKE_ATTEMPTS, parse_positive)?;
        monitor.handshake_policy = HandshakePolicy {
            connection_fee_tinybars: vars.parse_with(ENV_CONNECTION_FEE_HBAR, hbar_to_tinybars)?,
            welcome_message: vars.get(ENV_WELCOME_MESSAGE).map(str::to_string),
        };

        let llm = vars.get(ENV_OPENAI_API_KEY).map(|key| {
            let mut llm = LlmConfig::new(key);
            if let Some(model) = vars.get(ENV_OPENAI_MODEL) {
                llm = llm.with_model(model);
            }
            if let Some(base_url) = vars.get(ENV_OPENAI_BASE_URL) {
                llm = llm.with_base_url(base_url);
            }
            llm
        });

        let server_addr = vars
            .parse_with(ENV_SERVER_ADDR, |s| s.parse::<SocketAddr>())?
            .unwrap_or(DEFAULT_SERVER_ADDR);

        Ok(Self {
            network,
            operator,
            mirror_node_url,
            inbound_topic,
            monitor,
            llm,
            server_addr,
        })
    }

    /// The inbound topic to monitor
    pub fn require_inbound_topic(&self) -> Result<TopicId, ConfigError> {
        self.inbound_topic
            .ok_or(ConfigError::Missing(ENV_INBOUND_TOPIC_ID))
    }
}

struct Vars(HashMap<String, String>);

impl Vars {
    /// Non-empty, trimmed value
    fn get(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    fn parse_with<T, E, F>(&self, key: &'static str, parse: F) -> Result<Option<T>, ConfigError>
    where
        F: FnOnce(&str) -> Result<T, E>,
        E: fmt::Display,
    {
        match self.get(key) {
            Some(raw) => parse(raw).map(Some).map_err(|e| ConfigError::Invalid {
                var: key,
                value: raw.to_string(),
                reason: e.to_string(),
            }),
            None => Ok(None),
        }
    }
}

fn parse_positive(raw: &str) -> Result<u32, String> {
    match raw.parse::<u32>() {
        Ok(0) => Err("must be at least 1".to_string()),
        Ok(n) => Ok(n),
        Err(e) => Err(e.to_string()),
    }
}

fn hbar_to_tinybars(raw: &str) -> Result<u64, String> {
    let hbar = raw.parse::<f64>().map_err(|e| e.to_string())?;
    if !hbar.is_finite() || hbar < 0.0 {
        return Err("must be a non-negative amount".to_string());
    }
    Ok((hbar * TINYBARS_PER_HBAR).round() as u64)
}

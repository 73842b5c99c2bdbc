//! API models and server state

use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

use hcs_agent_core::{
    ConnectionMonitor, EventStore, FeedReader, HandshakeInvoker, HcsError, MonitorConfig,
    MonitorHandle, MonitorStatus, TopicId,
};

use serde::{Deserialize, Serialize};

/// Request to start monitoring an inbound topic
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartMonitorRequest {
    /// Inbound topic to watch for connection requests
    pub topic_id: TopicId,
}

/// Response for listing monitors
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListMonitorsResponse {
    pub monitors: Vec<MonitorStatus>,
    pub total: usize,
}

/// Error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error message
    pub error: String,

    /// Optional details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl From<RegistryError> for ErrorResponse {
    fn from(err: RegistryError) -> Self {
        ErrorResponse {
            error: err.to_string(),
            details: None,
        }
    }
}

/// Monitor registry errors
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("A monitor is already running for topic {0}")]
    AlreadyRunning(TopicId),

    #[error("No monitor for topic {0}")]
    NotFound(TopicId),

    #[error(transparent)]
    Monitor(#[from] HcsError),
}

/// Running monitors keyed by inbound topic
#[derive(Clone, Default)]
pub struct MonitorRegistry {
    monitors: Arc<RwLock<HashMap<TopicId, MonitorHandle>>>,
}

impl MonitorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a monitor for `topic` unless one is already running
    pub async fn start(
        &self,
        topic: TopicId,
        feed: Arc<dyn FeedReader>,
        invoker: Arc<dyn HandshakeInvoker>,
        config: &MonitorConfig,
    ) -> Result<MonitorStatus, RegistryError> {
        let mut monitors = self.monitors.write().await;
        if monitors.contains_key(&topic) {
            return Err(RegistryError::AlreadyRunning(topic));
        }

        let handle = ConnectionMonitor::new(topic, feed, invoker, config).spawn();
        let status = handle.status();
        monitors.insert(topic, handle);

        tracing::info!(%topic, "Monitor started");
        Ok(status)
    }

    /// Latest status of the monitor for `topic`
    pub async fn status(&self, topic: &TopicId) -> Option<MonitorStatus> {
        self.monitors.read().await.get(topic).map(|h| h.status())
    }

    /// Event store of the monitor for `topic`
    pub async fn events(&self, topic: &TopicId) -> Option<EventStore> {
        self.monitors.read().await.get(topic).map(|h| h.events().clone())
    }

    /// Status of every monitor, ordered by topic
    pub async fn list(&self) -> Vec<MonitorStatus> {
        let monitors = self.monitors.read().await;
        let mut statuses: Vec<MonitorStatus> = monitors.values().map(|h| h.status()).collect();
        statuses.sort_by_key(|s| s.topic_id);
        statuses
    }

    pub async fn len(&self) -> usize {
        self.monitors.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.monitors.read().await.is_empty()
    }

    /// Stop the monitor for `topic` and return its final status
    pub async fn stop(&self, topic: &TopicId) -> Result<MonitorStatus, RegistryError> {
        let handle = self
            .monitors
            .write()
            .await
            .remove(topic)
            .ok_or(RegistryError::NotFound(*topic))?;

        let monitor = handle.stop().await?;
        tracing::info!(%topic, watermark = monitor.watermark(), "Monitor stopped");
        Ok(monitor.status())
    }

    /// Stop every monitor; failures are logged
    pub async fn stop_all(&self) {
        let handles: Vec<MonitorHandle> = self
            .monitors
            .write()
            .await
            .drain()
            .map(|(_, handle)| handle)
            .collect();

        for handle in handles {
            let topic = *handle.topic();
            if let Err(e) = handle.stop().await {
                tracing::warn!(%topic, "Monitor did not stop cleanly: {}", e);
            }
        }
    }
}

/// Server state
///
/// Shared state across all HTTP handlers. Every monitor started through the
/// API reads from `feed` and accepts through `invoker`.
#[derive(Clone)]
pub struct ServerState {
    pub registry: MonitorRegistry,
    pub feed: Arc<dyn FeedReader>,
    pub invoker: Arc<dyn HandshakeInvoker>,
    pub config: Arc<MonitorConfig>,
}

impl ServerState {
    pub fn new(
        feed: Arc<dyn FeedReader>,
        invoker: Arc<dyn HandshakeInvoker>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            registry: MonitorRegistry::new(),
            feed,
            invoker,
            config: Arc::new(config),
        }
    }

    /// Start a monitor for `topic` with the shared feed and invoker
    pub async fn start_monitor(&self, topic: TopicId) -> Result<MonitorStatus, RegistryError> {
        self.registry
            .start(topic, self.feed.clone(), self.invoker.clone(), &self.config)
            .await
    }
}

//! Mirror node feed reader
//!
//! Reads topic messages through the mirror node REST API
//! (`/api/v1/topics/{id}/messages`), following `links.next` pagination.
//! Topics are append-only, so already-fetched entries are cached and each
//! fetch only asks for messages after the highest cached sequence number.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::feed::{FeedError, FeedReader, LogEntry};
use crate::ids::TopicId;

/// Default number of messages requested per page
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Upper bound on pages followed in one fetch; the rest arrives next poll
const MAX_PAGES_PER_FETCH: usize = 50;

#[derive(Debug, Deserialize)]
struct MessagesPage {
    #[serde(default)]
    messages: Vec<MirrorMessage>,
    #[serde(default)]
    links: Option<Links>,
}

#[derive(Debug, Deserialize)]
struct MirrorMessage {
    consensus_timestamp: String,
    message: String,
    sequence_number: u64,
}

#[derive(Debug, Deserialize)]
struct Links {
    next: Option<String>,
}

/// Feed reader backed by a mirror node
#[derive(Debug)]
pub struct MirrorNodeFeed {
    client: reqwest::Client,
    base_url: String,
    page_size: u32,
    cache: Mutex<HashMap<TopicId, Vec<LogEntry>>>,
}

impl MirrorNodeFeed {
    /// Create a reader for the mirror node at `base_url`
    /// (e.g. `https://testnet.mirrornode.hedera.com`)
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    /// Create a reader with a preconfigured HTTP client (timeouts, proxies)
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Set the page size
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Base URL of the mirror node
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn first_page_url(&self, topic: &TopicId, after: u64) -> String {
        format!(
            "{}/api/v1/topics/{}/messages?limit={}&order=asc&sequencenumber=gt:{}",
            self.base_url, topic, self.page_size, after
        )
    }

    fn resolve_link(&self, next: &str) -> String {
        if next.starts_with("http://") || next.starts_with("https://") {
            next.to_string()
        } else {
            format!("{}{}", self.base_url, next)
        }
    }

    async fn get_page(&self, topic: &TopicId, url: &str) -> Result<MessagesPage, FeedError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FeedError::FeedUnavailable(format!("request to {} failed: {}", url, e)))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(FeedError::TopicNotFound(*topic));
        }
        if !status.is_success() {
            return Err(FeedError::FeedUnavailable(format!(
                "mirror node answered {} for {}",
                status, url
            )));
        }

        response
            .json::<MessagesPage>()
            .await
            .map_err(|e| FeedError::FeedUnavailable(format!("invalid mirror node response: {}", e)))
    }

    /// Fetch every message after `after`, page by page
    async fn fetch_after(&self, topic: &TopicId, after: u64) -> Result<Vec<LogEntry>, FeedError> {
        let mut url = self.first_page_url(topic, after);
        let mut fetched = Vec::new();

        for _ in 0..MAX_PAGES_PER_FETCH {
            let page = self.get_page(topic, &url).await?;
            fetched.extend(page.messages.into_iter().map(decode_message));

            match page.links.and_then(|links| links.next) {
                Some(next) => url = self.resolve_link(&next),
                None => break,
            }
        }

        Ok(fetched)
    }
}

#[async_trait]
impl FeedReader for MirrorNodeFeed {
    async fn fetch(&self, topic: &TopicId) -> Result<Vec<LogEntry>, FeedError> {
        let after = {
            let cache = self.cache.lock().await;
            cache
                .get(topic)
                .and_then(|entries| entries.last())
                .map(|e| e.sequence_number)
                .unwrap_or(0)
        };

        let fresh = self.fetch_after(topic, after).await?;
        tracing::debug!(
            topic = %topic,
            after,
            fetched = fresh.len(),
            "Fetched mirror node page(s)"
        );

        let mut cache = self.cache.lock().await;
        let entries = cache.entry(*topic).or_default();
        for entry in fresh {
            // Concurrent fetches of one topic may overlap.
            let last = entries.last().map(|e| e.sequence_number).unwrap_or(0);
            if entry.sequence_number > last {
                entries.push(entry);
            }
        }

        Ok(entries.clone())
    }

    fn name(&self) -> &str {
        "mirror-node"
    }
}

fn decode_message(message: MirrorMessage) -> LogEntry {
    let payload = match STANDARD.decode(message.message.as_bytes()) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) => {
            tracing::warn!(
                sequence_number = message.sequence_number,
                "Message is not valid base64: {}",
                e
            );
            message.message
        }
    };

    LogEntry::from_payload(
        message.sequence_number,
        payload,
        parse_consensus_timestamp(&message.consensus_timestamp).unwrap_or_default(),
    )
}

/// Parse a `seconds.nanoseconds` consensus timestamp
pub fn parse_consensus_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let (secs, nanos) = match raw.split_once('.') {
        Some((secs, nanos)) => (secs, nanos),
        None => (raw, "0"),
    };

    let secs = secs.parse::<i64>().ok()?;
    // Right-pad so "1.5" means half a second.
    let nanos = format!("{:0<9}", nanos);
    let nanos = nanos.get(..9)?.parse::<u32>().ok()?;

    DateTime::from_timestamp(secs, nanos)
}

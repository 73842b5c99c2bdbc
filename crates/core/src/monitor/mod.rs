//! Connection monitor
//!
//! `ConnectionMonitor` drives the reconciliation loop for one inbound topic:
//! poll the feed, fold confirmations into the processed set, reconcile new
//! requests against the watermark, and accept each new request through the
//! handshake invoker. The loop runs until its cancellation token fires.
//!
//! ```text
//! Idle -> Polling -> Processing -> Sleeping -> Polling -> ...
//!            \______(fetch failed)___/
//! any state -> Stopped (cancellation, observed between cycles and while sleeping)
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::MonitorConfig;
use crate::error::{HcsError, HcsResult};
use crate::events::{EventKind, EventStore, MonitorEvent};
use crate::feed::{FeedError, FeedReader};
use crate::handshake::{HandshakeInvoker, PendingRequest};
use crate::ids::TopicId;
use crate::ledger::ProcessedSet;
use crate::reconcile::reconcile;

/// Scheduler state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorState {
    Idle,
    Polling,
    Processing,
    Sleeping,
    Stopped,
}

impl fmt::Display for MonitorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MonitorState::Idle => "idle",
            MonitorState::Polling => "polling",
            MonitorState::Processing => "processing",
            MonitorState::Sleeping => "sleeping",
            MonitorState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Counters accumulated over the monitor's lifetime
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorStats {
    pub polls: u64,
    pub fetch_failures: u64,
    pub handshakes_completed: u64,
    pub handshakes_failed: u64,
    pub follow_ups_failed: u64,
    pub malformed_skipped: u64,
    pub dead_lettered: u64,
}

/// Point-in-time view of a monitor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorStatus {
    pub topic_id: TopicId,
    pub state: MonitorState,
    pub watermark: u64,
    /// Number of request ids in the processed set
    pub processed: usize,
    pub dead_letters: Vec<u64>,
    pub stats: MonitorStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_poll_at: Option<DateTime<Utc>>,
}

/// What a single poll did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollOutcome {
    /// Entries returned by the feed
    pub fetched: usize,
    /// Requests accepted during this poll
    pub invoked: Vec<u64>,
    /// Requests whose handshake failed during this poll
    pub failed: Vec<u64>,
    /// Requests above the watermark that were already handled
    pub skipped: Vec<u64>,
    /// Malformed entries reported for the first time
    pub malformed: Vec<u64>,
    /// Watermark after the poll
    pub watermark: u64,
}

/// Reconciliation loop for one inbound topic
pub struct ConnectionMonitor {
    topic: TopicId,
    feed: Arc<dyn FeedReader>,
    invoker: Arc<dyn HandshakeInvoker>,
    config: MonitorConfig,
    watermark: u64,
    processed: ProcessedSet,
    failures: HashMap<u64, u32>,
    dead_letters: BTreeSet<u64>,
    reported_malformed: BTreeSet<u64>,
    stats: MonitorStats,
    state: MonitorState,
    last_poll_at: Option<DateTime<Utc>>,
    status_tx: watch::Sender<MonitorStatus>,
    events: EventStore,
}

impl ConnectionMonitor {
    /// Create a monitor for `topic`
    ///
    /// # Arguments
    ///
    /// * `topic` - Inbound topic receiving connection requests
    /// * `feed` - Reader for that topic
    /// * `invoker` - Performs the accept for each new request
    /// * `config` - Poll interval, retry and dead-letter settings
    pub fn new(
        topic: TopicId,
        feed: Arc<dyn FeedReader>,
        invoker: Arc<dyn HandshakeInvoker>,
        config: &MonitorConfig,
    ) -> Self {
        let initial = MonitorStatus {
            topic_id: topic,
            state: MonitorState::Idle,
            watermark: 0,
            processed: 0,
            dead_letters: Vec::new(),
            stats: MonitorStats::default(),
            last_poll_at: None,
        };
        let (status_tx, _) = watch::channel(initial);

        Self {
            topic,
            feed,
            invoker,
            config: config.clone(),
            watermark: 0,
            processed: ProcessedSet::new(),
            failures: HashMap::new(),
            dead_letters: BTreeSet::new(),
            reported_malformed: BTreeSet::new(),
            stats: MonitorStats::default(),
            state: MonitorState::Idle,
            last_poll_at: None,
            status_tx,
            events: EventStore::with_capacity(config.event_capacity),
        }
    }

    pub fn topic(&self) -> &TopicId {
        &self.topic
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    pub fn watermark(&self) -> u64 {
        self.watermark
    }

    pub fn processed(&self) -> &ProcessedSet {
        &self.processed
    }

    pub fn stats(&self) -> &MonitorStats {
        &self.stats
    }

    /// Requests given up on after too many failed handshakes
    pub fn dead_letters(&self) -> impl Iterator<Item = u64> + '_ {
        self.dead_letters.iter().copied()
    }

    pub fn events(&self) -> &EventStore {
        &self.events
    }

    /// Current status snapshot
    pub fn status(&self) -> MonitorStatus {
        MonitorStatus {
            topic_id: self.topic,
            state: self.state,
            watermark: self.watermark,
            processed: self.processed.len(),
            dead_letters: self.dead_letters.iter().copied().collect(),
            stats: self.stats.clone(),
            last_poll_at: self.last_poll_at,
        }
    }

    /// Watch status changes
    pub fn subscribe_status(&self) -> watch::Receiver<MonitorStatus> {
        self.status_tx.subscribe()
    }

    fn publish_status(&self) {
        self.status_tx.send_replace(self.status());
    }

    async fn emit(&self, kind: EventKind) {
        self.events.push(MonitorEvent::new(self.topic, kind)).await;
    }

    fn set_state(&mut self, state: MonitorState) {
        if self.state == state {
            return;
        }
        tracing::trace!(
            topic = %self.topic,
            from = %self.state,
            to = %state,
            "Monitor state change"
        );
        self.state = state;
        self.publish_status();
        // Live subscribers only; the status watch holds the current state.
        let event = MonitorEvent::new(self.topic, EventKind::StateChanged { state });
        self.events.broadcast(event);
    }

    /// Run one poll: fetch, fold confirmations, reconcile, accept new requests
    ///
    /// A fetch failure (after the fetch retry policy is exhausted) is returned
    /// to the caller; handshake failures are recorded and never abort the batch.
    pub async fn poll_once(&mut self) -> Result<PollOutcome, FeedError> {
        self.set_state(MonitorState::Polling);

        let feed = self.feed.clone();
        let topic = self.topic;
        let fetched = self
            .config
            .fetch_retry
            .run_if(|| feed.fetch(&topic), FeedError::is_transient)
            .await;

        self.last_poll_at = Some(Utc::now());
        self.stats.polls += 1;

        let entries = match fetched {
            Ok(entries) => entries,
            Err(e) => {
                self.stats.fetch_failures += 1;
                tracing::warn!(
                    topic = %self.topic,
                    feed = self.feed.name(),
                    "Feed fetch failed: {}",
                    e
                );
                self.publish_status();
                self.emit(EventKind::FeedUnavailable {
                    reason: e.to_string(),
                })
                .await;
                return Err(e);
            }
        };

        self.set_state(MonitorState::Processing);

        let newly_confirmed = self.processed.mark_confirmed(&entries);
        if newly_confirmed > 0 {
            tracing::debug!(topic = %self.topic, newly_confirmed, "Folded confirmations");
        }

        let reconciliation = reconcile(&entries, self.watermark, &self.processed);
        for seq in &reconciliation.already_processed {
            self.failures.remove(seq);
        }
        let mut outcome = PollOutcome {
            fetched: entries.len(),
            skipped: reconciliation.already_processed.clone(),
            ..Default::default()
        };

        for (sequence_number, reason) in reconciliation.malformed {
            if !self.reported_malformed.insert(sequence_number) {
                continue;
            }
            tracing::warn!(
                topic = %self.topic,
                sequence_number,
                "Skipping malformed entry: {}",
                reason
            );
            self.stats.malformed_skipped += 1;
            outcome.malformed.push(sequence_number);
            self.emit(EventKind::MalformedEntry {
                sequence_number,
                reason,
            })
            .await;
        }

        // Lowest request that must be looked at again next poll
        let mut retry_from: Option<u64> = None;

        for entry in &reconciliation.pending {
            let seq = entry.sequence_number;

            // A confirmation or an earlier accept may have landed since reconciliation.
            if self.processed.contains(seq) {
                self.failures.remove(&seq);
                outcome.skipped.push(seq);
                continue;
            }
            if self.dead_letters.contains(&seq) {
                continue;
            }
            let Some(request) = PendingRequest::from_entry(entry) else {
                continue;
            };

            match self
                .invoker
                .accept(&self.topic, &request, &self.config.handshake_policy)
                .await
            {
                Ok(result) => {
                    // Mark before any follow-up so a crash there never re-accepts.
                    self.processed.add(seq);
                    self.failures.remove(&seq);
                    self.stats.handshakes_completed += 1;
                    outcome.invoked.push(seq);

                    tracing::info!(
                        topic = %self.topic,
                        request_id = seq,
                        requester = %request.requester(),
                        channel = %result.new_channel_id,
                        "Connection request accepted"
                    );
                    self.publish_status();
                    self.emit(EventKind::HandshakeCompleted {
                        request_id: seq,
                        requester: request.requester().to_string(),
                        channel_id: result.new_channel_id,
                    })
                    .await;

                    if let Some(text) = self.config.handshake_policy.welcome_message.clone() {
                        self.send_follow_up(&request, &result.new_channel_id, &text).await;
                    }
                }
                Err(e) => {
                    let attempts = {
                        let count = self.failures.entry(seq).or_insert(0);
                        *count += 1;
                        *count
                    };
                    self.stats.handshakes_failed += 1;
                    outcome.failed.push(seq);

                    tracing::warn!(
                        topic = %self.topic,
                        request_id = seq,
                        attempts,
                        "Handshake failed: {}",
                        e
                    );
                    self.emit(EventKind::HandshakeFailed {
                        request_id: seq,
                        reason: e.to_string(),
                        attempts,
                    })
                    .await;

                    match self.config.max_handshake_attempts {
                        Some(max) if attempts >= max => {
                            self.dead_letters.insert(seq);
                            self.failures.remove(&seq);
                            self.stats.dead_lettered += 1;
                            tracing::error!(
                                topic = %self.topic,
                                request_id = seq,
                                attempts,
                                "Giving up on connection request"
                            );
                            self.emit(EventKind::DeadLettered {
                                request_id: seq,
                                attempts,
                            })
                            .await;
                        }
                        _ => {
                            retry_from = Some(retry_from.map_or(seq, |lowest| lowest.min(seq)));
                        }
                    }
                }
            }
        }

        self.watermark = match retry_from {
            Some(seq) => reconciliation
                .watermark
                .min(seq.saturating_sub(1))
                .max(self.watermark),
            None => reconciliation.watermark,
        };
        outcome.watermark = self.watermark;

        self.publish_status();
        Ok(outcome)
    }

    async fn send_follow_up(&mut self, request: &PendingRequest, channel: &TopicId, text: &str) {
        let invoker = self.invoker.clone();
        let sent = self
            .config
            .follow_up_retry
            .run(|| invoker.send_follow_up(channel, request, text))
            .await;

        if let Err(e) = sent {
            self.stats.follow_ups_failed += 1;
            tracing::warn!(
                topic = %self.topic,
                request_id = request.sequence_number,
                channel = %channel,
                "Follow-up message failed: {}",
                e
            );
            self.emit(EventKind::FollowUpFailed {
                request_id: request.sequence_number,
                channel_id: *channel,
                reason: e.to_string(),
            })
            .await;
        }
    }

    /// Poll until `cancel` fires
    ///
    /// Cancellation is checked between cycles and during the inter-poll
    /// sleep; an in-flight fetch or accept always runs to completion.
    pub async fn run(&mut self, cancel: CancellationToken) {
        tracing::info!(
            topic = %self.topic,
            feed = self.feed.name(),
            invoker = self.invoker.name(),
            interval_ms = self.config.poll_interval.as_millis() as u64,
            "Connection monitor started"
        );

        while !cancel.is_cancelled() {
            match self.poll_once().await {
                Ok(outcome) if !outcome.invoked.is_empty() || !outcome.failed.is_empty() => {
                    tracing::debug!(
                        topic = %self.topic,
                        invoked = outcome.invoked.len(),
                        failed = outcome.failed.len(),
                        watermark = outcome.watermark,
                        "Poll complete"
                    );
                }
                // Fetch failures were already logged and are never fatal.
                Ok(_) | Err(_) => {}
            }

            self.set_state(MonitorState::Sleeping);
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }

        self.set_state(MonitorState::Stopped);
        tracing::info!(
            topic = %self.topic,
            watermark = self.watermark,
            processed = self.processed.len(),
            "Connection monitor stopped"
        );
    }

    /// Run on a background task
    pub fn spawn(mut self) -> MonitorHandle {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let topic = self.topic;
        let status = self.status_tx.subscribe();
        let events = self.events.clone();

        let task = tokio::spawn(async move {
            self.run(token).await;
            self
        });

        MonitorHandle {
            topic,
            cancel,
            status,
            events,
            task,
        }
    }
}

/// Handle to a monitor running on a background task
pub struct MonitorHandle {
    topic: TopicId,
    cancel: CancellationToken,
    status: watch::Receiver<MonitorStatus>,
    events: EventStore,
    task: JoinHandle<ConnectionMonitor>,
}

impl MonitorHandle {
    pub fn topic(&self) -> &TopicId {
        &self.topic
    }

    /// Latest published status
    pub fn status(&self) -> MonitorStatus {
        self.status.borrow().clone()
    }

    /// Watch status changes
    pub fn subscribe_status(&self) -> watch::Receiver<MonitorStatus> {
        self.status.clone()
    }

    pub fn events(&self) -> &EventStore {
        &self.events
    }

    /// Token that stops the monitor when cancelled
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Request a stop and wait for the loop to exit
    ///
    /// Returns the stopped monitor so its final state can be inspected.
    pub async fn stop(self) -> HcsResult<ConnectionMonitor> {
        self.cancel.cancel();
        self.task
            .await
            .map_err(|e| HcsError::TaskFailed(e.to_string()))
    }
}

#[cfg(test)]
mod tests;

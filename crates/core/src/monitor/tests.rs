//! Unit tests for the connection monitor

use super::*;
use crate::feed::{Hcs10Message, InMemoryFeed, LogEntry, OperatorId};
use crate::handshake::{HandshakeError, HandshakePolicy, HandshakeResult};
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use futures_util::StreamExt;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

const INBOUND: TopicId = TopicId::new(0, 0, 500);

/// Feed returning a scripted snapshot per poll; the last one repeats
struct ScriptedFeed {
    polls: Mutex<VecDeque<Result<Vec<LogEntry>, FeedError>>>,
    last: Mutex<Vec<LogEntry>>,
}

impl ScriptedFeed {
    fn new(polls: Vec<Result<Vec<LogEntry>, FeedError>>) -> Arc<Self> {
        Arc::new(Self {
            polls: Mutex::new(polls.into()),
            last: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl FeedReader for ScriptedFeed {
    async fn fetch(&self, _topic: &TopicId) -> Result<Vec<LogEntry>, FeedError> {
        let next = self.polls.lock().unwrap().pop_front();
        match next {
            Some(Ok(entries)) => {
                *self.last.lock().unwrap() = entries.clone();
                Ok(entries)
            }
            Some(Err(e)) => Err(e),
            None => Ok(self.last.lock().unwrap().clone()),
        }
    }
}

/// Invoker recording every call; can fail a request a given number of times
#[derive(Default)]
struct RecordingInvoker {
    accepted: Mutex<Vec<u64>>,
    failures: Mutex<HashMap<u64, u32>>,
    follow_ups: Mutex<Vec<(TopicId, String)>>,
    fail_follow_ups: bool,
}

impl RecordingInvoker {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn failing(seq: u64, times: u32) -> Arc<Self> {
        let invoker = Self::default();
        invoker.failures.lock().unwrap().insert(seq, times);
        Arc::new(invoker)
    }

    fn calls(&self) -> Vec<u64> {
        self.accepted.lock().unwrap().clone()
    }
}

#[async_trait]
impl HandshakeInvoker for RecordingInvoker {
    async fn accept(
        &self,
        _inbound_topic: &TopicId,
        request: &PendingRequest,
        _policy: &HandshakePolicy,
    ) -> Result<HandshakeResult, HandshakeError> {
        let seq = request.sequence_number;
        self.accepted.lock().unwrap().push(seq);

        let mut failures = self.failures.lock().unwrap();
        if let Some(remaining) = failures.get_mut(&seq) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(HandshakeError::HandshakeFailed("insufficient funds".to_string()));
            }
        }

        Ok(HandshakeResult {
            new_channel_id: TopicId::new(0, 0, 9000 + seq),
        })
    }

    async fn send_follow_up(
        &self,
        channel: &TopicId,
        _request: &PendingRequest,
        text: &str,
    ) -> Result<(), HandshakeError> {
        if self.fail_follow_ups {
            return Err(HandshakeError::HandshakeFailed("channel not ready".to_string()));
        }
        self.follow_ups.lock().unwrap().push((*channel, text.to_string()));
        Ok(())
    }
}

fn request(seq: u64, origin: u64) -> LogEntry {
    let requester = OperatorId {
        inbound_topic: TopicId::new(0, 0, origin),
        account: crate::ids::AccountId::new(0, 0, origin + 1),
    };
    LogEntry::from_payload(
        seq,
        Hcs10Message::connection_request(&requester, None).to_payload(),
        Utc::now(),
    )
}

fn confirmation(seq: u64, request_id: u64) -> LogEntry {
    LogEntry::from_payload(
        seq,
        format!(
            r#"{{"p":"hcs-10","op":"connection_created","connection_id":{},"connection_topic_id":"0.0.7777"}}"#,
            request_id
        ),
        Utc::now(),
    )
}

fn config() -> MonitorConfig {
    MonitorConfig::default()
        .with_poll_interval(Duration::from_millis(10))
        .with_fetch_retry(RetryPolicy::no_retry())
        .with_follow_up_retry(RetryPolicy::no_retry())
}

fn monitor(feed: Arc<dyn FeedReader>, invoker: Arc<dyn HandshakeInvoker>) -> ConnectionMonitor {
    ConnectionMonitor::new(INBOUND, feed, invoker, &config())
}

#[tokio::test]
async fn test_same_request_in_two_polls_is_accepted_once() {
    let feed = ScriptedFeed::new(vec![Ok(vec![request(1, 10)]), Ok(vec![request(1, 10)])]);
    let invoker = RecordingInvoker::new();
    let mut monitor = monitor(feed, invoker.clone());

    monitor.poll_once().await.unwrap();
    monitor.poll_once().await.unwrap();

    assert_eq!(invoker.calls(), vec![1]);
    assert!(monitor.processed().contains(1));
}

#[tokio::test]
async fn test_watermark_progression() {
    let feed = ScriptedFeed::new(vec![
        Ok(vec![request(1, 10), request(2, 20)]),
        Ok(vec![request(1, 10), request(2, 20), request(3, 30)]),
    ]);
    let invoker = RecordingInvoker::new();
    let mut monitor = monitor(feed, invoker.clone());
    assert_eq!(monitor.watermark(), 0);

    let first = monitor.poll_once().await.unwrap();
    assert_eq!(first.invoked, vec![1, 2]);
    assert_eq!(monitor.watermark(), 2);

    let second = monitor.poll_once().await.unwrap();
    assert_eq!(second.invoked, vec![3]);
    assert_eq!(monitor.watermark(), 3);

    assert_eq!(invoker.calls(), vec![1, 2, 3]);
}

#[tokio::test]
async fn test_foreign_confirmation_suppresses_handshake() {
    // Request 5 was confirmed by another instance of this agent.
    let feed = ScriptedFeed::new(vec![Ok(vec![request(5, 10), confirmation(6, 5)])]);
    let invoker = RecordingInvoker::new();
    let mut monitor = monitor(feed, invoker.clone());

    let outcome = monitor.poll_once().await.unwrap();

    assert!(invoker.calls().is_empty());
    assert!(monitor.processed().contains(5));
    assert_eq!(outcome.skipped, vec![5]);
}

#[tokio::test]
async fn test_failed_handshake_is_retried_next_poll() {
    let feed = ScriptedFeed::new(vec![Ok(vec![request(7, 10)]), Ok(vec![request(7, 10)])]);
    let invoker = RecordingInvoker::failing(7, 1);
    let mut monitor = monitor(feed, invoker.clone());

    let first = monitor.poll_once().await.unwrap();
    assert_eq!(first.failed, vec![7]);
    assert!(!monitor.processed().contains(7));
    assert!(monitor.watermark() < 7);

    let second = monitor.poll_once().await.unwrap();
    assert_eq!(second.invoked, vec![7]);
    assert_eq!(invoker.calls(), vec![7, 7]);
    assert_eq!(monitor.watermark(), 7);
    assert_eq!(monitor.stats().handshakes_failed, 1);
}

#[tokio::test]
async fn test_failure_does_not_abort_batch_or_replay_successes() {
    let entries = vec![request(1, 10), request(2, 20), request(3, 30)];
    let feed = ScriptedFeed::new(vec![Ok(entries.clone()), Ok(entries)]);
    let invoker = RecordingInvoker::failing(2, 1);
    let mut monitor = monitor(feed, invoker.clone());

    let first = monitor.poll_once().await.unwrap();
    assert_eq!(first.invoked, vec![1, 3]);
    assert_eq!(first.failed, vec![2]);
    assert_eq!(monitor.watermark(), 1);

    let second = monitor.poll_once().await.unwrap();
    assert_eq!(second.invoked, vec![2]);
    assert_eq!(second.skipped, vec![3]);
    assert_eq!(invoker.calls(), vec![1, 2, 3, 2]);
    assert_eq!(monitor.watermark(), 3);
}

#[tokio::test]
async fn test_empty_feed_is_noop() {
    let feed = ScriptedFeed::new(vec![Ok(vec![])]);
    let invoker = RecordingInvoker::new();
    let mut monitor = monitor(feed, invoker.clone());

    let outcome = monitor.poll_once().await.unwrap();

    assert_eq!(outcome, PollOutcome::default());
    assert_eq!(monitor.watermark(), 0);
    assert!(monitor.processed().is_empty());
    assert!(invoker.calls().is_empty());
}

#[tokio::test]
async fn test_end_to_end_request_then_confirmation() {
    let feed = ScriptedFeed::new(vec![
        Ok(vec![request(1, 10)]),
        Ok(vec![request(1, 10), confirmation(2, 1)]),
    ]);
    let invoker = RecordingInvoker::new();
    let mut monitor = monitor(feed, invoker.clone());

    let first = monitor.poll_once().await.unwrap();
    assert_eq!(first.invoked, vec![1]);

    monitor.poll_once().await.unwrap();

    assert_eq!(invoker.calls(), vec![1]);
    assert_eq!(monitor.watermark(), 2);
    assert_eq!(monitor.status().processed, 1);
}

#[tokio::test]
async fn test_fetch_failure_is_reported_and_not_fatal() {
    let feed = ScriptedFeed::new(vec![
        Err(FeedError::FeedUnavailable("connection refused".to_string())),
        Ok(vec![request(1, 10)]),
    ]);
    let invoker = RecordingInvoker::new();
    let mut monitor = monitor(feed, invoker.clone());

    let err = monitor.poll_once().await.unwrap_err();
    assert!(matches!(err, FeedError::FeedUnavailable(_)));
    assert_eq!(monitor.stats().fetch_failures, 1);
    assert_eq!(monitor.state(), MonitorState::Polling);

    monitor.poll_once().await.unwrap();
    assert_eq!(invoker.calls(), vec![1]);

    let events = monitor.events().events().await;
    assert!(
        events
            .iter()
            .any(|e| matches!(e.kind, EventKind::FeedUnavailable { .. }))
    );
}

#[tokio::test]
async fn test_fetch_retry_policy_absorbs_transient_outage() {
    let feed = Arc::new(InMemoryFeed::new());
    feed.ensure_topic(INBOUND).await;
    feed.append(&INBOUND, request(1, 10).payload).await.unwrap();
    feed.fail_next_fetches(1);

    let config = config().with_fetch_retry(RetryPolicy::new(2, Duration::ZERO));
    let invoker = RecordingInvoker::new();
    let mut monitor = ConnectionMonitor::new(INBOUND, feed.clone(), invoker.clone(), &config);

    let outcome = monitor.poll_once().await.unwrap();
    assert_eq!(outcome.invoked, vec![1]);
    assert_eq!(feed.fetch_count(), 2);
    assert_eq!(monitor.stats().fetch_failures, 0);
}

#[tokio::test]
async fn test_missing_topic_is_not_retried() {
    let feed = Arc::new(InMemoryFeed::new());
    let config = config().with_fetch_retry(RetryPolicy::new(3, Duration::ZERO));
    let mut monitor =
        ConnectionMonitor::new(INBOUND, feed.clone(), RecordingInvoker::new(), &config);

    let err = monitor.poll_once().await.unwrap_err();
    assert!(matches!(err, FeedError::TopicNotFound(_)));
    assert_eq!(feed.fetch_count(), 1);
}

#[tokio::test]
async fn test_dead_letter_after_max_attempts() {
    let feed = ScriptedFeed::new(vec![Ok(vec![request(4, 10), request(5, 20)])]);
    let invoker = RecordingInvoker::failing(4, u32::MAX);
    let config = config().with_max_handshake_attempts(2);
    let mut monitor = ConnectionMonitor::new(INBOUND, feed, invoker.clone(), &config);

    monitor.poll_once().await.unwrap();
    assert_eq!(monitor.watermark(), 3);

    monitor.poll_once().await.unwrap();
    assert_eq!(monitor.dead_letters().collect::<Vec<_>>(), vec![4]);
    assert_eq!(monitor.watermark(), 5);

    monitor.poll_once().await.unwrap();
    assert_eq!(invoker.calls(), vec![4, 5, 4]);
    assert!(!monitor.processed().contains(4));
    assert_eq!(monitor.stats().dead_lettered, 1);
}

#[tokio::test]
async fn test_unbounded_retries_by_default() {
    let feed = ScriptedFeed::new(vec![Ok(vec![request(4, 10)])]);
    let invoker = RecordingInvoker::failing(4, u32::MAX);
    let mut monitor = monitor(feed, invoker.clone());

    for _ in 0..5 {
        monitor.poll_once().await.unwrap();
    }

    assert_eq!(invoker.calls().len(), 5);
    assert_eq!(monitor.dead_letters().count(), 0);
}

#[tokio::test]
async fn test_welcome_follow_up_is_sent_on_new_channel() {
    let feed = ScriptedFeed::new(vec![Ok(vec![request(3, 10)])]);
    let invoker = RecordingInvoker::new();
    let config = config().with_handshake_policy(HandshakePolicy {
        connection_fee_tinybars: None,
        welcome_message: Some("welcome aboard".to_string()),
    });
    let mut monitor = ConnectionMonitor::new(INBOUND, feed, invoker.clone(), &config);

    monitor.poll_once().await.unwrap();

    let follow_ups = invoker.follow_ups.lock().unwrap().clone();
    assert_eq!(follow_ups, vec![(TopicId::new(0, 0, 9003), "welcome aboard".to_string())]);
}

#[tokio::test]
async fn test_failed_follow_up_keeps_request_processed() {
    let feed = ScriptedFeed::new(vec![Ok(vec![request(3, 10)])]);
    let invoker = Arc::new(RecordingInvoker {
        fail_follow_ups: true,
        ..Default::default()
    });
    let config = config().with_handshake_policy(HandshakePolicy {
        connection_fee_tinybars: None,
        welcome_message: Some("hi".to_string()),
    });
    let mut monitor = ConnectionMonitor::new(INBOUND, feed, invoker.clone(), &config);

    monitor.poll_once().await.unwrap();
    monitor.poll_once().await.unwrap();

    assert!(monitor.processed().contains(3));
    assert_eq!(invoker.calls(), vec![3]);
    assert_eq!(monitor.stats().follow_ups_failed, 1);
}

#[tokio::test]
async fn test_malformed_entries_warned_once() {
    let broken = LogEntry::from_payload(
        1,
        r#"{"p":"hcs-10","op":"connection_request","m":"no identity"}"#,
        Utc::now(),
    );
    let feed = ScriptedFeed::new(vec![Ok(vec![broken.clone(), request(2, 10)])]);
    let invoker = RecordingInvoker::new();
    let mut monitor = monitor(feed, invoker.clone());

    let first = monitor.poll_once().await.unwrap();
    assert_eq!(first.malformed, vec![1]);
    assert_eq!(first.invoked, vec![2]);

    let second = monitor.poll_once().await.unwrap();
    assert!(second.malformed.is_empty());
    assert_eq!(monitor.stats().malformed_skipped, 1);
    assert_eq!(invoker.calls(), vec![2]);
}

#[tokio::test]
async fn test_state_transitions_within_a_poll() {
    let feed = ScriptedFeed::new(vec![Ok(vec![request(1, 10)])]);
    let mut monitor = monitor(feed, RecordingInvoker::new());
    let mut live = monitor.events().subscribe();
    assert_eq!(monitor.state(), MonitorState::Idle);

    monitor.poll_once().await.unwrap();
    assert_eq!(monitor.state(), MonitorState::Processing);

    let mut states = Vec::new();
    while states.len() < 2 {
        if let EventKind::StateChanged { state } = live.next().await.unwrap().kind {
            states.push(state);
        }
    }
    assert_eq!(states, vec![MonitorState::Polling, MonitorState::Processing]);
}

#[tokio::test]
async fn test_idle_polls_do_not_grow_history() {
    let feed = ScriptedFeed::new(vec![Ok(vec![request(1, 10)])]);
    let mut monitor = monitor(feed, RecordingInvoker::new());

    monitor.poll_once().await.unwrap();
    let retained = monitor.events().len().await;
    assert_eq!(retained, 1);

    for _ in 0..20 {
        monitor.poll_once().await.unwrap();
    }
    assert_eq!(monitor.events().len().await, retained);
    assert!(
        monitor
            .events()
            .events()
            .await
            .iter()
            .all(|e| !matches!(e.kind, EventKind::StateChanged { .. }))
    );
}

#[tokio::test]
async fn test_confirmation_clears_failure_count() {
    let feed = ScriptedFeed::new(vec![
        Ok(vec![request(1, 10)]),
        Ok(vec![request(1, 10), confirmation(2, 1)]),
    ]);
    let invoker = RecordingInvoker::failing(1, 1);
    let mut monitor = monitor(feed, invoker.clone());

    let first = monitor.poll_once().await.unwrap();
    assert_eq!(first.failed, vec![1]);
    assert_eq!(monitor.failures.get(&1), Some(&1));

    // Confirmed elsewhere before the retry came around.
    let second = monitor.poll_once().await.unwrap();
    assert!(second.invoked.is_empty());
    assert!(monitor.processed().contains(1));
    assert!(monitor.failures.is_empty());
    assert_eq!(invoker.calls(), vec![1]);
}

#[tokio::test(start_paused = true)]
async fn test_spawned_monitor_survives_fetch_failure() {
    let feed = ScriptedFeed::new(vec![
        Err(FeedError::FeedUnavailable("mirror node down".to_string())),
        Ok(vec![request(1, 10)]),
    ]);
    let invoker = RecordingInvoker::new();

    let handle = ConnectionMonitor::new(INBOUND, feed, invoker.clone(), &config()).spawn();
    let mut status = handle.subscribe_status();

    let mut slept_after_failure = false;
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            {
                let current = status.borrow_and_update();
                if current.state == MonitorState::Sleeping
                    && current.stats.fetch_failures == 1
                    && current.processed == 0
                {
                    slept_after_failure = true;
                }
                if current.processed >= 1 {
                    break;
                }
            }
            status.changed().await.unwrap();
        }
    })
    .await
    .expect("request was not accepted after the outage");

    let monitor = handle.stop().await.unwrap();
    assert!(slept_after_failure);
    assert_eq!(monitor.stats().fetch_failures, 1);
    assert_eq!(invoker.calls(), vec![1]);
    assert_eq!(monitor.state(), MonitorState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_spawned_monitor_runs_until_stopped() {
    let feed = Arc::new(InMemoryFeed::new());
    feed.ensure_topic(INBOUND).await;
    let invoker = RecordingInvoker::new();

    let handle = ConnectionMonitor::new(INBOUND, feed.clone(), invoker.clone(), &config()).spawn();
    let mut status = handle.subscribe_status();

    feed.append(&INBOUND, request(1, 10).payload).await.unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        while status.borrow_and_update().processed < 1 {
            status.changed().await.unwrap();
        }
    })
    .await
    .expect("request was not accepted in time");

    let monitor = handle.stop().await.unwrap();
    assert_eq!(monitor.state(), MonitorState::Stopped);
    assert_eq!(invoker.calls(), vec![1]);
    assert!(monitor.stats().polls >= 1);
}

#[tokio::test(start_paused = true)]
async fn test_subscription_before_spawn_sees_first_poll() {
    let feed = ScriptedFeed::new(vec![Ok(vec![request(1, 10)])]);
    let monitor = monitor(feed, RecordingInvoker::new());
    let mut events = monitor.events().subscribe();
    let handle = monitor.spawn();

    let accepted = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = events.next().await.unwrap();
            if let EventKind::HandshakeCompleted { request_id, .. } = event.kind {
                return request_id;
            }
        }
    })
    .await
    .expect("first accept was not delivered");
    assert_eq!(accepted, 1);

    handle.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_before_start_stops_immediately() {
    let feed = ScriptedFeed::new(vec![Ok(vec![request(1, 10)])]);
    let invoker = RecordingInvoker::new();
    let mut monitor = monitor(feed, invoker.clone());

    let cancel = CancellationToken::new();
    cancel.cancel();
    monitor.run(cancel).await;

    assert_eq!(monitor.state(), MonitorState::Stopped);
    assert!(invoker.calls().is_empty());
}

#[tokio::test]
async fn test_status_serialization() {
    let feed = ScriptedFeed::new(vec![Ok(vec![])]);
    let monitor = monitor(feed, RecordingInvoker::new());

    let json = serde_json::to_value(monitor.status()).unwrap();
    assert_eq!(json["state"], "idle");
    assert_eq!(json["topic_id"], "0.0.500");
    assert!(json.get("last_poll_at").is_none());
}

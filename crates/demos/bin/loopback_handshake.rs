//! End-to-end connection handshake against an in-memory topic store
//!
//! Walks through the reconciliation loop one poll at a time: a request is
//! accepted once, its confirmation is recognised on the next poll, and a
//! failed accept is retried.

use anyhow::ensure;
use std::sync::Arc;
use std::time::Duration;

use hcs_agent_core::{
    AccountId, ConnectionMonitor, HandshakePolicy, InMemoryFeed, MonitorConfig, PollOutcome,
};
use hcs_agent_demos::{LoopbackHandshake, LoopbackPeer, init_tracing};

fn report(poll: usize, outcome: &PollOutcome) {
    println!(
        "poll {}: fetched {} | invoked {:?} | failed {:?} | skipped {:?} | watermark {}",
        poll, outcome.fetched, outcome.invoked, outcome.failed, outcome.skipped, outcome.watermark
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing("warn");

    let feed = Arc::new(InMemoryFeed::new());

    let agent = LoopbackPeer::register(feed.clone(), AccountId::new(0, 0, 1001)).await;
    let handshake = Arc::new(LoopbackHandshake::new(feed.clone(), AccountId::new(0, 0, 1001)));
    let config = MonitorConfig::default().with_handshake_policy(HandshakePolicy {
        connection_fee_tinybars: None,
        welcome_message: Some("Welcome! This connection was accepted automatically.".to_string()),
    });
    let mut monitor =
        ConnectionMonitor::new(agent.inbound_topic(), feed.clone(), handshake.clone(), &config);

    println!("Agent {} listening on {}", agent.operator(), agent.inbound_topic());

    // A request arrives and is accepted
    let bob = LoopbackPeer::register(feed.clone(), AccountId::new(0, 0, 2002)).await;
    let request_id = bob
        .request_connection(&agent.inbound_topic(), Some("Hi, I'm Bob"))
        .await?;
    println!("\nBob sent request #{}", request_id);

    let first = monitor.poll_once().await?;
    report(1, &first);
    ensure!(first.invoked == vec![request_id], "request should be accepted once");

    // The confirmation written by the accept is seen on the next poll
    let second = monitor.poll_once().await?;
    report(2, &second);
    ensure!(second.invoked.is_empty(), "request must not be accepted twice");
    ensure!(second.watermark == 2, "watermark should cover the confirmation");

    let connection = bob
        .await_confirmation(
            &agent.inbound_topic(),
            request_id,
            Duration::from_secs(1),
            Duration::from_millis(10),
        )
        .await
        .ok_or_else(|| anyhow::anyhow!("Bob never saw a confirmation"))?;
    println!("Bob is connected on {}", connection.channel);
    for message in bob.read_new(&connection.channel).await {
        println!("  [{}] {}", message.sequence_number, message.text);
    }

    // A failed accept leaves the request eligible for the next poll
    let carol = LoopbackPeer::register(feed.clone(), AccountId::new(0, 0, 3003)).await;
    let carol_request = carol.request_connection(&agent.inbound_topic(), None).await?;
    handshake.fail_next_accepts(1);
    println!("\nCarol sent request #{} (first accept will fail)", carol_request);

    let third = monitor.poll_once().await?;
    report(3, &third);
    ensure!(third.failed == vec![carol_request], "accept should have failed");

    let fourth = monitor.poll_once().await?;
    report(4, &fourth);
    ensure!(fourth.invoked == vec![carol_request], "failed request should be retried");

    println!("\n=== Connections ===");
    for c in handshake.connections().await {
        println!("#{} {} on {}", c.request_id, c.peer, c.channel);
    }

    let stats = monitor.stats();
    println!(
        "\nAccepted {} | failed {} | watermark {}",
        stats.handshakes_completed,
        stats.handshakes_failed,
        monitor.watermark()
    );

    Ok(())
}

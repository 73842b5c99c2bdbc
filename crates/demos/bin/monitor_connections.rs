//! Watch a live inbound topic for connection requests
//!
//! Reads the topic through the mirror node and reports each request the
//! monitor would accept. No transactions are submitted.
//!
//! Requires `INBOUND_TOPIC_ID`; see `AppConfig` for the other variables.
//! An env file may be passed as the first argument. Stop with Ctrl-C.

use anyhow::Context;
use futures_util::StreamExt;
use std::sync::Arc;

use hcs_agent_core::{ConnectionMonitor, EventKind, MirrorNodeFeed};
use hcs_agent_demos::{DryRunHandshake, env_file_arg, init_tracing, load_config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing("info");

    let config = load_config(env_file_arg().as_deref()).context("invalid configuration")?;
    let topic = config.require_inbound_topic()?;

    println!("Monitoring {} on {}", topic, config.network);
    println!("  explorer: {}", config.network.explorer_topic_url(&topic));
    if let Some(operator) = &config.operator {
        println!("  operator: {}", config.network.explorer_account_url(&operator.account_id));
    }
    println!("  mirror node: {}", config.mirror_node_url);
    println!("  poll interval: {:?}", config.monitor.poll_interval);

    let feed = Arc::new(MirrorNodeFeed::new(&config.mirror_node_url));
    let invoker = Arc::new(DryRunHandshake::new());
    let monitor = ConnectionMonitor::new(topic, feed, invoker.clone(), &config.monitor);
    // Subscribe before the first poll so no early event is missed.
    let mut events = monitor.events().subscribe();
    let handle = monitor.spawn();

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                println!("\nStopping...");
                break;
            }
            event = events.next() => {
                let Some(event) = event else { break };
                match &event.kind {
                    EventKind::StateChanged { .. } => {}
                    EventKind::HandshakeCompleted { request_id, requester, .. } => {
                        println!("Request #{} from {} would be accepted", request_id, requester);
                    }
                    other => println!("{}", serde_json::to_string(other)?),
                }
            }
        }
    }

    let monitor = handle.stop().await?;
    let stats = monitor.stats();
    println!("\n=== Summary ===");
    println!("Polls: {}", stats.polls);
    println!("Watermark: {}", monitor.watermark());
    println!("Requests reported: {}", invoker.accepted());
    println!("Processed ids: {}", monitor.processed().len());
    println!("Fetch failures: {}", stats.fetch_failures);

    Ok(())
}

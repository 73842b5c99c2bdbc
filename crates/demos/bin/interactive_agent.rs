//! Console agent over an in-memory network
//!
//! Runs an agent that accepts incoming connections automatically and lets the
//! operator open connections, send and read messages. A second agent ("Bob")
//! runs alongside so there is someone to talk to.
//!
//! With `OPENAI_API_KEY` set, free-form input is interpreted by the model and
//! anything that is not a command gets a conversational reply. An env file may
//! be passed as the first argument.

use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;

use hcs_agent_core::{
    AccountId, ChatModel, CommandInterpreter, ConnectionMonitor, HandshakePolicy, InMemoryFeed,
    LlmClient, LlmCommandParser, MonitorConfig, PlainCommandParser, StdinCommandSource,
};
use hcs_agent_demos::{
    Console, LoopbackHandshake, LoopbackPeer, env_file_arg, init_tracing, load_config,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing("warn");

    let config = load_config(env_file_arg().as_deref()).context("invalid configuration")?;
    let feed = Arc::new(InMemoryFeed::new());

    // Our agent
    let account = config
        .operator
        .as_ref()
        .map(|operator| operator.account_id)
        .unwrap_or(AccountId::new(0, 0, 1001));
    let me = Arc::new(LoopbackPeer::register(feed.clone(), account).await);
    let my_handshake = Arc::new(LoopbackHandshake::new(feed.clone(), account));
    let my_monitor = ConnectionMonitor::new(
        me.inbound_topic(),
        feed.clone(),
        my_handshake.clone(),
        &config.monitor,
    )
    .spawn();

    // Bob, who greets everyone who connects
    let bob_account = AccountId::new(0, 0, 2002);
    let bob = LoopbackPeer::register(feed.clone(), bob_account).await;
    let bob_config = MonitorConfig::default()
        .with_poll_interval(Duration::from_millis(200))
        .with_handshake_policy(HandshakePolicy {
            connection_fee_tinybars: None,
            welcome_message: Some("Hi, I'm Bob. Nice to meet you!".to_string()),
        });
    let bob_monitor = ConnectionMonitor::new(
        bob.inbound_topic(),
        feed.clone(),
        Arc::new(LoopbackHandshake::new(feed.clone(), bob_account)),
        &bob_config,
    )
    .spawn();

    // Carol asks to connect with us right away
    let carol = LoopbackPeer::register(feed.clone(), AccountId::new(0, 0, 3003)).await;
    carol
        .request_connection(&me.inbound_topic(), Some("Hello from Carol"))
        .await?;

    let mut console = Console::new(me.clone(), my_handshake, my_monitor.subscribe_status());
    let interpreter: Box<dyn CommandInterpreter> = match &config.llm {
        Some(llm) => {
            let model: Arc<dyn ChatModel> = Arc::new(LlmClient::new(llm));
            console = console.with_chat(model.clone());
            println!("Using {} for input interpretation", llm.model);
            Box::new(LlmCommandParser::new(model))
        }
        None => Box::new(PlainCommandParser::new()),
    };

    println!("You are {} (inbound topic {})", me.operator(), me.inbound_topic());
    println!("Bob listens on {}. Try `connect {}`.", bob.inbound_topic(), bob.inbound_topic());
    println!("Type `help` for commands, `quit` to exit.\n");

    let mut source = StdinCommandSource::new().with_prompt("> ");
    console
        .run(&mut source, interpreter.as_ref(), |reply| println!("{}", reply))
        .await;

    bob_monitor.stop().await?;
    let monitor = my_monitor.stop().await?;
    println!(
        "Accepted {} connection(s), watermark {}",
        monitor.stats().handshakes_completed,
        monitor.watermark()
    );

    Ok(())
}

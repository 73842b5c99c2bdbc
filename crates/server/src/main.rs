//! hcs-agent-server entry point
//!
//! Sets up tracing and configuration, builds the shared state, wires
//! middleware and serves the API until Ctrl-C. An env file may be passed as
//! the first argument.

use std::sync::Arc;

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, info};

use hcs_agent_core::MirrorNodeFeed;
use hcs_agent_demos::{DryRunHandshake, env_file_arg, load_config};
use hcs_agent_server::{ServerState, create_router};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = load_config(env_file_arg().as_deref()).context("invalid configuration")?;

    let feed = Arc::new(MirrorNodeFeed::new(&config.mirror_node_url));
    let invoker = Arc::new(DryRunHandshake::new());
    let state = ServerState::new(feed, invoker, config.monitor.clone());

    if let Some(topic) = config.inbound_topic {
        state.start_monitor(topic).await?;
        info!("Monitoring {} ({})", topic, config.network.explorer_topic_url(&topic));
    }

    let app = create_router(state.clone())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_localhost_only());

    let addr = config.server_addr;
    info!("hcs-agent-server listening on http://{}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("server crashed")?;

    info!("Shutting down monitors");
    state.registry.stop_all().await;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

/// CORS: allow only localhost origins.
fn cors_localhost_only() -> CorsLayer {
    let origins: Vec<HeaderValue> = [
        "http://localhost",
        "http://127.0.0.1",
        "http://localhost:3000",
        "http://127.0.0.1:3000",
        "http://localhost:5173",
        "http://127.0.0.1:5173",
    ]
    .iter()
    .filter_map(|o| HeaderValue::from_str(o).ok())
    .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers(tower_http::cors::Any)
}

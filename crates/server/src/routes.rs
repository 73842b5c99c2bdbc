//! Route definitions and router setup

use axum::{Router, routing::get};

use crate::ServerState;
use crate::handlers;

/// Create the application router with all routes
pub fn create_router(state: ServerState) -> Router {
    let api_routes = Router::new()
        // Monitor lifecycle
        .route(
            "/monitors",
            get(handlers::list_monitors).post(handlers::start_monitor),
        )
        .route(
            "/monitors/{topic_id}",
            get(handlers::get_monitor).delete(handlers::stop_monitor),
        )
        // Event streaming
        .route("/monitors/{topic_id}/events", get(handlers::stream_events))
        // Health check
        .route("/health", get(handlers::health_check));

    Router::new()
        .nest("/api", api_routes)
        .with_state(state)
}

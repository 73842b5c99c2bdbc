//! hcs-agent-server
//!
//! REST API for running connection monitors, with SSE event streaming.

pub mod api;
pub mod handlers;
pub mod routes;

pub use api::{MonitorRegistry, ServerState};
pub use routes::create_router;

pub use hcs_agent_core;

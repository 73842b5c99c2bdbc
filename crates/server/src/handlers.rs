//! HTTP request handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Sse, sse::Event},
};
use futures_util::StreamExt;
use serde_json::json;

use crate::ServerState;
use crate::api::{ErrorResponse, ListMonitorsResponse, RegistryError, StartMonitorRequest};
use hcs_agent_core::TopicId;

/// Start monitoring an inbound topic
pub async fn start_monitor(
    State(state): State<ServerState>,
    Json(request): Json<StartMonitorRequest>,
) -> impl IntoResponse {
    match state.start_monitor(request.topic_id).await {
        Ok(status) => (StatusCode::CREATED, Json(status)).into_response(),
        Err(e) => registry_error(e),
    }
}

/// List all monitors
pub async fn list_monitors(State(state): State<ServerState>) -> impl IntoResponse {
    let monitors = state.registry.list().await;

    let response = ListMonitorsResponse {
        total: monitors.len(),
        monitors,
    };

    Json(response).into_response()
}

/// Get the status of one monitor
pub async fn get_monitor(
    State(state): State<ServerState>,
    Path(topic_id): Path<String>,
) -> impl IntoResponse {
    let topic = match parse_topic(&topic_id) {
        Ok(topic) => topic,
        Err(response) => return response,
    };

    match state.registry.status(&topic).await {
        Some(status) => Json(status).into_response(),
        None => registry_error(RegistryError::NotFound(topic)),
    }
}

/// Stop a monitor and return its final status
pub async fn stop_monitor(
    State(state): State<ServerState>,
    Path(topic_id): Path<String>,
) -> impl IntoResponse {
    let topic = match parse_topic(&topic_id) {
        Ok(topic) => topic,
        Err(response) => return response,
    };

    match state.registry.stop(&topic).await {
        Ok(status) => Json(status).into_response(),
        Err(e) => registry_error(e),
    }
}

/// Stream monitor events via Server-Sent Events (SSE)
///
/// Replays the retained history first, then follows live events.
pub async fn stream_events(
    State(state): State<ServerState>,
    Path(topic_id): Path<String>,
) -> impl IntoResponse {
    let topic = match parse_topic(&topic_id) {
        Ok(topic) => topic,
        Err(response) => return response,
    };

    let Some(store) = state.registry.events(&topic).await else {
        return registry_error(RegistryError::NotFound(topic));
    };

    let (history, mut live) = store.snapshot_and_subscribe().await;

    let stream = async_stream::stream! {
        yield Ok::<_, axum::Error>(Event::default()
            .event("stream_started")
            .data(topic.to_string()));

        for event in history {
            yield Ok::<_, axum::Error>(to_sse(&event));
        }

        while let Some(event) = live.next().await {
            yield Ok::<_, axum::Error>(to_sse(&event));
        }

        yield Ok::<_, axum::Error>(Event::default().event("stream_ended").data(topic.to_string()));
    };

    Sse::new(stream)
        .keep_alive(
            axum::response::sse::KeepAlive::new()
                .interval(std::time::Duration::from_secs(15))
                .text("keepalive"),
        )
        .into_response()
}

fn to_sse(event: &hcs_agent_core::MonitorEvent) -> Event {
    Event::default()
        .json_data(event)
        .unwrap_or_else(|_| Event::default().data("error serializing monitor event"))
}

/// Health check endpoint
pub async fn health_check(State(state): State<ServerState>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "monitors": state.registry.len().await,
        "feed": state.feed.name(),
        "invoker": state.invoker.name(),
        "timestamp": unix_timestamp(),
    }))
}

fn unix_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn parse_topic(raw: &str) -> Result<TopicId, axum::response::Response> {
    raw.parse().map_err(|e: hcs_agent_core::EntityIdError| {
        error_response(
            StatusCode::BAD_REQUEST,
            &format!("Invalid topic id '{}'", raw),
            Some(e.to_string()),
        )
    })
}

fn registry_error(err: RegistryError) -> axum::response::Response {
    let status = match &err {
        RegistryError::AlreadyRunning(_) => StatusCode::CONFLICT,
        RegistryError::NotFound(_) => StatusCode::NOT_FOUND,
        RegistryError::Monitor(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    (status, Json(ErrorResponse::from(err))).into_response()
}

/// Helper function to create error responses
fn error_response(
    status: StatusCode,
    message: &str,
    details: Option<String>,
) -> axum::response::Response {
    let error_response = ErrorResponse {
        error: message.to_string(),
        details,
    };

    (status, Json(error_response)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_response() {
        let response = error_response(
            StatusCode::BAD_REQUEST,
            "test error",
            Some("details".to_string()),
        );
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_parse_topic() {
        assert_eq!(parse_topic("0.0.42").unwrap(), TopicId::new(0, 0, 42));

        let response = parse_topic("forty-two").unwrap_err();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_registry_error_status() {
        let topic = TopicId::new(0, 0, 1);
        assert_eq!(
            registry_error(RegistryError::AlreadyRunning(topic)).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            registry_error(RegistryError::NotFound(topic)).status(),
            StatusCode::NOT_FOUND
        );
    }
}

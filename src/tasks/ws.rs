//! WebSocket server + REST endpoints for the task console.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde::Deserialize;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

use crate::backend::StatusEvent;
use crate::error::SubmitError;

use super::model::{WsMessage, generate_task_id};
use super::registry::TaskRegistry;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<TaskRegistry>,
    /// Inbound side of the status-event channel (backend webhook → loop).
    pub events: mpsc::Sender<StatusEvent>,
}

/// Build the Axum router with task WebSocket and REST routes.
pub fn task_routes(registry: Arc<TaskRegistry>, events: mpsc::Sender<StatusEvent>) -> Router {
    let state = AppState { registry, events };

    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .route("/api/tasks", get(list_tasks).post(submit_task))
        .route("/api/servers", get(list_servers))
        .route("/api/events", post(inject_event))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "opt-console"
    }))
}

// ── WebSocket ───────────────────────────────────────────────────────────

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    info!("WebSocket client connecting");
    ws.on_upgrade(|socket| handle_socket(socket, state.registry))
}

async fn handle_socket(mut socket: WebSocket, registry: Arc<TaskRegistry>) {
    info!("WebSocket client connected");

    // Send the full registry on connect
    let tasks = registry.tasks().await;
    let sync_msg = WsMessage::TasksSync { tasks };
    if let Ok(json) = serde_json::to_string(&sync_msg) {
        if socket.send(Message::Text(json.into())).await.is_err() {
            warn!("Failed to send initial sync, client disconnected");
            return;
        }
    }

    // Subscribe to broadcast channel for real-time updates
    let mut rx = registry.subscribe();

    loop {
        tokio::select! {
            // Forward broadcast events to this client
            result = rx.recv() => {
                match result {
                    Ok(msg) => {
                        if let Ok(json) = serde_json::to_string(&msg) {
                            if socket.send(Message::Text(json.into())).await.is_err() {
                                debug!("Client disconnected during send");
                                break;
                            }
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!(missed = n, "WS client lagged behind broadcast");
                        // Re-sync by sending the full registry
                        let tasks = registry.tasks().await;
                        let sync = WsMessage::TasksSync { tasks };
                        if let Ok(json) = serde_json::to_string(&sync) {
                            if socket.send(Message::Text(json.into())).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                        debug!("Broadcast channel closed");
                        break;
                    }
                }
            }

            // The client only listens; handle keepalive and close
            result = socket.recv() => {
                match result {
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("WebSocket client disconnected");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    info!("WebSocket connection closed");
}

// ── REST Endpoints ──────────────────────────────────────────────────────

async fn list_tasks(State(state): State<AppState>) -> impl IntoResponse {
    let tasks = state.registry.tasks().await;
    Json(tasks)
}

async fn list_servers(State(state): State<AppState>) -> impl IntoResponse {
    let servers = state.registry.servers().await;
    Json(servers)
}

#[derive(Deserialize, Default)]
struct SubmitTaskRequest {
    /// Caller-supplied identifier; generated when absent.
    id: Option<String>,
}

async fn submit_task(
    State(state): State<AppState>,
    body: Option<Json<SubmitTaskRequest>>,
) -> impl IntoResponse {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let id = request.id.unwrap_or_else(generate_task_id);

    match state.registry.submit(&id).await {
        Ok(task) => (StatusCode::CREATED, Json(serde_json::json!(task))),
        Err(e @ SubmitError::InvalidId { .. }) => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": e.to_string()})),
        ),
        Err(e @ SubmitError::Duplicate { .. }) => (
            StatusCode::CONFLICT,
            Json(serde_json::json!({"error": e.to_string()})),
        ),
        Err(e @ SubmitError::Io(_)) => {
            warn!(task_id = %id, error = %e, "Submission failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": e.to_string()})),
            )
        }
    }
}

/// Status webhook: the backend POSTs status events here; they are forwarded
/// onto the notification loop's channel. Always accepted — events for unknown
/// tasks are dropped by the loop.
async fn inject_event(
    State(state): State<AppState>,
    Json(event): Json<StatusEvent>,
) -> impl IntoResponse {
    debug!(task_id = %event.task_id, code = %event.code, "Status event posted");
    if state.events.send(event).await.is_err() {
        warn!("Status channel closed, event dropped");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({"error": "Notification loop not running"})),
        );
    }
    (StatusCode::ACCEPTED, Json(serde_json::json!({"status": "queued"})))
}

//! Integration tests for the task WebSocket + REST system.
//!
//! Each test spins up an Axum server on a random port, connects via
//! tokio-tungstenite, and exercises the real WS / REST contract.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use async_trait::async_trait;

use opt_console::backend::{ComputeBackend, ResultStore};
use opt_console::config::Config;
use opt_console::error::{BackendError, DownloadError};
use opt_console::tasks::registry::TaskRegistry;
use opt_console::tasks::run_notify_loop;
use opt_console::tasks::ws::task_routes;

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Backend stub: accepts every submission, no real compute service.
struct StubBackend;

#[async_trait]
impl ComputeBackend for StubBackend {
    async fn submit(&self, _: &str, _: &str, _: &str) -> Result<(), BackendError> {
        Ok(())
    }
}

/// Result store stub serving fixed bytes for every fetch.
struct StubStore;

#[async_trait]
impl ResultStore for StubStore {
    async fn fetch(&self, _url: &str) -> Result<Vec<u8>, DownloadError> {
        Ok(b"result-bytes".to_vec())
    }
}

struct TestServer {
    port: u16,
    registry: Arc<TaskRegistry>,
    _shutdown: watch::Sender<bool>,
    _dir: tempfile::TempDir,
}

/// Start the full stack — registry, notification loop, Axum server — on a
/// random port.
async fn start_server() -> TestServer {
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        data_dir: dir.path().to_path_buf(),
        url_prefix: "http://test:8080".to_string(),
        ..Config::default()
    };

    let registry = TaskRegistry::new(&config, Arc::new(StubBackend));
    let (event_tx, event_rx) = mpsc::channel(16);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(run_notify_loop(
        Arc::clone(&registry),
        Arc::new(StubStore),
        event_rx,
        shutdown_rx,
        Duration::from_secs(2),
    ));

    let app = task_routes(Arc::clone(&registry), event_tx);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Give the server a moment to start accepting connections.
    tokio::time::sleep(Duration::from_millis(50)).await;

    TestServer {
        port,
        registry,
        _shutdown: shutdown_tx,
        _dir: dir,
    }
}

/// Parse a WS text frame into a serde_json::Value.
fn parse_ws_json(msg: &Message) -> Value {
    match msg {
        Message::Text(txt) => serde_json::from_str(txt).expect("invalid JSON from server"),
        other => panic!("expected Text frame, got {:?}", other),
    }
}

/// POST a status event to the webhook endpoint.
async fn post_event(port: u16, body: Value) -> reqwest::StatusCode {
    reqwest::Client::new()
        .post(format!("http://127.0.0.1:{port}/api/events"))
        .json(&body)
        .send()
        .await
        .expect("event POST failed")
        .status()
}

// ── WebSocket Tests ──────────────────────────────────────────────────

#[tokio::test]
async fn ws_connect_receives_empty_sync() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;

        let (mut ws, _resp) = connect_async(format!("ws://127.0.0.1:{}/ws", server.port))
            .await
            .expect("WS connect failed");

        // First message should be a tasks_sync with an empty task list.
        let msg = ws.next().await.unwrap().unwrap();
        let json = parse_ws_json(&msg);

        assert_eq!(json["type"], "tasks_sync");
        assert!(json["tasks"].as_array().unwrap().is_empty());
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn ws_connect_receives_existing_tasks_on_sync() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;

        // Submit a task before any WS client connects.
        server.registry.submit("abcd1234").await.unwrap();

        let (mut ws, _) = connect_async(format!("ws://127.0.0.1:{}/ws", server.port))
            .await
            .unwrap();

        let msg = ws.next().await.unwrap().unwrap();
        let json = parse_ws_json(&msg);

        assert_eq!(json["type"], "tasks_sync");
        let tasks = json["tasks"].as_array().unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0]["id"], "abcd1234");
        assert_eq!(tasks[0]["status"], "new");
        assert_eq!(tasks[0]["data_url"], "http://test:8080/tasks/abcd1234/data.gz");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn status_events_drive_ws_updates_through_completion() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;
        server.registry.submit("abcd1234").await.unwrap();

        let (mut ws, _) = connect_async(format!("ws://127.0.0.1:{}/ws", server.port))
            .await
            .unwrap();

        // Consume the initial tasks_sync.
        let _ = ws.next().await.unwrap().unwrap();

        // Running event → one task_updated with the worker recorded.
        let status = post_event(
            server.port,
            serde_json::json!({
                "task_id": "abcd1234",
                "code": "running",
                "desc": "",
                "worker": "workerA"
            }),
        )
        .await;
        assert_eq!(status, reqwest::StatusCode::ACCEPTED);

        let json = parse_ws_json(&ws.next().await.unwrap().unwrap());
        assert_eq!(json["type"], "task_updated");
        assert_eq!(json["task"]["status"], "running");
        assert_eq!(json["task"]["server"], "workerA");

        // Done event → task_updated(done), then the completion handler's
        // follow-up broadcast once the result was fetched and stored.
        post_event(
            server.port,
            serde_json::json!({
                "task_id": "abcd1234",
                "code": "done",
                "worker": "workerA"
            }),
        )
        .await;

        let json = parse_ws_json(&ws.next().await.unwrap().unwrap());
        assert_eq!(json["type"], "task_updated");
        assert_eq!(json["task"]["status"], "done");

        let json = parse_ws_json(&ws.next().await.unwrap().unwrap());
        assert_eq!(json["type"], "task_updated");
        assert_eq!(json["task"]["status"], "done");
        assert_eq!(json["task"]["desc"], "OK");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn unknown_task_event_produces_no_ws_traffic() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;
        server.registry.submit("abcd1234").await.unwrap();

        let (mut ws, _) = connect_async(format!("ws://127.0.0.1:{}/ws", server.port))
            .await
            .unwrap();
        let _ = ws.next().await.unwrap().unwrap(); // tasks_sync

        // Unknown id is accepted by the webhook but dropped by the loop.
        let status = post_event(
            server.port,
            serde_json::json!({"task_id": "zzzz9999", "code": "running"}),
        )
        .await;
        assert_eq!(status, reqwest::StatusCode::ACCEPTED);

        // A follow-up event for the known task must be the next WS frame.
        post_event(
            server.port,
            serde_json::json!({"task_id": "abcd1234", "code": "pending"}),
        )
        .await;

        let json = parse_ws_json(&ws.next().await.unwrap().unwrap());
        assert_eq!(json["type"], "task_updated");
        assert_eq!(json["task"]["id"], "abcd1234");
        assert_eq!(json["task"]["status"], "pending");
    })
    .await
    .expect("test timed out");
}

// ── REST Tests ───────────────────────────────────────────────────────

#[tokio::test]
async fn rest_submit_creates_task_and_broadcasts() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;

        let (mut ws, _) = connect_async(format!("ws://127.0.0.1:{}/ws", server.port))
            .await
            .unwrap();
        let _ = ws.next().await.unwrap().unwrap(); // tasks_sync

        let response = reqwest::Client::new()
            .post(format!("http://127.0.0.1:{}/api/tasks", server.port))
            .json(&serde_json::json!({"id": "feed5678"}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::CREATED);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["id"], "feed5678");
        assert_eq!(body["status"], "new");

        let json = parse_ws_json(&ws.next().await.unwrap().unwrap());
        assert_eq!(json["type"], "task_created");
        assert_eq!(json["task"]["id"], "feed5678");

        // Visible via the list endpoint, in submission order.
        let tasks: Value = reqwest::get(format!("http://127.0.0.1:{}/api/tasks", server.port))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(tasks.as_array().unwrap().len(), 1);
        assert_eq!(tasks[0]["id"], "feed5678");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn rest_submit_generates_id_when_absent() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;

        let response = reqwest::Client::new()
            .post(format!("http://127.0.0.1:{}/api/tasks", server.port))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::CREATED);
        let body: Value = response.json().await.unwrap();

        let id = body["id"].as_str().unwrap();
        assert_eq!(id.len(), 8);
        assert!(id.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b)));
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn rest_submit_duplicate_is_conflict() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;
        server.registry.submit("abcd1234").await.unwrap();

        let response = reqwest::Client::new()
            .post(format!("http://127.0.0.1:{}/api/tasks", server.port))
            .json(&serde_json::json!({"id": "abcd1234"}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::CONFLICT);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn rest_submit_invalid_id_is_bad_request() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;

        let response = reqwest::Client::new()
            .post(format!("http://127.0.0.1:{}/api/tasks", server.port))
            .json(&serde_json::json!({"id": "NOT-HEX!"}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn rest_lists_observed_servers() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;
        server.registry.submit("abcd1234").await.unwrap();

        post_event(
            server.port,
            serde_json::json!({"task_id": "abcd1234", "code": "running", "worker": "workerA"}),
        )
        .await;

        // The loop consumes the event asynchronously; poll briefly.
        let url = format!("http://127.0.0.1:{}/api/servers", server.port);
        let mut servers = Vec::new();
        for _ in 0..20 {
            let body: Value = reqwest::get(&url).await.unwrap().json().await.unwrap();
            servers = body.as_array().unwrap().clone();
            if !servers.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0]["id"], "workerA");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn health_endpoint_responds() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;

        let body: Value = reqwest::get(format!("http://127.0.0.1:{}/health", server.port))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["status"], "ok");
    })
    .await
    .expect("test timed out");
}

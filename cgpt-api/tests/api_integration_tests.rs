//! Integration tests for cgpt-api HTTP endpoints

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use cgpt_api::config::{ApiConfig, ProgressBand, StageConfig};
use cgpt_api::hub::run_broadcaster;
use cgpt_api::AppState;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::time::Duration;
use tempfile::TempDir;
use tower::util::ServiceExt;

/// Test helper: app whose single stage runs `script` under sh
fn create_test_app(script: &str) -> (axum::Router, AppState, TempDir) {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let config = ApiConfig {
        stages: vec![StageConfig {
            name: "only".to_string(),
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            stdin: None,
            band: ProgressBand(0, 100),
            fatal: true,
        }],
        ..ApiConfig::default()
    };

    let (state, _snapshots) = AppState::new(config, temp_dir.path().to_path_buf());
    let app = cgpt_api::build_router(state.clone());
    (app, state, temp_dir)
}

async fn send(app: &axum::Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(match body {
            Some(json) => Body::from(json.to_string()),
            None => Body::empty(),
        })
        .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

/// Poll until the run slot is released
async fn wait_for_run_end(state: &AppState) {
    for _ in 0..200 {
        if state.active_run.lock().await.is_none() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("run did not finish in time");
}

/// Poll until the displayed status matches
async fn wait_for_status(state: &AppState, expected: cgpt_common::AnalysisStatus) {
    for _ in 0..200 {
        if state.store.snapshot().await.status == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("status never reached {:?}", expected);
}

#[tokio::test]
async fn test_health_endpoint() {
    let (app, _state, _dir) = create_test_app("exit 0");

    let (status, body) = send(&app, "GET", "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "cgpt-api");
    assert_eq!(body["viewers"], 0);
    assert_eq!(body["analysis_status"], "idle");
}

#[tokio::test]
async fn test_status_starts_idle() {
    let (app, _state, _dir) = create_test_app("exit 0");

    let (status, body) = send(&app, "GET", "/api/status", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "idle");
    assert_eq!(body["progress"], 0);
    assert!(body["channel_info"].is_null());
}

#[tokio::test]
async fn test_analyze_rejects_empty_channel() {
    let (app, _state, _dir) = create_test_app("exit 0");

    let (status, body) = send(&app, "POST", "/api/analyze", Some(json!({"channel_id": "  "}))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
}

#[cfg(unix)]
#[tokio::test]
async fn test_second_start_conflicts_while_running() {
    let (app, state, _dir) = create_test_app("sleep 30");

    let (status, body) = send(&app, "POST", "/api/analyze", Some(json!({"channel_id": "UC1"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "starting");
    assert_eq!(body["logs"][0], "Starting analysis for channel: UC1");

    let (status, body) = send(&app, "POST", "/api/analyze", Some(json!({"channel_id": "UC2"}))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "ANALYSIS_RUNNING");

    let (status, body) = send(&app, "POST", "/api/cancel", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["channel_id"], "UC1");
    assert!(body["started_at"].as_str().is_some_and(|ts| ts.contains('T')));
    wait_for_run_end(&state).await;

    let (_, body) = send(&app, "GET", "/api/status", None).await;
    assert_eq!(body["status"], "error");
    assert_eq!(body["error"], "Analysis cancelled");
}

#[cfg(unix)]
#[tokio::test]
async fn test_reset_does_not_stop_run() {
    let (app, state, _dir) = create_test_app("sleep 30");

    send(&app, "POST", "/api/analyze", Some(json!({"channel_id": "UC1"}))).await;
    wait_for_status(&state, cgpt_common::AnalysisStatus::Running).await;

    let (status, body) = send(&app, "POST", "/api/reset", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["run_in_progress"], true);

    let (_, body) = send(&app, "GET", "/api/status", None).await;
    assert_eq!(body["status"], "idle");

    // Display was reset but the worker is still alive
    let (status, _) = send(&app, "POST", "/api/analyze", Some(json!({"channel_id": "UC2"}))).await;
    assert_eq!(status, StatusCode::CONFLICT);

    send(&app, "POST", "/api/cancel", None).await;
    wait_for_run_end(&state).await;
}

#[tokio::test]
async fn test_cancel_without_run_conflicts() {
    let (app, _state, _dir) = create_test_app("exit 0");

    let (status, body) = send(&app, "POST", "/api/cancel", None).await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "NO_ACTIVE_RUN");
}

#[cfg(unix)]
#[tokio::test]
async fn test_completed_run_visible_in_logs() {
    let script = r#"echo 'PROGRESS:{"step":"fetch","message":"Fetching","progress":50}'; echo plain output"#;
    let (app, state, _dir) = create_test_app(script);

    send(&app, "POST", "/api/analyze", Some(json!({"channel_id": "UC7"}))).await;
    wait_for_run_end(&state).await;

    let (status, body) = send(&app, "GET", "/api/logs", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "completed");

    let logs: Vec<String> = serde_json::from_value(body["logs"].clone()).unwrap();
    assert!(logs.contains(&"PROGRESS: Fetching".to_string()));
    assert!(logs.contains(&"plain output".to_string()));

    // A finished run frees the slot for the next one
    let (status, _) = send(&app, "POST", "/api/analyze", Some(json!({"channel_id": "UC8"}))).await;
    assert_eq!(status, StatusCode::OK);
    wait_for_run_end(&state).await;
}

#[tokio::test]
async fn test_available_files_lists_artifacts() {
    let (app, _state, dir) = create_test_app("exit 0");
    std::fs::write(dir.path().join("sentiment_results.csv"), "a,b\n").unwrap();
    std::fs::write(dir.path().join("batch_processing_status.json"), "{}").unwrap();

    let (status, body) = send(&app, "GET", "/api/available-files", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data_files"], json!(["sentiment_results.csv"]));
    assert_eq!(body["batch_summary"], "batch_processing_status.json");
    assert!(body["dashboard"].is_null());
}

/// Test helper: app with a broadcaster task fanning snapshots out to viewers
fn create_live_app(heartbeat: Duration) -> (axum::Router, AppState, TempDir) {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let (state, snapshots) = AppState::new(ApiConfig::default(), temp_dir.path().to_path_buf());
    tokio::spawn(run_broadcaster(snapshots, state.hub.clone(), heartbeat));
    let app = cgpt_api::build_router(state.clone());
    (app, state, temp_dir)
}

async fn open_event_stream(app: &axum::Router) -> Body {
    let request = Request::builder().uri("/events").body(Body::empty()).unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()["content-type"].to_str().unwrap().to_string();
    assert!(content_type.starts_with("text/event-stream"), "{}", content_type);
    response.into_body()
}

async fn next_sse_frame(body: &mut Body) -> String {
    let frame = tokio::time::timeout(Duration::from_secs(5), body.frame())
        .await
        .expect("no SSE frame in time")
        .expect("SSE stream ended")
        .unwrap();
    String::from_utf8(frame.into_data().unwrap().to_vec()).unwrap()
}

/// JSON payload of an `AnalysisState` SSE event
fn sse_snapshot(frame: &str) -> Value {
    assert!(frame.contains("event: AnalysisState"), "{}", frame);
    let data = frame
        .lines()
        .find_map(|line| line.strip_prefix("data: "))
        .expect("event without data line");
    serde_json::from_str(data).unwrap()
}

async fn wait_for_viewers(state: &AppState, expected: usize) {
    for _ in 0..200 {
        if state.hub.viewer_count().await == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("viewer count never reached {}", expected);
}

#[tokio::test]
async fn test_sse_pushes_current_snapshot_then_updates() {
    let (app, state, _dir) = create_live_app(Duration::from_secs(60));

    let mut body = open_event_stream(&app).await;
    let first = sse_snapshot(&next_sse_frame(&mut body).await);
    assert_eq!(first["status"], "idle");
    assert_eq!(first["progress"], 0);
    assert_eq!(state.hub.viewer_count().await, 1);

    state
        .store
        .merge(cgpt_common::StateUpdate::new().with_progress(42).with_log("working"))
        .await;

    let update = sse_snapshot(&next_sse_frame(&mut body).await);
    assert_eq!(update["progress"], 42);
    assert_eq!(update["logs"], json!(["working"]));
}

#[tokio::test]
async fn test_sse_heartbeat_is_a_comment() {
    let (app, _state, _dir) = create_live_app(Duration::from_millis(50));

    let mut body = open_event_stream(&app).await;
    sse_snapshot(&next_sse_frame(&mut body).await);

    let heartbeat = next_sse_frame(&mut body).await;
    assert!(heartbeat.starts_with(':'), "{}", heartbeat);
    assert!(heartbeat.contains("heartbeat"), "{}", heartbeat);
    assert!(!heartbeat.contains("event:"), "{}", heartbeat);
}

#[tokio::test]
async fn test_websocket_viewer_lifecycle() {
    use futures::{SinkExt, StreamExt};
    use tokio_tungstenite::tungstenite::Message as WsMessage;

    let (app, state, _dir) = create_live_app(Duration::from_millis(50));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws/analysis", addr))
        .await
        .expect("WebSocket handshake failed");

    let first = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("no snapshot in time")
        .expect("socket closed")
        .unwrap();
    let WsMessage::Text(text) = first else {
        panic!("expected text snapshot, got {:?}", first);
    };
    let snapshot: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(snapshot["status"], "idle");
    wait_for_viewers(&state, 1).await;

    // Client text only keeps the connection alive
    ws.send(WsMessage::Text("keep-alive".to_string())).await.unwrap();

    let heartbeat = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(message) = ws.next().await {
            match message.unwrap() {
                WsMessage::Ping(payload) => return payload,
                WsMessage::Text(text) => panic!("unexpected snapshot {}", text),
                _ => {}
            }
        }
        panic!("socket closed before heartbeat");
    })
    .await
    .expect("no heartbeat in time");
    assert_eq!(heartbeat, b"heartbeat".to_vec());
    assert_eq!(state.store.snapshot().await.status, cgpt_common::AnalysisStatus::Idle);

    ws.close(None).await.unwrap();
    wait_for_viewers(&state, 0).await;
}

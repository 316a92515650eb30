//! Live analysis updates
//!
//! Two transports over the same broadcast hub:
//! - GET /ws/analysis: WebSocket, one JSON text frame per snapshot,
//!   heartbeats as Ping frames; client text frames only keep the
//!   connection alive
//! - GET /events: Server-Sent Events, `AnalysisState` events, heartbeats as
//!   comments
//!
//! Both push the current snapshot right after connecting.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::{
        sse::{Event, Sse},
        IntoResponse,
    },
    routing::get,
    Router,
};
use futures::{stream::Stream, SinkExt, StreamExt};
use std::convert::Infallible;
use tracing::{debug, info};

use crate::hub::ViewerMessage;
use crate::AppState;

/// SSE event name carrying a full snapshot
pub const SNAPSHOT_EVENT: &str = "AnalysisState";

/// GET /ws/analysis
pub async fn analysis_socket(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_analysis_socket(socket, state))
}

async fn handle_analysis_socket(socket: WebSocket, state: AppState) {
    let subscription = state.hub.subscribe().await;
    let viewer_id = subscription.id;
    let mut rx = subscription.rx;

    let (mut sender, mut receiver) = socket.split();

    let mut send_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let frame = match message {
                ViewerMessage::Snapshot(json) => Message::Text(json.to_string()),
                ViewerMessage::Heartbeat => Message::Ping(b"heartbeat".to_vec()),
            };
            if sender.send(frame).await.is_err() {
                break;
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = receiver.next().await {
            match message {
                Message::Close(_) => break,
                Message::Text(text) => debug!(viewer = %viewer_id, len = text.len(), "Viewer keep-alive"),
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    state.hub.unsubscribe(viewer_id).await;
    info!(viewer = %viewer_id, "WebSocket viewer closed");
}

/// GET /events
///
/// A disconnected client is dropped from the hub on the next send.
pub async fn analysis_event_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let subscription = state.hub.subscribe().await;
    info!(viewer = %subscription.id, "New SSE viewer connected");

    let stream = async_stream::stream! {
        let mut rx = subscription.rx;
        while let Some(message) = rx.recv().await {
            match message {
                ViewerMessage::Snapshot(json) => {
                    yield Ok(Event::default().event(SNAPSHOT_EVENT).data(&*json));
                }
                ViewerMessage::Heartbeat => {
                    yield Ok(Event::default().comment("heartbeat"));
                }
            }
        }
    };

    Sse::new(stream)
}

/// Build live update routes
pub fn live_routes() -> Router<AppState> {
    Router::new()
        .route("/ws/analysis", get(analysis_socket))
        .route("/events", get(analysis_event_stream))
}

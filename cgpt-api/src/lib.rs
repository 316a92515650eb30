//! cgpt-api library interface
//!
//! Pipeline supervisor: runs the analysis stages as child processes and
//! serves their progress to live viewers over WebSocket and SSE.

pub mod api;
pub mod config;
pub mod error;
pub mod hub;
pub mod orchestrator;
pub mod runner;
pub mod store;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use cgpt_common::AnalysisState;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::config::ApiConfig;
use crate::hub::{serialize_snapshot, BroadcastHub};
use crate::store::{SnapshotReceiver, StateStore};

/// The pipeline run currently owning the worker processes
#[derive(Debug, Clone)]
pub struct ActiveRun {
    pub id: Uuid,
    pub channel_id: String,
    pub cancel: CancellationToken,
    pub started_at: DateTime<Utc>,
}

impl ActiveRun {
    pub fn new(channel_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            channel_id: channel_id.into(),
            cancel: CancellationToken::new(),
            started_at: Utc::now(),
        }
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Current analysis state
    pub store: Arc<StateStore>,
    /// Live viewer connections
    pub hub: BroadcastHub,
    pub config: Arc<ApiConfig>,
    /// Resolved directory the stages run in
    pub work_dir: Arc<PathBuf>,
    /// Set while a pipeline task is alive, even if the display was reset
    pub active_run: Arc<Mutex<Option<ActiveRun>>>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    /// Build the state; the receiver must be handed to
    /// [`hub::run_broadcaster`]
    pub fn new(config: ApiConfig, work_dir: PathBuf) -> (Self, SnapshotReceiver) {
        let (store, rx) = StateStore::new(config.max_log_lines);
        let initial = match serialize_snapshot(&AnalysisState::idle()) {
            Ok(json) => Some(json),
            Err(e) => {
                tracing::warn!(error = %e, "Cannot serialize initial state");
                None
            }
        };
        let state = Self {
            store: Arc::new(store),
            hub: BroadcastHub::with_initial(config.viewer_buffer, initial),
            config: Arc::new(config),
            work_dir: Arc::new(work_dir),
            active_run: Arc::new(Mutex::new(None)),
            startup_time: Utc::now(),
        };
        (state, rx)
    }

    /// Release the run slot if it still belongs to `run_id`
    pub async fn finish_run(&self, run_id: Uuid) {
        let mut active = self.active_run.lock().await;
        if active.as_ref().map(|run| run.id) == Some(run_id) {
            *active = None;
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::analysis_routes())
        .merge(api::live_routes())
        .merge(api::files_routes())
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

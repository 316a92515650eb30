//! Analysis job control
//!
//! POST /api/analyze, GET /api/status, GET /api/logs, POST /api/reset,
//! POST /api/cancel

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use cgpt_common::{AnalysisState, AnalysisStatus, ChannelInfo};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    error::{ApiError, ApiResult},
    orchestrator::{Pipeline, RunResult},
    ActiveRun, AppState,
};

/// POST /api/analyze request
#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    pub channel_id: String,
}

/// GET /api/status response
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: AnalysisStatus,
    pub step: String,
    pub message: String,
    pub progress: u8,
    pub channel_info: Option<ChannelInfo>,
    pub error: Option<String>,
}

/// GET /api/logs response
#[derive(Debug, Serialize)]
pub struct LogsResponse {
    pub logs: Vec<String>,
    pub status: AnalysisStatus,
    pub step: String,
    pub message: String,
    pub error: Option<String>,
}

/// POST /api/reset response
#[derive(Debug, Serialize)]
pub struct ResetResponse {
    pub message: String,
    /// True when a pipeline task is still running behind the reset display
    pub run_in_progress: bool,
}

/// POST /api/cancel response
#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub message: String,
    pub channel_id: String,
    /// When the cancelled run was started
    pub started_at: DateTime<Utc>,
}

/// POST /api/analyze
///
/// Start a pipeline run for a channel. Returns the starting state.
pub async fn start_analysis(
    State(state): State<AppState>,
    Json(request): Json<AnalyzeRequest>,
) -> ApiResult<Json<AnalysisState>> {
    let channel_id = request.channel_id.trim().to_string();
    if channel_id.is_empty() {
        return Err(ApiError::BadRequest("channel_id must not be empty".to_string()));
    }

    // Holding the slot lock across begin_run keeps concurrent starts serialized
    let mut active = state.active_run.lock().await;
    if let Some(run) = active.as_ref() {
        return Err(ApiError::AnalysisRunning(run.channel_id.clone()));
    }
    let snapshot = state
        .store
        .begin_run(&channel_id)
        .await
        .ok_or_else(|| ApiError::AnalysisRunning(channel_id.clone()))?;

    let run = ActiveRun::new(channel_id.clone());
    let run_id = run.id;
    let cancel = run.cancel.clone();
    *active = Some(run);
    drop(active);

    tracing::info!(run_id = %run_id, channel_id = %channel_id, "Analysis run started");

    let pipeline = Pipeline::new(
        state.config.stages.clone(),
        state.work_dir.as_ref().clone(),
        state.config.stdin_timeout(),
        state.store.clone(),
    );
    let task_state = state.clone();
    tokio::spawn(async move {
        let result = pipeline.run(&channel_id, cancel).await;
        match &result {
            RunResult::Completed => {
                tracing::info!(run_id = %run_id, "Analysis run completed")
            }
            RunResult::Failed { stage, error } => {
                tracing::error!(run_id = %run_id, stage = %stage, error = %error, "Analysis run failed")
            }
            RunResult::Cancelled => tracing::warn!(run_id = %run_id, "Analysis run cancelled"),
        }
        task_state.finish_run(run_id).await;
    });

    Ok(Json(snapshot))
}

/// GET /api/status
pub async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let snapshot = state.store.snapshot().await;
    Json(StatusResponse {
        status: snapshot.status,
        step: snapshot.step,
        message: snapshot.message,
        progress: snapshot.progress,
        channel_info: snapshot.channel_info,
        error: snapshot.error,
    })
}

/// GET /api/logs
pub async fn get_logs(State(state): State<AppState>) -> Json<LogsResponse> {
    let snapshot = state.store.snapshot().await;
    Json(LogsResponse {
        logs: snapshot.logs,
        status: snapshot.status,
        step: snapshot.step,
        message: snapshot.message,
        error: snapshot.error,
    })
}

/// POST /api/reset
///
/// Clears the displayed state only. An in-flight run keeps going; use
/// /api/cancel to stop it.
pub async fn reset_analysis(State(state): State<AppState>) -> Json<ResetResponse> {
    state.store.reset().await;
    let run_in_progress = state.active_run.lock().await.is_some();
    tracing::info!(run_in_progress, "Analysis state reset");

    Json(ResetResponse {
        message: "Analysis state reset".to_string(),
        run_in_progress,
    })
}

/// POST /api/cancel
///
/// Kill the in-flight run. The run finishes as `error` once its current
/// worker has been stopped.
pub async fn cancel_analysis(State(state): State<AppState>) -> ApiResult<Json<CancelResponse>> {
    let active = state.active_run.lock().await;
    let run = active.as_ref().ok_or(ApiError::NoActiveRun)?;
    run.cancel.cancel();
    tracing::info!(run_id = %run.id, channel_id = %run.channel_id, "Cancellation requested");

    Ok(Json(CancelResponse {
        message: "Cancellation requested".to_string(),
        channel_id: run.channel_id.clone(),
        started_at: run.started_at,
    }))
}

/// Build analysis routes
pub fn analysis_routes() -> Router<AppState> {
    Router::new()
        .route("/api/analyze", post(start_analysis))
        .route("/api/status", get(get_status))
        .route("/api/logs", get(get_logs))
        .route("/api/reset", post(reset_analysis))
        .route("/api/cancel", post(cancel_analysis))
}

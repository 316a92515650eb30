//! Error types for cgpt-enrich

use thiserror::Error;

/// Enrichment client failures; every variant consumes one attempt
#[derive(Debug, Error)]
pub enum EnrichError {
    #[error("API key not set (expected in {0})")]
    MissingApiKey(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Response contained no text")]
    EmptyResponse,
}

/// Batch processing failures
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Nothing to partition and no batch files on disk
    #[error("Workload file {0} not found")]
    WorkloadMissing(String),

    #[error("Workload file {0} has no items")]
    EmptyWorkload(String),
}

pub type BatchResult<T> = Result<T, BatchError>;

//! cgpt-enrich library
//!
//! Resumable batch enrichment: partitions the cleaned comment workload into
//! batch files, sends each batch to a language model, validates and saves
//! the responses, and reports progress as `PROGRESS:` lines on stdout.

pub mod artifacts;
pub mod batch;
pub mod client;
pub mod config;
pub mod error;
pub mod partition;
pub mod summary;
pub mod validate;

pub use batch::{BatchResumeManager, BatchRunReport, BatchStatus, BatchUnit};
pub use client::{EnrichmentClient, GeminiClient};
pub use config::{BackoffPolicy, BatchConfig, EnrichConfig, GeminiConfig};
pub use error::{BatchError, BatchResult, EnrichError};
pub use summary::BatchSummary;

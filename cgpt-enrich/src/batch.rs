//! Batch resume manager
//!
//! Drives every batch of the workload through the enrichment client and can
//! be re-run at any time:
//! 1. Reuse batch input files already on disk, otherwise partition the
//!    workload into new ones
//! 2. Treat a batch as completed only if its output file exceeds the
//!    minimum size; everything else is pending
//! 3. Process pending batches one at a time, each with bounded retries and
//!    backoff; a rejected response (empty, missing section) costs an attempt
//! 4. A batch that exhausts its attempts is marked failed and the loop
//!    moves on
//! 5. Write the status summary
//!
//! The status summary is never consulted on the next run; output files are
//! the only record of completion.

use cgpt_common::{ProgressEvent, ProgressReporter};
use chrono::Local;
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::artifacts;
use crate::client::EnrichmentClient;
use crate::config::BatchConfig;
use crate::error::{BatchError, BatchResult, EnrichError};
use crate::partition;
use crate::summary::BatchSummary;
use crate::validate::{validate_response, ValidationError};

const OUTPUT_RULE_WIDTH: usize = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// One slice of the workload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchUnit {
    /// 1-based
    pub batch_number: u32,
    pub source_artifact: PathBuf,
    pub output_artifact: PathBuf,
    pub status: BatchStatus,
}

impl BatchUnit {
    fn new(dir: &Path, batch_number: u32) -> Self {
        Self {
            batch_number,
            source_artifact: artifacts::input_path(dir, batch_number),
            output_artifact: artifacts::output_path(dir, batch_number),
            status: BatchStatus::Pending,
        }
    }
}

/// Result of one manager run
#[derive(Debug, Clone, Default)]
pub struct BatchRunReport {
    pub units: Vec<BatchUnit>,
    /// Skipped because a valid output already existed
    pub previously_completed: Vec<u32>,
    pub newly_completed: Vec<u32>,
    pub failed: Vec<u32>,
}

impl BatchRunReport {
    pub fn total(&self) -> usize {
        self.units.len()
    }

    /// Every completed batch, sorted
    pub fn completed_batches(&self) -> Vec<u32> {
        let mut all: Vec<u32> = self
            .previously_completed
            .iter()
            .chain(&self.newly_completed)
            .copied()
            .collect();
        all.sort_unstable();
        all
    }

    pub fn all_completed(&self) -> bool {
        self.failed.is_empty() && self.completed_batches().len() == self.total()
    }

    pub fn summary(&self) -> BatchSummary {
        let mut failed = self.failed.clone();
        // Batches that never reached a verdict count as failed
        failed.extend(
            self.units
                .iter()
                .filter(|u| matches!(u.status, BatchStatus::Pending | BatchStatus::InProgress))
                .map(|u| u.batch_number),
        );
        BatchSummary::new(self.completed_batches(), failed)
    }
}

/// Why one attempt was rejected
#[derive(Debug, Error)]
enum AttemptError {
    #[error("Enrichment call failed: {0}")]
    Client(#[from] EnrichError),

    #[error(transparent)]
    Invalid(#[from] ValidationError),

    #[error("Failed to save output: {0}")]
    Io(#[from] std::io::Error),

    #[error("Saved output is only {0} bytes")]
    OutputTooSmall(u64),
}

pub struct BatchResumeManager<C> {
    dir: PathBuf,
    config: BatchConfig,
    client: C,
    reporter: ProgressReporter,
}

impl<C: EnrichmentClient> BatchResumeManager<C> {
    pub fn new(dir: impl Into<PathBuf>, config: BatchConfig, client: C, reporter: ProgressReporter) -> Self {
        Self {
            dir: dir.into(),
            config,
            client,
            reporter,
        }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Full run: prepare inputs, process pending batches, save the summary
    pub async fn run(&self, workload: &Path) -> BatchResult<BatchRunReport> {
        let numbers = self.prepare(workload)?;
        let mut report = self.process(numbers).await;

        let summary = report.summary();
        if let Err(e) = summary.save(&self.dir) {
            warn!(error = %e, "Could not save status summary");
        }

        if report.all_completed() {
            self.reporter.emit("all_complete", "All batches processed successfully!", 100);
        } else {
            self.reporter.emit(
                "partial_complete",
                "Batch processing completed with some failures",
                95,
            );
        }

        report.units.sort_by_key(|u| u.batch_number);
        Ok(report)
    }

    /// Batch numbers to work on, creating input files when none exist
    pub fn prepare(&self, workload: &Path) -> BatchResult<Vec<u32>> {
        let existing = artifacts::discover_inputs(&self.dir)?;
        if !existing.is_empty() {
            info!(batches = existing.len(), "Found existing batch files");
            self.reporter.emit(
                "existing_batches_found",
                format!("Found {} batch files", existing.len()),
                20,
            );
            return Ok(existing);
        }

        info!(workload = %workload.display(), "No batch files found, partitioning workload");
        let items = partition::load_workload(workload)?;
        if items.is_empty() {
            return Err(BatchError::EmptyWorkload(workload.display().to_string()));
        }
        self.reporter.report(
            &ProgressEvent::new("data_loaded", format!("Loaded {} comments", items.len()), 5)
                .with_extra("total_comments", items.len()),
        );

        partition::write_batches(
            &self.dir,
            &items,
            self.config.batch_size,
            self.config.max_batches,
            &self.reporter,
        )
    }

    /// Scan outputs, then process every pending batch
    pub async fn process(&self, numbers: Vec<u32>) -> BatchRunReport {
        let mut report = BatchRunReport::default();
        self.reporter.emit("batch_processing_start", "Starting batch processing...", 25);

        for number in numbers {
            let mut unit = BatchUnit::new(&self.dir, number);
            if artifacts::output_is_complete(&self.dir, number, self.config.min_output_bytes) {
                unit.status = BatchStatus::Completed;
                report.previously_completed.push(number);
            }
            report.units.push(unit);
        }

        if !report.previously_completed.is_empty() {
            info!(completed = ?report.previously_completed, "Resuming, completed batches skipped");
        }

        let pending: Vec<usize> = report
            .units
            .iter()
            .enumerate()
            .filter(|(_, u)| u.status == BatchStatus::Pending)
            .map(|(i, _)| i)
            .collect();

        if pending.is_empty() {
            self.reporter.emit("batch_processing_complete", "All batches already processed", 90);
            return report;
        }

        let total_pending = pending.len();
        for (position, index) in pending.into_iter().enumerate() {
            let unit = &mut report.units[index];
            let progress = 25 + (position * 65 / total_pending) as u8;
            self.reporter.report(
                &ProgressEvent::new(
                    "processing_batch",
                    format!("Processing batch {}", unit.batch_number),
                    progress,
                )
                .with_extra("batch_number", unit.batch_number)
                .with_extra("current_batch", position + 1)
                .with_extra("total_pending", total_pending),
            );

            self.process_batch(unit).await;
            match unit.status {
                BatchStatus::Completed => report.newly_completed.push(unit.batch_number),
                _ => report.failed.push(unit.batch_number),
            }
        }

        let total_completed = report.previously_completed.len() + report.newly_completed.len();
        let success_rate = total_completed as f64 * 100.0 / report.total() as f64;
        self.reporter.report(
            &ProgressEvent::new(
                "batch_processing_complete",
                format!(
                    "Batch processing complete: {}/{} batches",
                    total_completed,
                    report.total()
                ),
                90,
            )
            .with_extra("successful_new", report.newly_completed.len())
            .with_extra("failed_new", report.failed.len())
            .with_extra("total_completed", total_completed)
            .with_extra("success_rate", success_rate),
        );

        info!(
            total = report.total(),
            previously_completed = report.previously_completed.len(),
            newly_completed = report.newly_completed.len(),
            failed = report.failed.len(),
            "Batch processing finished"
        );
        if !report.failed.is_empty() {
            warn!(failed = ?report.failed, "Some batches failed; re-run to retry them");
        }

        report
    }

    /// pending → in_progress → completed | failed
    async fn process_batch(&self, unit: &mut BatchUnit) {
        unit.status = BatchStatus::InProgress;
        let batch = unit.batch_number;

        let input = match tokio::fs::read_to_string(&unit.source_artifact).await {
            Ok(input) => input,
            Err(e) => {
                warn!(batch, error = %e, "Cannot read batch file");
                unit.status = BatchStatus::Failed;
                return;
            }
        };
        if input.trim().is_empty() {
            warn!(batch, "Empty batch file, not retrying");
            unit.status = BatchStatus::Failed;
            return;
        }

        let max_attempts = self.config.max_retries.max(1);
        for attempt in 1..=max_attempts {
            debug!(batch, attempt, max_attempts, "Enrichment attempt");

            match self.attempt(unit, &input, attempt).await {
                Ok(bytes) => {
                    info!(batch, attempt, bytes, "Batch completed");
                    unit.status = BatchStatus::Completed;
                    let pause = self.config.pause_after_success();
                    if !pause.is_zero() {
                        tokio::time::sleep(pause).await;
                    }
                    return;
                }
                Err(e) => {
                    warn!(batch, attempt, max_attempts, error = %e, "Attempt rejected");
                    if attempt < max_attempts {
                        let delay = self.config.backoff.delay(attempt);
                        if !delay.is_zero() {
                            debug!(batch, delay_ms = delay.as_millis() as u64, "Backing off");
                            tokio::time::sleep(delay).await;
                        }
                    }
                }
            }
        }

        warn!(batch, max_attempts, "Batch failed after all attempts");
        unit.status = BatchStatus::Failed;
    }

    /// One call, validation and save; returns the saved size
    async fn attempt(&self, unit: &BatchUnit, input: &str, attempt: u32) -> Result<u64, AttemptError> {
        let text = self.client.enrich(input).await?;
        validate_response(&text, &self.config.required_markers)?;

        let source_name = artifacts::input_name(unit.batch_number);
        tokio::fs::write(
            &unit.output_artifact,
            render_output(unit.batch_number, &source_name, attempt, &text),
        )
        .await?;

        let size = tokio::fs::metadata(&unit.output_artifact).await?.len();
        if size <= self.config.min_output_bytes {
            return Err(AttemptError::OutputTooSmall(size));
        }
        Ok(size)
    }
}

/// Output artifact: header followed by the response text
pub fn render_output(batch_number: u32, source_name: &str, attempt: u32, response: &str) -> String {
    let rule = "=".repeat(OUTPUT_RULE_WIDTH);
    format!(
        "ANALYSIS RESULTS FOR BATCH {}\n{}\nSource File: {}\nProcessing Date: {}\nAttempt: {}\n{}\n\n{}",
        batch_number,
        rule,
        source_name,
        Local::now().format("%Y-%m-%d %H:%M:%S"),
        attempt,
        rule,
        response
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_output_header() {
        let text = render_output(4, "comments_batch_4.txt", 2, "BODY");
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("ANALYSIS RESULTS FOR BATCH 4"));
        assert!(text.contains("Source File: comments_batch_4.txt\n"));
        assert!(text.contains("Attempt: 2\n"));
        assert!(text.ends_with("\n\nBODY"));
    }

    #[test]
    fn test_report_summary_counts_unfinished_as_failed() {
        let dir = Path::new("/tmp");
        let mut report = BatchRunReport {
            units: vec![BatchUnit::new(dir, 1), BatchUnit::new(dir, 2), BatchUnit::new(dir, 3)],
            previously_completed: vec![1],
            newly_completed: vec![],
            failed: vec![2],
        };
        report.units[0].status = BatchStatus::Completed;
        report.units[1].status = BatchStatus::Failed;

        let summary = report.summary();
        assert_eq!(summary.completed_batches, vec![1]);
        assert_eq!(summary.failed_batches, vec![2, 3]);
        assert!(!report.all_completed());
    }
}

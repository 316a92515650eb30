//! Pipeline orchestrator
//!
//! Runs the configured stages one after another. Each output line goes
//! through the progress codec; progress events are rescaled into the stage's
//! band and merged into the state store, everything else is appended to the
//! log. The store publishes every merge to the broadcaster.

use cgpt_common::progress::{decode, DecodedLine};
use cgpt_common::{AnalysisStatus, StateUpdate};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{expand_placeholders, ProgressBand, StageConfig};
use crate::runner::{run_batch, run_streaming, CommandSpec, OutputLine, RunOutcome, RunnerError};
use crate::store::StateStore;

/// Stderr lines carried into a stage failure message
const STDERR_TAIL_LINES: usize = 20;

/// How a run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunResult {
    Completed,
    Failed { stage: String, error: String },
    Cancelled,
}

enum StageResult {
    Succeeded,
    Failed(String),
    Cancelled,
}

/// Ordered stage list bound to a work directory
pub struct Pipeline {
    stages: Vec<StageConfig>,
    work_dir: PathBuf,
    stdin_timeout: Duration,
    store: Arc<StateStore>,
}

impl Pipeline {
    pub fn new(
        stages: Vec<StageConfig>,
        work_dir: PathBuf,
        stdin_timeout: Duration,
        store: Arc<StateStore>,
    ) -> Self {
        Self {
            stages,
            work_dir,
            stdin_timeout,
            store,
        }
    }

    /// Execute every stage for `channel_id` and record the terminal state
    pub async fn run(&self, channel_id: &str, cancel: CancellationToken) -> RunResult {
        info!(channel_id = %channel_id, stages = self.stages.len(), "Pipeline started");

        let mut last_stage_ok = true;

        for stage in &self.stages {
            self.store
                .merge(
                    StateUpdate::new()
                        .with_status(AnalysisStatus::Running)
                        .with_step(stage.name.clone())
                        .with_message(format!("Running {} stage...", stage.name))
                        .with_progress(stage.band.start())
                        .with_log(format!("Starting stage: {}", stage.name)),
                )
                .await;

            match self.run_stage(stage, channel_id, &cancel).await {
                StageResult::Succeeded => {
                    last_stage_ok = true;
                    self.store
                        .merge(
                            StateUpdate::new()
                                .with_progress(stage.band.end())
                                .with_log(format!("Stage {} completed", stage.name)),
                        )
                        .await;
                    info!(stage = %stage.name, "Stage completed");
                }
                StageResult::Cancelled => {
                    warn!(stage = %stage.name, "Pipeline cancelled");
                    self.store
                        .merge(
                            StateUpdate::new()
                                .with_status(AnalysisStatus::Error)
                                .with_message("Analysis cancelled")
                                .with_error("Analysis cancelled")
                                .with_log(format!("Cancelled during stage {}", stage.name)),
                        )
                        .await;
                    return RunResult::Cancelled;
                }
                StageResult::Failed(error) if stage.fatal => {
                    error!(stage = %stage.name, error = %error, "Fatal stage failure");
                    self.store
                        .merge(
                            StateUpdate::new()
                                .with_status(AnalysisStatus::Error)
                                .with_message(format!("Analysis failed during {}", stage.name))
                                .with_error(error.clone())
                                .with_log(format!("ERROR: {}", error)),
                        )
                        .await;
                    return RunResult::Failed {
                        stage: stage.name.clone(),
                        error,
                    };
                }
                StageResult::Failed(error) => {
                    last_stage_ok = false;
                    warn!(stage = %stage.name, error = %error, "Non-fatal stage failure, continuing");
                    self.store
                        .merge(
                            StateUpdate::new()
                                .with_progress(stage.band.end())
                                .with_log(format!("WARNING: {} (continuing)", error)),
                        )
                        .await;
                }
            }
        }

        if !last_stage_ok {
            // Only reachable when the final stage is non-fatal and failed
            let stage = self.stages.last().map(|s| s.name.clone()).unwrap_or_default();
            let error = format!("Final stage {} did not complete", stage);
            self.store
                .merge(
                    StateUpdate::new()
                        .with_status(AnalysisStatus::Error)
                        .with_message(error.clone())
                        .with_error(error.clone()),
                )
                .await;
            return RunResult::Failed { stage, error };
        }

        self.store
            .merge(
                StateUpdate::new()
                    .with_status(AnalysisStatus::Completed)
                    .with_step("completed")
                    .with_message("Analysis completed successfully!")
                    .with_progress(100)
                    .with_log("Analysis pipeline completed successfully"),
            )
            .await;
        info!(channel_id = %channel_id, "Pipeline completed");
        RunResult::Completed
    }

    async fn run_stage(
        &self,
        stage: &StageConfig,
        channel_id: &str,
        cancel: &CancellationToken,
    ) -> StageResult {
        let work_dir = self.work_dir.to_string_lossy();
        let mut spec = CommandSpec::new(stage.program.clone())
            .args(
                stage
                    .args
                    .iter()
                    .map(|a| expand_placeholders(a, channel_id, &work_dir)),
            )
            .working_dir(self.work_dir.clone())
            .timeout(self.stdin_timeout);

        self.store
            .merge(StateUpdate::new().with_log(format!(
                "Running command: {} {}",
                spec.program,
                spec.args.join(" ")
            )))
            .await;

        let result = match &stage.stdin {
            Some(template) => {
                spec = spec.stdin(expand_placeholders(template, channel_id, &work_dir));
                self.run_piped_stage(&spec, stage.band, cancel).await
            }
            None => {
                let band = stage.band;
                let this = self;
                run_streaming(&spec, cancel, move |line| this.handle_line(band, line)).await
            }
        };

        match result {
            Ok(outcome) if outcome.success() => StageResult::Succeeded,
            Ok(outcome) => StageResult::Failed(failure_message(&stage.name, &outcome)),
            Err(RunnerError::Cancelled) => StageResult::Cancelled,
            Err(e) => {
                self.store
                    .merge(StateUpdate::new().with_log(format!("ERROR: {}", e)))
                    .await;
                StageResult::Failed(format!("{} stage failed: {}", stage.name, e))
            }
        }
    }

    /// Batch mode, then replay collected output through the decoding path
    async fn run_piped_stage(
        &self,
        spec: &CommandSpec,
        band: ProgressBand,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome, RunnerError> {
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RunnerError::Cancelled),
            outcome = run_batch(spec) => outcome?,
        };

        for line in &outcome.stdout {
            self.handle_line(band, OutputLine::Stdout(line.clone())).await;
        }
        for line in &outcome.stderr {
            self.handle_line(band, OutputLine::Stderr(line.clone())).await;
        }
        Ok(outcome)
    }

    async fn handle_line(&self, band: ProgressBand, line: OutputLine) {
        let update = match line {
            OutputLine::Stdout(text) => {
                if text.trim().is_empty() {
                    return;
                }
                match decode(&text) {
                    DecodedLine::Progress(event) => {
                        debug!(step = %event.step, progress = event.progress, "Progress event");
                        // Restores `running` after a display-only reset
                        StateUpdate::from_event(&event)
                            .with_status(AnalysisStatus::Running)
                            .with_progress(band.scale(event.progress))
                    }
                    DecodedLine::Malformed { raw, reason } => {
                        warn!(reason = %reason, "Malformed progress line, logging verbatim");
                        StateUpdate::new().with_log(raw.trim())
                    }
                    DecodedLine::Plain(text) => StateUpdate::new().with_log(text.trim()),
                }
            }
            OutputLine::Stderr(text) => {
                if text.trim().is_empty() {
                    return;
                }
                StateUpdate::new().with_log(format!("[stderr] {}", text.trim()))
            }
        };

        self.store.merge(update).await;
    }
}

fn failure_message(stage: &str, outcome: &RunOutcome) -> String {
    let code = outcome
        .exit_code
        .map(|c| c.to_string())
        .unwrap_or_else(|| "signal".to_string());
    let tail = outcome.stderr_tail(STDERR_TAIL_LINES);
    if tail.is_empty() {
        format!("{} stage failed with exit code {}", stage, code)
    } else {
        format!(
            "{} stage failed with exit code {}: {}",
            stage,
            code,
            tail.join("\n")
        )
    }
}

//! Analysis state model
//!
//! [`AnalysisState`] is the full picture shown to live viewers. It only
//! changes by applying a [`StateUpdate`]:
//! - scalar fields are overwritten when the update supplies them
//! - `logs` is appended to, never replaced
//! - `channel_info` is patched field by field and never erased by an update
//!   that carries nothing for it
//!
//! Clearing (new run, reset) is done by replacing the whole state, not by
//! merging.

use crate::progress::ProgressEvent;
use serde::{Deserialize, Serialize};

/// Lifecycle of an analysis run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisStatus {
    /// Nothing running
    #[default]
    Idle,
    /// Run accepted, first stage not launched yet
    Starting,
    /// A stage is executing
    Running,
    /// Final stage exited zero
    Completed,
    /// Run aborted by a fatal stage or cancellation
    Error,
}

impl AnalysisStatus {
    /// Whether a run currently owns the pipeline
    pub fn is_active(self) -> bool {
        matches!(self, AnalysisStatus::Starting | AnalysisStatus::Running)
    }
}

/// Channel being analysed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub channel_name: String,
    /// Kept as text; workers report either a number or "Unknown"
    pub subscriber_count: String,
    pub total_comments: u64,
}

/// Partial channel information carried by one update
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelInfoPatch {
    pub channel_name: Option<String>,
    pub subscriber_count: Option<String>,
    pub total_comments: Option<u64>,
}

impl ChannelInfoPatch {
    /// True when the patch carries no field at all
    pub fn is_empty(&self) -> bool {
        self.channel_name.is_none() && self.subscriber_count.is_none() && self.total_comments.is_none()
    }

    /// Apply onto the current value
    ///
    /// An absent record is only created once a channel name is known.
    fn apply_to(self, current: &mut Option<ChannelInfo>) {
        match current {
            Some(info) => {
                if let Some(name) = self.channel_name {
                    info.channel_name = name;
                }
                if let Some(count) = self.subscriber_count {
                    info.subscriber_count = count;
                }
                if let Some(total) = self.total_comments {
                    info.total_comments = total;
                }
            }
            None => {
                if let Some(channel_name) = self.channel_name {
                    *current = Some(ChannelInfo {
                        channel_name,
                        subscriber_count: self.subscriber_count.unwrap_or_else(|| "Unknown".to_string()),
                        total_comments: self.total_comments.unwrap_or(0),
                    });
                }
            }
        }
    }
}

/// Complete analysis state as served to viewers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisState {
    pub status: AnalysisStatus,
    pub step: String,
    pub message: String,
    /// Overall pipeline percentage (0-100)
    pub progress: u8,
    pub channel_info: Option<ChannelInfo>,
    pub error: Option<String>,
    pub logs: Vec<String>,
}

impl Default for AnalysisState {
    fn default() -> Self {
        Self::idle()
    }
}

impl AnalysisState {
    /// State at process start and after a reset
    pub fn idle() -> Self {
        Self {
            status: AnalysisStatus::Idle,
            step: String::new(),
            message: String::new(),
            progress: 0,
            channel_info: None,
            error: None,
            logs: Vec::new(),
        }
    }

    /// Fresh state for a run that has just been accepted
    pub fn starting(channel_id: &str) -> Self {
        Self {
            status: AnalysisStatus::Starting,
            step: "initializing".to_string(),
            message: "Preparing to start analysis...".to_string(),
            progress: 0,
            channel_info: None,
            error: None,
            logs: vec![format!("Starting analysis for channel: {}", channel_id)],
        }
    }

    /// Merge an update into this state
    pub fn apply(&mut self, update: StateUpdate) {
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(step) = update.step {
            self.step = step;
        }
        if let Some(message) = update.message {
            self.message = message;
        }
        if let Some(progress) = update.progress {
            self.progress = progress.min(100);
        }
        if let Some(patch) = update.channel_info {
            patch.apply_to(&mut self.channel_info);
        }
        if let Some(error) = update.error {
            self.error = Some(error);
        }
        self.logs.extend(update.logs);
    }

    /// Drop the oldest log lines beyond `max`
    pub fn cap_logs(&mut self, max: usize) {
        if self.logs.len() > max {
            let excess = self.logs.len() - max;
            self.logs.drain(..excess);
        }
    }
}

/// Partial change to [`AnalysisState`]; `None` fields are left untouched
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateUpdate {
    pub status: Option<AnalysisStatus>,
    pub step: Option<String>,
    pub message: Option<String>,
    pub progress: Option<u8>,
    pub channel_info: Option<ChannelInfoPatch>,
    pub error: Option<String>,
    /// Lines appended to the log
    pub logs: Vec<String>,
}

impl StateUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update derived from a worker progress event
    ///
    /// Recognised metadata: `channel_name`, `subscriber_count`,
    /// `total_comments`, `error`. `progress` is copied verbatim; callers
    /// rescale it with [`StateUpdate::with_progress`].
    pub fn from_event(event: &ProgressEvent) -> Self {
        let patch = ChannelInfoPatch {
            channel_name: event.extra_str("channel_name"),
            subscriber_count: event.extra_str("subscriber_count"),
            total_comments: event.extra_u64("total_comments"),
        };

        Self {
            status: None,
            step: Some(event.step.clone()),
            message: Some(event.message.clone()),
            progress: Some(event.progress),
            channel_info: if patch.is_empty() { None } else { Some(patch) },
            error: event.extra_str("error"),
            logs: vec![format!("PROGRESS: {}", event.message)],
        }
    }

    pub fn with_status(mut self, status: AnalysisStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_step(mut self, step: impl Into<String>) -> Self {
        self.step = Some(step.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_log(mut self, line: impl Into<String>) -> Self {
        self.logs.push(line.into());
        self
    }

    /// Update that only appends log lines
    pub fn logs<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            logs: lines.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }
}

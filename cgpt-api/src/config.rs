//! Supervisor configuration (`cgpt-api.toml`)
//!
//! Every key is optional; missing keys fall back to the defaults below.
//!
//! ```toml
//! port = 8000
//! work_dir = "/srv/creatorgpt"
//!
//! [[stages]]
//! name = "extraction"
//! program = "python3"
//! args = ["youtube.py"]
//! stdin = "{channel_id}\n"
//! band = [5, 35]
//! fatal = true
//! ```

use cgpt_common::config::LoggingConfig;
use cgpt_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Placeholder replaced by the requested channel id in stage args and stdin
pub const CHANNEL_ID_PLACEHOLDER: &str = "{channel_id}";
/// Placeholder replaced by the resolved work directory
pub const WORK_DIR_PLACEHOLDER: &str = "{work_dir}";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    /// Directory stages run in and write their artifacts to
    pub work_dir: Option<PathBuf>,
    /// Idle time before viewers receive a heartbeat
    pub heartbeat_interval_secs: u64,
    /// Upper bound for stages that take piped input
    pub stdin_timeout_secs: u64,
    pub max_log_lines: usize,
    /// Messages buffered per viewer before further updates are dropped for it
    pub viewer_buffer: usize,
    pub logging: LoggingConfig,
    pub stages: Vec<StageConfig>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            work_dir: None,
            heartbeat_interval_secs: 15,
            stdin_timeout_secs: 300,
            max_log_lines: 1000,
            viewer_buffer: 32,
            logging: LoggingConfig::default(),
            stages: default_stages(),
        }
    }
}

impl ApiConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }

    pub fn stdin_timeout(&self) -> Duration {
        Duration::from_secs(self.stdin_timeout_secs)
    }

    /// Reject configurations the pipeline cannot run
    pub fn validate(&self) -> Result<()> {
        if self.stages.is_empty() {
            return Err(Error::Config("At least one stage must be configured".to_string()));
        }
        if self.viewer_buffer == 0 {
            return Err(Error::Config("viewer_buffer must be at least 1".to_string()));
        }
        for stage in &self.stages {
            if stage.program.trim().is_empty() {
                return Err(Error::Config(format!("Stage '{}' has no program", stage.name)));
            }
            let ProgressBand(start, end) = stage.band;
            if start > end || end > 100 {
                return Err(Error::Config(format!(
                    "Stage '{}' has invalid progress band [{}, {}]",
                    stage.name, start, end
                )));
            }
        }
        Ok(())
    }
}

/// One worker program in the pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    pub name: String,
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Piped to the worker; the stage then runs with a timeout and its
    /// output is processed after exit
    #[serde(default)]
    pub stdin: Option<String>,
    /// Slice of overall progress this stage reports into
    pub band: ProgressBand,
    /// Whether a failure aborts the run
    #[serde(default = "default_fatal")]
    pub fatal: bool,
}

fn default_fatal() -> bool {
    true
}

/// `[start, end]` percentage window of the overall pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressBand(pub u8, pub u8);

impl ProgressBand {
    pub fn start(self) -> u8 {
        self.0
    }

    pub fn end(self) -> u8 {
        self.1
    }

    /// Map a stage-relative percentage into this band
    pub fn scale(self, stage_progress: u8) -> u8 {
        let p = u16::from(stage_progress.min(100));
        let (start, end) = (u16::from(self.0), u16::from(self.1.max(self.0)));
        (start + p * (end - start) / 100) as u8
    }
}

fn default_stages() -> Vec<StageConfig> {
    vec![
        StageConfig {
            name: "extraction".to_string(),
            program: "python3".to_string(),
            args: vec!["youtube.py".to_string()],
            stdin: Some(format!("{}\n", CHANNEL_ID_PLACEHOLDER)),
            band: ProgressBand(5, 35),
            fatal: true,
        },
        StageConfig {
            name: "enrichment".to_string(),
            program: "cgpt-enrich".to_string(),
            args: vec!["--work-dir".to_string(), WORK_DIR_PLACEHOLDER.to_string()],
            stdin: None,
            band: ProgressBand(35, 70),
            fatal: false,
        },
        StageConfig {
            name: "scoring".to_string(),
            program: "python3".to_string(),
            args: vec!["sentiment_score.py".to_string()],
            stdin: None,
            band: ProgressBand(70, 100),
            fatal: true,
        },
    ]
}

/// Substitute run placeholders in a stage argument or stdin template
pub fn expand_placeholders(template: &str, channel_id: &str, work_dir: &str) -> String {
    template
        .replace(CHANNEL_ID_PLACEHOLDER, channel_id)
        .replace(WORK_DIR_PLACEHOLDER, work_dir)
}

//! Enrichment worker configuration (`cgpt-enrich.toml`)

use cgpt_common::config::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichConfig {
    pub work_dir: Option<PathBuf>,
    /// Workload file, relative to the work directory
    pub input_file: Option<String>,
    pub logging: LoggingConfig,
    pub batch: BatchConfig,
    pub gemini: GeminiConfig,
}

/// Default workload file: one comment per non-empty line
pub const DEFAULT_INPUT_FILE: &str = "cleaned_comments.txt";

impl EnrichConfig {
    pub fn input_file(&self) -> &str {
        self.input_file.as_deref().unwrap_or(DEFAULT_INPUT_FILE)
    }
}

/// `[batch]` table
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Items per batch file
    pub batch_size: usize,
    pub max_batches: usize,
    /// Attempts per batch, first one included
    pub max_retries: u32,
    /// Output artifacts at or below this size do not count as completed
    pub min_output_bytes: u64,
    pub backoff: BackoffPolicy,
    pub pause_after_success_ms: u64,
    /// Every one must appear in an accepted response
    pub required_markers: Vec<String>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 500,
            max_batches: 10,
            max_retries: 3,
            min_output_bytes: 200,
            backoff: BackoffPolicy::default(),
            pause_after_success_ms: 2000,
            required_markers: vec![
                "SENTIMENT ANALYSIS SUMMARY".to_string(),
                "comments processed:".to_string(),
                "SENTIMENT BREAKDOWN".to_string(),
            ],
        }
    }
}

impl BatchConfig {
    pub fn pause_after_success(&self) -> Duration {
        Duration::from_millis(self.pause_after_success_ms)
    }
}

/// Delay before retrying a failed attempt
///
/// ```toml
/// [batch.backoff]
/// kind = "exponential"
/// base_ms = 1000
/// factor = 2
/// max_ms = 30000
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BackoffPolicy {
    /// `attempt * unit_ms`
    Linear { unit_ms: u64 },
    /// `base_ms * factor^(attempt - 1)`, capped at `max_ms`
    Exponential { base_ms: u64, factor: u32, max_ms: u64 },
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy::Linear { unit_ms: 5000 }
    }
}

impl BackoffPolicy {
    /// No waiting at all
    pub fn none() -> Self {
        BackoffPolicy::Linear { unit_ms: 0 }
    }

    /// Delay after the `attempt`-th failure (1-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let ms = match *self {
            BackoffPolicy::Linear { unit_ms } => unit_ms.saturating_mul(u64::from(attempt)),
            BackoffPolicy::Exponential {
                base_ms,
                factor,
                max_ms,
            } => u64::from(factor)
                .checked_pow(attempt - 1)
                .and_then(|mult| base_ms.checked_mul(mult))
                .unwrap_or(max_ms)
                .min(max_ms),
        };
        Duration::from_millis(ms)
    }
}

/// `[gemini]` table
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeminiConfig {
    pub model: String,
    pub endpoint: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub timeout_secs: u64,
    /// Environment variable holding the API key
    pub api_key_env: String,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            model: "gemini-2.0-flash".to_string(),
            endpoint: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            temperature: 0.1,
            max_output_tokens: 8192,
            timeout_secs: 120,
            api_key_env: "GEMINI_API_KEY".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_backoff() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay(1), Duration::from_secs(5));
        assert_eq!(policy.delay(2), Duration::from_secs(10));
        assert_eq!(BackoffPolicy::none().delay(3), Duration::ZERO);
    }

    #[test]
    fn test_exponential_backoff_capped() {
        let policy = BackoffPolicy::Exponential {
            base_ms: 100,
            factor: 2,
            max_ms: 500,
        };
        assert_eq!(policy.delay(1), Duration::from_millis(100));
        assert_eq!(policy.delay(3), Duration::from_millis(400));
        assert_eq!(policy.delay(4), Duration::from_millis(500));
        assert_eq!(policy.delay(80), Duration::from_millis(500));
    }

    #[test]
    fn test_worker_toml() {
        let config: EnrichConfig = toml::from_str(
            r#"
            input_file = "comments.txt"

            [batch]
            batch_size = 50
            backoff = { kind = "exponential", base_ms = 10, factor = 3, max_ms = 100 }

            [gemini]
            model = "gemini-1.5-pro"
            "#,
        )
        .unwrap();

        assert_eq!(config.input_file(), "comments.txt");
        assert_eq!(config.batch.batch_size, 50);
        assert_eq!(config.batch.max_retries, 3);
        assert_eq!(config.batch.required_markers.len(), 3);
        assert_eq!(config.batch.backoff.delay(2), Duration::from_millis(30));
        assert_eq!(config.gemini.model, "gemini-1.5-pro");
        assert_eq!(config.gemini.max_output_tokens, 8192);
    }

    #[test]
    fn test_sample_config_parses() {
        let sample: EnrichConfig = toml::from_str(include_str!("../../config/cgpt-enrich.toml")).unwrap();
        let defaults = BatchConfig::default();
        assert_eq!(sample.batch.required_markers, defaults.required_markers);
        assert_eq!(sample.batch.backoff, defaults.backoff);
        assert_eq!(sample.gemini.api_key_env, "GEMINI_API_KEY");
    }

    #[test]
    fn test_defaults() {
        let config = EnrichConfig::default();
        assert_eq!(config.input_file(), DEFAULT_INPUT_FILE);
        assert_eq!(config.batch.min_output_bytes, 200);
        assert_eq!(config.batch.pause_after_success(), Duration::from_secs(2));
    }
}

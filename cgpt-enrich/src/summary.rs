//! Batch status summary (`batch_processing_status.json`)
//!
//! Display only. Completion is always re-derived from output artifacts on
//! the next run, never read back from this file.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use crate::artifacts::STATUS_FILE;
use crate::error::BatchResult;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub last_updated: DateTime<Utc>,
    pub completed_batches: Vec<u32>,
    pub failed_batches: Vec<u32>,
    pub total_batches: usize,
    /// Percentage of batches completed (0 when there are no batches)
    pub success_rate: f64,
}

impl BatchSummary {
    pub fn new(mut completed: Vec<u32>, mut failed: Vec<u32>) -> Self {
        completed.sort_unstable();
        failed.sort_unstable();
        let total_batches = completed.len() + failed.len();
        let success_rate = if total_batches == 0 {
            0.0
        } else {
            completed.len() as f64 * 100.0 / total_batches as f64
        };

        Self {
            last_updated: Utc::now(),
            completed_batches: completed,
            failed_batches: failed,
            total_batches,
            success_rate,
        }
    }

    /// Write the summary into `dir`
    pub fn save(&self, dir: &Path) -> BatchResult<()> {
        let path = dir.join(STATUS_FILE);
        std::fs::write(&path, serde_json::to_string_pretty(self)?)?;
        info!(
            path = %path.display(),
            completed = self.completed_batches.len(),
            failed = self.failed_batches.len(),
            "Status summary saved"
        );
        Ok(())
    }

    pub fn load(dir: &Path) -> BatchResult<Self> {
        let content = std::fs::read_to_string(dir.join(STATUS_FILE))?;
        Ok(serde_json::from_str(&content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_success_rate() {
        let summary = BatchSummary::new(vec![3, 1], vec![2, 4]);
        assert_eq!(summary.completed_batches, vec![1, 3]);
        assert_eq!(summary.total_batches, 4);
        assert_eq!(summary.success_rate, 50.0);

        assert_eq!(BatchSummary::new(vec![], vec![]).success_rate, 0.0);
    }

    #[test]
    fn test_save_writes_expected_keys() {
        let dir = TempDir::new().unwrap();
        BatchSummary::new(vec![1, 2], vec![]).save(dir.path()).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join(STATUS_FILE)).unwrap()).unwrap();
        for key in ["last_updated", "completed_batches", "failed_batches", "total_batches", "success_rate"] {
            assert!(raw.get(key).is_some(), "missing {}", key);
        }
        assert_eq!(raw["success_rate"], 100.0);

        let loaded = BatchSummary::load(dir.path()).unwrap();
        assert_eq!(loaded.completed_batches, vec![1, 2]);
    }
}

//! Generated artifact listing
//!
//! GET /api/available-files reports which pipeline outputs exist in the work
//! directory. Only names are returned; serving the files is left to a static
//! file server.

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use std::path::Path;

use crate::{error::ApiResult, AppState};

const DASHBOARD_FILE: &str = "sentiment_analysis_dashboard.png";
const CHARTS_DIR: &str = "charts";
const REPORT_FILES: &[&str] = &["sentiment_analysis_summary.txt", "detailed_sentiment_results.txt"];
const DATA_FILES: &[&str] = &["sentiment_results.csv", "cleaned_all_comments.csv", "all_comments.csv"];
const BATCH_SUMMARY_FILE: &str = "batch_processing_status.json";

/// GET /api/available-files response
#[derive(Debug, Default, Serialize)]
pub struct AvailableFiles {
    pub dashboard: Option<String>,
    pub charts: Vec<String>,
    pub reports: Vec<String>,
    pub data_files: Vec<String>,
    /// Enrichment outputs (`analyzed_comments_batch_{n}.txt`)
    pub batch_outputs: Vec<String>,
    pub batch_summary: Option<String>,
}

/// GET /api/available-files
pub async fn available_files(State(state): State<AppState>) -> ApiResult<Json<AvailableFiles>> {
    let work_dir = state.work_dir.clone();
    let files = scan_work_dir(&work_dir).await?;
    Ok(Json(files))
}

/// Collect artifact names present under `work_dir`
pub async fn scan_work_dir(work_dir: &Path) -> std::io::Result<AvailableFiles> {
    let mut files = AvailableFiles::default();

    if !tokio::fs::try_exists(work_dir).await? {
        return Ok(files);
    }

    if is_file(&work_dir.join(DASHBOARD_FILE)).await {
        files.dashboard = Some(DASHBOARD_FILE.to_string());
    }
    if is_file(&work_dir.join(BATCH_SUMMARY_FILE)).await {
        files.batch_summary = Some(BATCH_SUMMARY_FILE.to_string());
    }
    for name in REPORT_FILES {
        if is_file(&work_dir.join(name)).await {
            files.reports.push(name.to_string());
        }
    }
    for name in DATA_FILES {
        if is_file(&work_dir.join(name)).await {
            files.data_files.push(name.to_string());
        }
    }

    let charts_dir = work_dir.join(CHARTS_DIR);
    if tokio::fs::try_exists(&charts_dir).await? {
        files.charts = list_names(&charts_dir, |name| name.ends_with(".png")).await?;
    }

    let mut batches = list_names(work_dir, |name| {
        name.starts_with("analyzed_comments_batch_") && name.ends_with(".txt")
    })
    .await?;
    batches.sort_by_key(|name| batch_number(name));
    files.batch_outputs = batches;

    Ok(files)
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

async fn list_names<F>(dir: &Path, keep: F) -> std::io::Result<Vec<String>>
where
    F: Fn(&str) -> bool,
{
    let mut names = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if let Some(name) = entry.file_name().to_str() {
            if keep(name) {
                names.push(name.to_string());
            }
        }
    }
    names.sort();
    Ok(names)
}

fn batch_number(name: &str) -> u32 {
    name.trim_start_matches("analyzed_comments_batch_")
        .trim_end_matches(".txt")
        .parse()
        .unwrap_or(u32::MAX)
}

/// Build artifact listing routes
pub fn files_routes() -> Router<AppState> {
    Router::new().route("/api/available-files", get(available_files))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_scan_lists_present_artifacts() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        std::fs::write(root.join(DASHBOARD_FILE), b"png").unwrap();
        std::fs::write(root.join("all_comments.csv"), b"a,b").unwrap();
        std::fs::write(root.join("analyzed_comments_batch_10.txt"), b"x").unwrap();
        std::fs::write(root.join("analyzed_comments_batch_2.txt"), b"x").unwrap();
        std::fs::create_dir(root.join(CHARTS_DIR)).unwrap();
        std::fs::write(root.join(CHARTS_DIR).join("pie.png"), b"png").unwrap();
        std::fs::write(root.join(CHARTS_DIR).join("notes.txt"), b"-").unwrap();

        let files = scan_work_dir(root).await.unwrap();

        assert_eq!(files.dashboard.as_deref(), Some(DASHBOARD_FILE));
        assert_eq!(files.data_files, vec!["all_comments.csv"]);
        assert_eq!(files.charts, vec!["pie.png"]);
        assert_eq!(
            files.batch_outputs,
            vec!["analyzed_comments_batch_2.txt", "analyzed_comments_batch_10.txt"]
        );
        assert!(files.reports.is_empty());
        assert!(files.batch_summary.is_none());
    }

    #[tokio::test]
    async fn test_missing_work_dir_is_empty() {
        let dir = TempDir::new().unwrap();
        let files = scan_work_dir(&dir.path().join("nope")).await.unwrap();
        assert!(files.dashboard.is_none());
        assert!(files.batch_outputs.is_empty());
    }
}

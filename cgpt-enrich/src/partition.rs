//! Workload partitioning
//!
//! Splits the workload into numbered batch input files. Each file carries a
//! `BATCH INFORMATION` header followed by numbered `COMMENT i:` blocks.

use cgpt_common::{ProgressEvent, ProgressReporter};
use chrono::Local;
use std::ops::Range;
use std::path::Path;
use tracing::{info, warn};

use crate::artifacts;
use crate::error::{BatchError, BatchResult};

const HEADER_RULE_WIDTH: usize = 50;
const COMMENT_RULE_WIDTH: usize = 40;

/// Read the workload: one item per non-empty line
pub fn load_workload(path: &Path) -> BatchResult<Vec<String>> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(BatchError::WorkloadMissing(path.display().to_string()))
        }
        Err(e) => return Err(e.into()),
    };

    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

/// Index ranges of at most `batch_size` items, at most `max_batches` ranges
///
/// The last range may be shorter. Items beyond `batch_size * max_batches`
/// are not assigned to any batch.
pub fn plan_batches(total: usize, batch_size: usize, max_batches: usize) -> Vec<Range<usize>> {
    let batch_size = batch_size.max(1);
    (0..total)
        .step_by(batch_size)
        .take(max_batches)
        .map(|start| start..(start + batch_size).min(total))
        .collect()
}

/// Render one batch input file
pub fn render_batch(batch_number: u32, range: &Range<usize>, items: &[String]) -> String {
    let header_rule = "=".repeat(HEADER_RULE_WIDTH);
    let comment_rule = "-".repeat(COMMENT_RULE_WIDTH);

    let mut out = format!(
        "BATCH INFORMATION\n{rule}\nBatch Number: {}\nTotal Comments in File: {}\nComment Range: {} to {}\nCreated: {}\n{rule}\n\n",
        batch_number,
        items.len(),
        range.start + 1,
        range.end,
        Local::now().format("%Y-%m-%d %H:%M:%S"),
        rule = header_rule,
    );

    for (i, item) in items.iter().enumerate() {
        out.push_str(&format!("COMMENT {}:\n{}\n{}\n", i + 1, item.trim(), comment_rule));
    }
    out
}

/// Write batch input files for `items` into `dir`
///
/// Reports progress from 5 to 20 percent. Returns the created batch numbers.
pub fn write_batches(
    dir: &Path,
    items: &[String],
    batch_size: usize,
    max_batches: usize,
    reporter: &ProgressReporter,
) -> BatchResult<Vec<u32>> {
    reporter.emit("batch_creation", "Creating comment batch files...", 5);
    reporter.report(
        &ProgressEvent::new(
            "batch_prep",
            format!("Preparing {} comments for batch processing", items.len()),
            10,
        )
        .with_extra("total_comments", items.len()),
    );

    let ranges = plan_batches(items.len(), batch_size, max_batches);
    let assigned = ranges.last().map(|r| r.end).unwrap_or(0);
    if assigned < items.len() {
        warn!(
            total = items.len(),
            assigned,
            max_batches,
            "Workload exceeds batch capacity, trailing items skipped"
        );
    }

    let total_batches = ranges.len();
    let mut created = Vec::with_capacity(total_batches);
    for (index, range) in ranges.iter().enumerate() {
        let batch_number = (index + 1) as u32;
        let path = artifacts::input_path(dir, batch_number);
        std::fs::write(&path, render_batch(batch_number, range, &items[range.clone()]))?;
        created.push(batch_number);

        let progress = 10 + ((index + 1) * 10 / total_batches) as u8;
        reporter.report(
            &ProgressEvent::new(
                "batch_file_created",
                format!("Created {}", artifacts::input_name(batch_number)),
                progress,
            )
            .with_extra("batch_number", batch_number)
            .with_extra("total_batches", total_batches),
        );
        info!(batch = batch_number, items = range.len(), "Batch file created");
    }

    reporter.emit(
        "batch_creation_complete",
        format!("Created {} batch files", created.len()),
        20,
    );
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_plan_keeps_partial_last_batch() {
        assert_eq!(plan_batches(1200, 500, 10), vec![0..500, 500..1000, 1000..1200]);
        assert_eq!(plan_batches(3, 500, 10), vec![0..3]);
        assert!(plan_batches(0, 500, 10).is_empty());
    }

    #[test]
    fn test_plan_respects_max_batches() {
        let plan = plan_batches(100, 10, 3);
        assert_eq!(plan, vec![0..10, 10..20, 20..30]);
    }

    #[test]
    fn test_render_layout() {
        let items = vec!["great video".to_string(), "  meh  ".to_string()];
        let text = render_batch(2, &(500..502), &items);

        assert!(text.starts_with("BATCH INFORMATION\n"));
        assert!(text.contains("Batch Number: 2\n"));
        assert!(text.contains("Total Comments in File: 2\n"));
        assert!(text.contains("Comment Range: 501 to 502\n"));
        assert!(text.contains("COMMENT 1:\ngreat video\n----------------------------------------\n"));
        assert!(text.contains("COMMENT 2:\nmeh\n"));
    }

    #[test]
    fn test_render_header_line_order() {
        let items = vec!["only".to_string()];
        let text = render_batch(1, &(0..1), &items);
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines[0], "BATCH INFORMATION");
        assert_eq!(lines[1], "=".repeat(HEADER_RULE_WIDTH));
        assert_eq!(lines[2], "Batch Number: 1");
        assert_eq!(lines[3], "Total Comments in File: 1");
        assert_eq!(lines[4], "Comment Range: 1 to 1");
        assert!(lines[5].starts_with("Created: "));
        assert_eq!(lines[6], lines[1]);
        assert_eq!(lines[7], "");
        assert_eq!(&lines[8..], ["COMMENT 1:", "only", "-".repeat(COMMENT_RULE_WIDTH).as_str()]);
    }

    #[test]
    fn test_load_workload_skips_blank_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cleaned_comments.txt");
        std::fs::write(&path, "first\n\n   \nsecond\r\n").unwrap();
        assert_eq!(load_workload(&path).unwrap(), vec!["first", "second"]);

        let missing = load_workload(&dir.path().join("absent.txt"));
        assert!(matches!(missing, Err(BatchError::WorkloadMissing(_))));
    }

    #[test]
    fn test_write_batches_creates_files() {
        let dir = TempDir::new().unwrap();
        let items: Vec<String> = (1..=7).map(|i| format!("comment {}", i)).collect();

        let created = write_batches(dir.path(), &items, 3, 10, &ProgressReporter::discard()).unwrap();

        assert_eq!(created, vec![1, 2, 3]);
        let last = std::fs::read_to_string(artifacts::input_path(dir.path(), 3)).unwrap();
        assert!(last.contains("Total Comments in File: 1"));
        assert!(last.contains("comment 7"));
    }
}

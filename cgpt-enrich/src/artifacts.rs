//! Batch artifact naming and discovery
//!
//! All artifacts live flat in the work directory:
//! - `comments_batch_{n}.txt`: batch input
//! - `analyzed_comments_batch_{n}.txt`: batch output
//! - `batch_processing_status.json`: display-only summary

use std::path::{Path, PathBuf};

const INPUT_PREFIX: &str = "comments_batch_";
const OUTPUT_PREFIX: &str = "analyzed_comments_batch_";
const ARTIFACT_SUFFIX: &str = ".txt";

pub const STATUS_FILE: &str = "batch_processing_status.json";

pub fn input_name(batch_number: u32) -> String {
    format!("{}{}{}", INPUT_PREFIX, batch_number, ARTIFACT_SUFFIX)
}

pub fn output_name(batch_number: u32) -> String {
    format!("{}{}{}", OUTPUT_PREFIX, batch_number, ARTIFACT_SUFFIX)
}

pub fn input_path(dir: &Path, batch_number: u32) -> PathBuf {
    dir.join(input_name(batch_number))
}

pub fn output_path(dir: &Path, batch_number: u32) -> PathBuf {
    dir.join(output_name(batch_number))
}

/// Batch number of an input artifact name (`comments_batch_7.txt` → 7)
///
/// Output artifacts never match: their prefix differs before the number.
pub fn parse_input_name(name: &str) -> Option<u32> {
    name.strip_prefix(INPUT_PREFIX)?
        .strip_suffix(ARTIFACT_SUFFIX)?
        .parse()
        .ok()
        .filter(|n| *n > 0)
}

/// Sorted batch numbers of every input artifact in `dir`
pub fn discover_inputs(dir: &Path) -> std::io::Result<Vec<u32>> {
    let mut numbers = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        if let Some(n) = entry.file_name().to_str().and_then(parse_input_name) {
            numbers.push(n);
        }
    }
    numbers.sort_unstable();
    numbers.dedup();
    Ok(numbers)
}

/// Whether the batch's output exists and exceeds `min_bytes`
pub fn output_is_complete(dir: &Path, batch_number: u32, min_bytes: u64) -> bool {
    std::fs::metadata(output_path(dir, batch_number))
        .map(|m| m.is_file() && m.len() > min_bytes)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_input_name() {
        assert_eq!(parse_input_name("comments_batch_3.txt"), Some(3));
        assert_eq!(parse_input_name("comments_batch_12.txt"), Some(12));
        assert_eq!(parse_input_name("analyzed_comments_batch_3.txt"), None);
        assert_eq!(parse_input_name("comments_batch_x.txt"), None);
        assert_eq!(parse_input_name("comments_batch_0.txt"), None);
        assert_eq!(parse_input_name("comments_batch_3.txt.bak"), None);
    }

    #[test]
    fn test_discover_inputs_sorted() {
        let dir = TempDir::new().unwrap();
        for name in ["comments_batch_10.txt", "comments_batch_2.txt", "analyzed_comments_batch_2.txt", "notes.txt"] {
            std::fs::write(dir.path().join(name), "x").unwrap();
        }
        assert_eq!(discover_inputs(dir.path()).unwrap(), vec![2, 10]);
    }

    #[test]
    fn test_output_completeness_threshold() {
        let dir = TempDir::new().unwrap();
        assert!(!output_is_complete(dir.path(), 1, 200));

        std::fs::write(output_path(dir.path(), 1), "x".repeat(200)).unwrap();
        assert!(!output_is_complete(dir.path(), 1, 200));

        std::fs::write(output_path(dir.path(), 1), "x".repeat(201)).unwrap();
        assert!(output_is_complete(dir.path(), 1, 200));
    }
}

//! Worker binary behaviour at the process boundary

use std::process::Command;
use tempfile::TempDir;

#[test]
fn test_config_error_reported_once_with_failure_exit() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("absent.toml");

    let output = Command::new(env!("CARGO_BIN_EXE_cgpt-enrich"))
        .arg("--config")
        .arg(&missing)
        .arg("--work-dir")
        .arg(dir.path())
        .current_dir(dir.path())
        .env_remove("RUST_LOG")
        .env_remove("CGPT_ENRICH_CONFIG")
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
    assert!(output.stdout.is_empty(), "stdout is reserved for progress lines");

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert_eq!(
        stderr.matches("Failed to load configuration").count(),
        1,
        "stderr was: {}",
        stderr
    );
}

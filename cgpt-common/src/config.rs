//! Configuration loading and work directory resolution

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable naming the shared work directory
pub const WORK_DIR_ENV: &str = "CGPT_WORK_DIR";

/// Directory name used under the platform data directory
const APP_DIR_NAME: &str = "creatorgpt";

/// `[logging]` table shared by every binary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset (e.g. "info", "cgpt_api=debug")
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Work directory resolution, highest priority first:
/// 1. Command-line argument
/// 2. Environment variable
/// 3. `work_dir` from the TOML config file
/// 4. OS-dependent default
pub fn resolve_work_dir(
    cli_arg: Option<&Path>,
    env_var_name: &str,
    config_value: Option<&Path>,
) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(path) = config_value {
        return path.to_path_buf();
    }

    default_work_dir()
}

/// OS-dependent default work directory
pub fn default_work_dir() -> PathBuf {
    // ~/.local/share/creatorgpt, ~/Library/Application Support/creatorgpt,
    // %LOCALAPPDATA%\creatorgpt
    dirs::data_local_dir()
        .map(|d| d.join(APP_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from("./creatorgpt_data"))
}

/// Parse a TOML config file
pub fn load_toml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Cannot read {}: {}", path.display(), e)))?;

    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Invalid TOML in {}: {}", path.display(), e)))
}

/// Parse a TOML config file when one is given, defaults otherwise
///
/// A path that was explicitly given but cannot be read is an error.
pub fn load_toml_or_default<T: DeserializeOwned + Default>(path: Option<&Path>) -> Result<T> {
    match path {
        Some(path) => load_toml(path),
        None => Ok(T::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[derive(Debug, Default, Deserialize, PartialEq)]
    #[serde(default)]
    struct Sample {
        port: u16,
        logging: LoggingConfig,
    }

    #[test]
    fn test_cli_argument_wins() {
        std::env::set_var("CGPT_TEST_WORK_DIR_CLI", "/from/env");
        let resolved = resolve_work_dir(
            Some(Path::new("/from/cli")),
            "CGPT_TEST_WORK_DIR_CLI",
            Some(Path::new("/from/toml")),
        );
        assert_eq!(resolved, PathBuf::from("/from/cli"));
    }

    #[test]
    fn test_env_beats_config_file() {
        std::env::set_var("CGPT_TEST_WORK_DIR_ENV", "/from/env");
        let resolved =
            resolve_work_dir(None, "CGPT_TEST_WORK_DIR_ENV", Some(Path::new("/from/toml")));
        assert_eq!(resolved, PathBuf::from("/from/env"));
    }

    #[test]
    fn test_config_file_then_default() {
        let resolved = resolve_work_dir(
            None,
            "CGPT_TEST_WORK_DIR_UNSET",
            Some(Path::new("/from/toml")),
        );
        assert_eq!(resolved, PathBuf::from("/from/toml"));

        let fallback = resolve_work_dir(None, "CGPT_TEST_WORK_DIR_UNSET", None);
        assert!(fallback.ends_with("creatorgpt") || fallback.ends_with("creatorgpt_data"));
    }

    #[test]
    fn test_load_toml_with_partial_tables() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sample.toml");
        std::fs::write(&path, "port = 8000\n").unwrap();

        let sample: Sample = load_toml(&path).unwrap();
        assert_eq!(sample.port, 8000);
        assert_eq!(sample.logging.level, "info");
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let dir = TempDir::new().unwrap();
        let result: Result<Sample> = load_toml_or_default(Some(&dir.path().join("absent.toml")));
        assert!(matches!(result, Err(Error::Config(_))));

        let defaults: Sample = load_toml_or_default(None).unwrap();
        assert_eq!(defaults, Sample::default());
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "port = = 1").unwrap();
        let result: Result<Sample> = load_toml(&path);
        assert!(matches!(result, Err(Error::Config(_))));
    }
}

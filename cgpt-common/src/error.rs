//! Shared error type

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Failures in code shared by the supervisor and the workers
#[derive(Error, Debug)]
pub enum Error {
    /// Config file unreadable, malformed or semantically invalid
    #[error("Configuration error: {0}")]
    Config(String),
}

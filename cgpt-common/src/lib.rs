//! # CreatorGPT Common Library
//!
//! Shared code for the CreatorGPT supervisor and its worker processes:
//! - Progress line protocol (`PROGRESS:<json>`) and the worker-side reporter
//! - Analysis state model and its merge rules
//! - Configuration loading and work directory resolution
//! - Common error type

pub mod config;
pub mod error;
pub mod progress;
pub mod state;

pub use error::{Error, Result};
pub use progress::{DecodedLine, ProgressEvent, ProgressReporter, PROGRESS_PREFIX};
pub use state::{AnalysisState, AnalysisStatus, ChannelInfo, ChannelInfoPatch, StateUpdate};

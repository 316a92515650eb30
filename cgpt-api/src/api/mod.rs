//! HTTP API handlers for cgpt-api
//!
//! Job control over REST, live state over WebSocket and SSE.

pub mod analysis;
pub mod files;
pub mod health;
pub mod live;

pub use analysis::analysis_routes;
pub use files::files_routes;
pub use health::health_routes;
pub use live::live_routes;

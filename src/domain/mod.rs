//! Domain types
//!
//! The persisted application state snapshot and its building blocks.

mod state;

pub use state::{
    ApplicationState, DisplayMode, Identity, MIN_TRANSITION_INTERVAL_SECS, SCHEMA_VERSION,
};

/// Current time as milliseconds since the Unix epoch
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

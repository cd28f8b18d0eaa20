//! Utility layer - errors and small helpers

pub mod errors;

pub use errors::{ChorusError, ChorusResult};

/// Wall-clock timestamp in milliseconds, as stamped on slot state.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Cuts `s` to at most `max` characters, marking the cut.
pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((end, _)) => format!("{}...[truncated]", &s[..end]),
        None => s.to_string(),
    }
}

//! Time utilities.
//!
//! All timestamps in this crate are Unix seconds taken from `chrono::Utc::now()`.

/// Returns the current Unix timestamp in seconds.
pub fn now_timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}

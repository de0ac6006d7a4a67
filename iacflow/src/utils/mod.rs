//! Utility functions for timestamps and filesystem path safety.

pub mod paths;
pub mod timestamps;

pub use paths::{safe_relative_path, validate_workspace_segment};
pub use timestamps::{is_expired, iso_timestamp, now_utc, session_suffix, Timestamp};

//! Timestamp helpers.

use chrono::{DateTime, Utc};

/// Represents a timestamp that can be serialized/deserialized.
pub type Timestamp = DateTime<Utc>;

/// Returns the current UTC time as an ISO 8601 formatted string.
///
/// # Examples
///
/// ```
/// use iacflow::utils::iso_timestamp;
///
/// let ts = iso_timestamp();
/// assert!(ts.contains('T'));
/// assert!(ts.ends_with("+00:00"));
/// ```
#[must_use]
pub fn iso_timestamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.6f+00:00").to_string()
}

/// Returns the current UTC timestamp.
#[must_use]
pub fn now_utc() -> Timestamp {
    Utc::now()
}

/// Returns a suffix derived from the current time, for session names.
#[must_use]
pub fn session_suffix() -> String {
    Utc::now().timestamp_millis().to_string()
}

/// Returns true if an RFC 3339 expiry lies in the past.
///
/// Unparseable values are treated as not expired.
#[must_use]
pub fn is_expired(expiration: &str) -> bool {
    DateTime::parse_from_rfc3339(expiration.trim())
        .map(|exp| exp.with_timezone(&Utc) <= Utc::now())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_iso_timestamp_format() {
        let ts = iso_timestamp();
        assert!(ts.contains('T'));
        assert!(ts.contains(':'));
    }

    #[test]
    fn test_session_suffix_is_numeric() {
        assert!(session_suffix().chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn test_is_expired() {
        let past = (Utc::now() - Duration::hours(1)).to_rfc3339();
        let future = (Utc::now() + Duration::hours(1)).to_rfc3339();

        assert!(is_expired(&past));
        assert!(!is_expired(&future));
        assert!(!is_expired("not a date"));
    }
}

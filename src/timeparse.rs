//! Time-anchor parsing for the `time`, `start`, and `end` parameters.

use chrono::{DateTime, Utc};

/// Parse a client time anchor into unix seconds.
///
/// Accepts decimal unix seconds (fractional part truncated) or an RFC 3339
/// timestamp. Anything else, including an absent value, falls back to the
/// current wall time; the client never sees a parse error.
pub fn parse_time(value: Option<&str>) -> i64 {
    let Some(s) = value else {
        return Utc::now().timestamp();
    };
    if let Ok(secs) = s.parse::<i64>() {
        return secs;
    }
    if let Ok(secs) = s.parse::<f64>() {
        return secs as i64;
    }
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return t.timestamp();
    }
    Utc::now().timestamp()
}

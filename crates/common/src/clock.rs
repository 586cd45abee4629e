//! Wall-clock helpers. All times in the cache are Unix seconds.

/// Unix timestamp in whole seconds
pub type Timestamp = i64;

/// Current Unix time in seconds
pub fn now() -> Timestamp {
    time::OffsetDateTime::now_utc().unix_timestamp()
}

/// Render a duration in seconds with a single, coarse unit
pub fn duration_compact(secs: i64) -> String {
    match secs.unsigned_abs() {
        s if s < 60 => format!("{}s", s),
        s if s < 3600 => format!("{}m", s / 60),
        s if s < 86400 => format!("{}h", s / 3600),
        s => format!("{}d", s / 86400),
    }
}

/// Render how long ago `then` was, relative to `now`
pub fn friendly_time_since(then: Timestamp, now: Timestamp) -> String {
    format!("{} ago", duration_compact(now.saturating_sub(then)))
}

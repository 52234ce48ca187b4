//! Time formatting helpers.

use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{Local, TimeZone};

/// Current unix time in whole seconds, truncated to the 32-bit wire field.
pub fn unix_now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

/// Render a wire timestamp as `[HH:MM:SS]` in local time.
///
/// # Example
///
/// ```
/// use dechat::util::time::clock_time;
///
/// let s = clock_time(0);
/// assert_eq!(s.len(), 10);
/// assert!(s.starts_with('[') && s.ends_with(']'));
/// ```
pub fn clock_time(unix_secs: u32) -> String {
    match Local.timestamp_opt(i64::from(unix_secs), 0).single() {
        Some(t) => t.format("[%H:%M:%S]").to_string(),
        None => "[??:??:??]".to_owned(),
    }
}

/// Format an uptime in seconds as a human-readable period.
///
/// Uses the largest nonzero unit as the leading component and appends the
/// raw second count once the period exceeds a minute.
///
/// # Example
///
/// ```
/// use dechat::util::time::format_uptime;
///
/// assert_eq!(format_uptime(42), "42 seconds");
/// assert_eq!(format_uptime(90), "1 minutes and 30 seconds (90 seconds)");
/// ```
pub fn format_uptime(total_secs: u64) -> String {
    let (mins, secs) = (total_secs / 60, total_secs % 60);
    let (hours, mins) = (mins / 60, mins % 60);
    let (days, hours) = (hours / 24, hours % 24);

    let formatted = if days != 0 {
        format!("{days} days, {hours} hours, {mins} minutes and {secs} seconds")
    } else if hours != 0 {
        format!("{hours} hours, {mins} minutes and {secs} seconds")
    } else if mins != 0 {
        format!("{mins} minutes and {secs} seconds")
    } else {
        return format!("{secs} seconds");
    };

    format!("{formatted} ({total_secs} seconds)")
}

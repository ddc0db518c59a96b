//! Small display helpers for table output.

use chrono::{DateTime, Local};

/// Truncate a string to `max` characters, appending an ellipsis marker
pub fn truncate_string(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", truncated)
    }
}

/// Render an optional value, using "-" for absent
pub fn format_optional(value: Option<&str>) -> String {
    match value {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => "-".to_string(),
    }
}

/// Render an RFC 3339 timestamp in local time. Unparsable input is shown
/// as-is rather than hidden.
pub fn format_date(raw: &str) -> String {
    match DateTime::parse_from_rfc3339(raw) {
        Ok(dt) => dt.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string(),
        Err(_) => raw.to_string(),
    }
}

//! Timestamp normalization to the historian's GMT layout
//!
//! Accepted inputs, tried in order: RFC 3339 with an uppercase `T` separator
//! and a `Z` or `±HH:MM` zone (fractional seconds optional), then
//! `YYYY-MM-DD HH:MM:SS` and `YYYY-MM-DDTHH:MM:SS`. Zone-less layouts are taken
//! as UTC. Anything else, including a space or lowercase `t` before a zone, is
//! returned unchanged.

use chrono::{DateTime, NaiveDateTime, Utc};

/// Output layout, e.g. `05-Jan-2024 13:45:02 GMT`
pub const GMT_LAYOUT: &str = "%d-%b-%Y %H:%M:%S GMT";

const OFFSET_LAYOUT: &str = "%Y-%m-%dT%H:%M:%S%.f%:z";
const ZULU_LAYOUT: &str = "%Y-%m-%dT%H:%M:%S%.fZ";
const NAIVE_LAYOUTS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

/// Parse `raw` with the accepted layouts
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_str(raw, OFFSET_LAYOUT) {
        return Some(parsed.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, ZULU_LAYOUT) {
        return Some(naive.and_utc());
    }

    NAIVE_LAYOUTS.iter().find_map(|layout| {
        NaiveDateTime::parse_from_str(raw, layout)
            .ok()
            .map(|naive| naive.and_utc())
    })
}

/// Render `raw` as `DD-Mon-YYYY HH:MM:SS GMT`, passing unparseable input through
pub fn normalize_timestamp(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    match parse_timestamp(trimmed) {
        Some(parsed) => parsed.format(GMT_LAYOUT).to_string(),
        None => trimmed.to_string(),
    }
}

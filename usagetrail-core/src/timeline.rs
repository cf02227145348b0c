//! Timeline reconstruction
//!
//! Expands each usage event into a foreground entry at its start time and a
//! background entry at start + foreground duration. Output keeps source row
//! order; it is not re-sorted by timestamp.

use crate::resolve::IdentityMap;
use crate::types::{AppIdentity, Phase, TimelineEntry, UsageEvent};
use chrono::{DateTime, Duration, TimeZone, Utc};

/// Build the timeline for `events`, two entries per event.
pub fn build(events: &[UsageEvent], identities: &IdentityMap) -> Vec<TimelineEntry> {
    let mut entries = Vec::with_capacity(events.len() * 2);

    for event in events {
        let identity = identities.get(&event.identifier);
        let (start, end) = interval(event);
        let details = details(event, &identity);

        entries.push(TimelineEntry {
            timestamp: start,
            phase: Phase::Foreground,
            details: details.clone(),
        });
        entries.push(TimelineEntry {
            timestamp: end,
            phase: Phase::Background,
            details,
        });
    }

    entries
}

/// Start and end of the foreground interval.
///
/// Without a recorded duration the interval is empty and `end == start`.
pub fn interval(event: &UsageEvent) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = epoch_ms_to_utc(event.time_ms);
    let end = match event.foreground_duration_s {
        Some(seconds) => start
            .checked_add_signed(seconds_to_duration(seconds))
            .unwrap_or(start),
        None => start,
    };
    (start, end)
}

/// Details column text for an event.
///
/// AdamID and duration are rendered from the stored cells. The subtype is
/// always followed by a space, then `(Install)` for installs or nothing.
pub fn details(event: &UsageEvent, identity: &AppIdentity) -> String {
    let install = if event.is_install() { "(Install)" } else { "" };

    format!(
        "{} (Bundle ID: {}, AdamID: {}) v{}\nType: {}, Subtype: {} {}\nDuration: {} seconds",
        identity.display_name,
        identity.bundle_id,
        event.adam_id,
        event.app_version,
        event.event_type,
        event.event_subtype,
        install,
        event.foreground_duration
    )
}

fn epoch_ms_to_utc(ms: i64) -> DateTime<Utc> {
    // Out-of-range timestamps clamp to the epoch rather than abort the report.
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}

fn seconds_to_duration(seconds: f64) -> Duration {
    Duration::microseconds((seconds * 1_000_000.0).round() as i64)
}

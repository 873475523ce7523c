use chrono::{DateTime, SecondsFormat, Utc};
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since UNIX epoch.
pub type EpochMs = i64;

pub fn now_ms() -> EpochMs {
    let dur = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    dur.as_millis() as i64
}

/// ISO-8601 UTC with second precision, e.g. `2026-08-02T10:15:30Z`.
pub fn iso_from_ms(ms: EpochMs) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .unwrap_or_default()
        .to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn now_iso() -> String {
    iso_from_ms(now_ms())
}

/// Whole seconds between two epoch-millisecond instants, clamped at zero.
pub fn whole_seconds_between(started_ms: EpochMs, ended_ms: EpochMs) -> u64 {
    ((ended_ms - started_ms).max(0) / 1000) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iso_is_utc_with_z_suffix() {
        let iso = iso_from_ms(1_700_000_000_000);
        assert!(iso.ends_with('Z'));
        assert!(iso.starts_with("2023-11-14T"));
    }

    #[test]
    fn whole_seconds_rounds_down_and_clamps() {
        assert_eq!(whole_seconds_between(0, 2999), 2);
        assert_eq!(whole_seconds_between(5000, 1000), 0);
    }
}

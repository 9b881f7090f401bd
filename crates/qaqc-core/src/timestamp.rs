//! The one textual timestamp format shared with the issue tracker.
//!
//! Issue creation times, BASE generation times and the in-process registry
//! all use `YYYY-MM-DD HH:MM:SS` with optional fractional seconds. Anything
//! else is rejected; there is no fallback format.

use chrono::NaiveDateTime;

use crate::error::QaqcError;

/// `chrono` pattern for tracker timestamps. `%.f` accepts an absent fraction.
pub const TRACKER_TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Parse a tracker timestamp.
///
/// `field` names the value in the error so the operator can find the
/// offending record.
///
/// # Errors
///
/// Returns [`QaqcError::Timestamp`] when `raw` is not in
/// [`TRACKER_TS_FORMAT`].
pub fn parse_tracker_ts(field: &'static str, raw: &str) -> Result<NaiveDateTime, QaqcError> {
    NaiveDateTime::parse_from_str(raw.trim(), TRACKER_TS_FORMAT).map_err(|_| {
        QaqcError::Timestamp {
            field,
            value: raw.to_string(),
        }
    })
}

/// Render a timestamp the way the tracker and the audit log store it.
#[must_use]
pub fn format_tracker_ts(ts: NaiveDateTime) -> String {
    ts.format("%Y-%m-%d %H:%M:%S%.6f").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Timelike};

    #[test]
    fn parses_whole_seconds() {
        let ts = parse_tracker_ts("created_at", "2024-03-01 08:15:30").expect("valid");
        let expected = NaiveDate::from_ymd_opt(2024, 3, 1)
            .and_then(|d| d.and_hms_opt(8, 15, 30))
            .expect("valid date");
        assert_eq!(ts, expected);
    }

    #[test]
    fn parses_fractional_seconds() {
        let ts = parse_tracker_ts("created_at", "2024-03-01 08:15:30.250000").expect("valid");
        assert_eq!(ts.nanosecond(), 250_000_000);
    }

    #[test]
    fn rejects_other_formats() {
        for raw in ["2024-03-01T08:15:30", "03/01/2024 08:15", "", "yesterday"] {
            let err = parse_tracker_ts("started_at", raw).expect_err("must reject");
            assert!(
                matches!(err, QaqcError::Timestamp { field: "started_at", .. }),
                "unexpected error for {raw:?}: {err}"
            );
        }
    }

    #[test]
    fn formatted_value_parses_back() {
        let ts = parse_tracker_ts("x", "2023-12-31 23:59:59.125").expect("valid");
        assert_eq!(parse_tracker_ts("x", &format_tracker_ts(ts)).expect("valid"), ts);
    }
}

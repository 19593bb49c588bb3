//! Wall-clock timestamps.
//!
//! Timestamps travel on the wire as fractional seconds since the Unix epoch
//! (`f64`). These helpers convert between that representation and
//! [`chrono::DateTime`].

use chrono::{DateTime, TimeZone, Utc};

/// Current time as fractional seconds since the Unix epoch.
pub fn unix_timestamp() -> f64 {
    to_unix_seconds(Utc::now())
}

/// Converts a UTC datetime to fractional epoch seconds.
pub fn to_unix_seconds(dt: DateTime<Utc>) -> f64 {
    dt.timestamp() as f64 + f64::from(dt.timestamp_subsec_micros()) / 1_000_000.0
}

/// Converts fractional epoch seconds back to a UTC datetime.
///
/// Returns `None` for non-finite or out-of-range values.
pub fn from_unix_seconds(seconds: f64) -> Option<DateTime<Utc>> {
    if !seconds.is_finite() {
        return None;
    }
    let whole = seconds.floor();
    let nanos = ((seconds - whole) * 1_000_000_000.0).round() as u32;
    Utc.timestamp_opt(whole as i64, nanos.min(999_999_999)).single()
}

/// Renders a duration in seconds as `1h02m03s` style text.
pub fn format_duration(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    let (hours, rest) = (total / 3600, total % 3600);
    let (minutes, secs) = (rest / 60, rest % 60);
    if hours > 0 {
        format!("{hours}h{minutes:02}m{secs:02}s")
    } else if minutes > 0 {
        format!("{minutes}m{secs:02}s")
    } else {
        format!("{secs}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_conversion() {
        let dt = Utc.with_ymd_and_hms(2025, 2, 5, 10, 30, 0).unwrap();
        let seconds = to_unix_seconds(dt);
        assert_eq!(seconds, 1_738_751_400.0);
        assert_eq!(from_unix_seconds(seconds), Some(dt));
    }

    #[test]
    fn keeps_sub_second_precision() {
        let dt = from_unix_seconds(1_700_000_000.25).unwrap();
        assert_eq!(dt.timestamp_subsec_millis(), 250);
        assert!((to_unix_seconds(dt) - 1_700_000_000.25).abs() < 1e-6);
    }

    #[test]
    fn rejects_non_finite() {
        assert!(from_unix_seconds(f64::NAN).is_none());
        assert!(from_unix_seconds(f64::INFINITY).is_none());
    }

    #[test]
    fn now_is_after_2020() {
        assert!(unix_timestamp() > 1_577_836_800.0);
    }

    #[test]
    fn duration_text() {
        assert_eq!(format_duration(5.9), "5s");
        assert_eq!(format_duration(65.0), "1m05s");
        assert_eq!(format_duration(3723.0), "1h02m03s");
        assert_eq!(format_duration(-3.0), "0s");
    }
}

//! Wire formats shared by the API and the option codecs.
//!
//! Timestamps travel in a sortable format (`YYYYMMDD.HHMMSS.nnnnnnnnn`)
//! and durations use a unit-suffix grammar (`ns|us|ms|s|m|h`). Both are
//! lexically stable so clients can sort and diff raw values.

use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::error::{CoreError, CoreResult};

/// The sortable timestamp layout.
pub const TIME_FORMAT: &str = "%Y%m%d.%H%M%S.%f";

/// Format a timestamp in the sortable wire layout.
pub fn format_time(t: &DateTime<Utc>) -> String {
    t.format(TIME_FORMAT).to_string()
}

/// Parse a timestamp from the sortable wire layout.
pub fn parse_time(s: &str) -> CoreResult<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(s, TIME_FORMAT)
        .map_err(|e| CoreError::Timestamp(format!("{s}: {e}")))?;
    Ok(naive.and_utc())
}

/// Format a duration using the largest exact unit suffix.
pub fn format_duration(d: &Duration) -> String {
    let nanos = d.as_nanos();
    if nanos == 0 {
        return "0s".to_string();
    }
    const UNITS: [(u128, &str); 6] = [
        (3_600_000_000_000, "h"),
        (60_000_000_000, "m"),
        (1_000_000_000, "s"),
        (1_000_000, "ms"),
        (1_000, "us"),
        (1, "ns"),
    ];
    for (scale, suffix) in UNITS {
        if nanos % scale == 0 {
            return format!("{}{}", nanos / scale, suffix);
        }
    }
    format!("{nanos}ns")
}

/// Parse a duration from the suffix grammar: `<integer><ns|us|ms|s|m|h>`.
pub fn parse_duration(s: &str) -> CoreResult<Duration> {
    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| CoreError::Duration(format!("{s}: missing unit")))?;
    if split == 0 {
        return Err(CoreError::Duration(format!("{s}: missing value")));
    }
    let value: u64 = s[..split]
        .parse()
        .map_err(|e| CoreError::Duration(format!("{s}: {e}")))?;
    let nanos = match &s[split..] {
        "ns" => value,
        "us" => value * 1_000,
        "ms" => value * 1_000_000,
        "s" => value * 1_000_000_000,
        "m" => value * 60_000_000_000,
        "h" => value * 3_600_000_000_000,
        unit => return Err(CoreError::Duration(format!("{s}: unknown unit {unit}"))),
    };
    Ok(Duration::from_nanos(nanos))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn time_round_trip() {
        let t = Utc.with_ymd_and_hms(2021, 3, 14, 15, 9, 26).unwrap()
            + chrono::Duration::nanoseconds(535_897_932);
        let wire = format_time(&t);
        assert_eq!(wire, "20210314.150926.535897932");
        assert_eq!(parse_time(&wire).unwrap(), t);
    }

    #[test]
    fn times_sort_lexically() {
        let earlier = Utc.with_ymd_and_hms(2020, 1, 2, 3, 4, 5).unwrap();
        let later = Utc.with_ymd_and_hms(2020, 1, 2, 3, 4, 6).unwrap();
        assert!(format_time(&earlier) < format_time(&later));
    }

    #[test]
    fn duration_parse_units() {
        assert_eq!(parse_duration("5ns").unwrap(), Duration::from_nanos(5));
        assert_eq!(parse_duration("7us").unwrap(), Duration::from_micros(7));
        assert_eq!(parse_duration("3ms").unwrap(), Duration::from_millis(3));
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("4m").unwrap(), Duration::from_secs(240));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
    }

    #[test]
    fn duration_round_trip() {
        for s in ["90s", "5m", "2h", "150ms", "1ns"] {
            let d = parse_duration(s).unwrap();
            assert_eq!(format_duration(&d), s);
        }
    }

    #[test]
    fn duration_rejects_garbage() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("5").is_err());
        assert!(parse_duration("s").is_err());
        assert!(parse_duration("5w").is_err());
    }
}

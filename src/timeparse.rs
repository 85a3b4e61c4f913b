use std::sync::OnceLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeDelta, TimeZone};
use chrono_tz::Tz;
use regex::Regex;

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
];

/// Canonical text form of an instant: RFC 3339, millisecond precision, zone offset.
pub fn canonical(dt: &DateTime<Tz>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, false)
}

/// Resolve a raw posting time to an instant in `now`'s zone.
///
/// Absolute timestamps win, then `"<n> <unit> ago"` phrases relative to `now`.
/// Anything else (including empty input) resolves to `now`.
pub fn normalize(raw: Option<&str>, now: DateTime<Tz>) -> DateTime<Tz> {
    let raw = match raw.map(str::trim) {
        Some(r) if !r.is_empty() => r,
        _ => return now,
    };
    parse_absolute(raw, now.timezone())
        .or_else(|| parse_relative(raw, now))
        .unwrap_or(now)
}

pub fn parse_absolute(raw: &str, zone: Tz) -> Option<DateTime<Tz>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&zone));
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return zone.from_local_datetime(&naive).earliest();
        }
    }
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()?;
    zone.from_local_datetime(&date.and_hms_opt(0, 0, 0)?).earliest()
}

pub fn parse_relative(raw: &str, now: DateTime<Tz>) -> Option<DateTime<Tz>> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"(?i)(\d+)\s+(minutes?|hours?|days?|weeks?)\s+ago").unwrap()
    });
    let caps = re.captures(raw)?;
    let n: i64 = caps[1].parse().ok()?;
    let unit = caps[2].to_lowercase();
    let delta = if unit.starts_with("minute") {
        TimeDelta::try_minutes(n)?
    } else if unit.starts_with("hour") {
        TimeDelta::try_hours(n)?
    } else if unit.starts_with("day") {
        TimeDelta::try_days(n)?
    } else {
        TimeDelta::try_weeks(n)?
    };
    now.checked_sub_signed(delta)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::Europe::Berlin;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Tz> {
        Berlin.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn naive_minutes_are_local() {
        let now = at(2024, 3, 1, 12, 0);
        let dt = normalize(Some("2024-01-01T10:00"), now);
        assert_eq!(canonical(&dt), "2024-01-01T10:00:00.000+01:00");
    }

    #[test]
    fn offset_timestamps_convert_to_zone() {
        let now = at(2024, 7, 1, 12, 0);
        let dt = normalize(Some("2024-06-01T08:00:00Z"), now);
        assert_eq!(canonical(&dt), "2024-06-01T10:00:00.000+02:00");
    }

    #[test]
    fn bare_date_is_local_midnight() {
        let now = at(2024, 3, 1, 12, 0);
        let dt = normalize(Some("2024-02-28"), now);
        assert_eq!(dt, at(2024, 2, 28, 0, 0));
    }

    #[test]
    fn relative_phrases() {
        let now = at(2024, 3, 10, 12, 0);
        assert_eq!(normalize(Some("30 minutes ago"), now), at(2024, 3, 10, 11, 30));
        assert_eq!(normalize(Some("1 hour ago"), now), at(2024, 3, 10, 11, 0));
        assert_eq!(normalize(Some("Posted 2 Days Ago"), now), at(2024, 3, 8, 12, 0));
        assert_eq!(normalize(Some("1 week ago"), now), at(2024, 3, 3, 12, 0));
    }

    #[test]
    fn garbage_and_empty_fall_back_to_now() {
        let now = at(2024, 3, 10, 12, 0);
        assert_eq!(normalize(Some("recently"), now), now);
        assert_eq!(normalize(Some("   "), now), now);
        assert_eq!(normalize(None, now), now);
        assert_eq!(normalize(Some("99999999999999999999 days ago"), now), now);
    }
}

//! Lenient timestamp parsing for backend records.
//!
//! The backend is not consistent about its timestamp format: the REST API emits ISO-8601 with
//! or without an offset, the helper programs emit Python `str(datetime)` output. Anything we
//! cannot parse falls back to [`process_start`].

use std::sync::LazyLock;
use std::time::SystemTime;

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone as _};

static PROCESS_START: LazyLock<SystemTime> = LazyLock::new(SystemTime::now);

/// The instant this process first asked for the time. Used for every unknown timestamp.
pub fn process_start() -> SystemTime {
    *PROCESS_START
}

const OFFSET_FORMATS: [&str; 3] = [
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%dT%H:%M:%S%.f%z",
    "%Y-%m-%d %H:%M:%S%.f%z",
];

const NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Parse a backend timestamp. Values without an offset are taken as local time.
pub fn parse_lenient(raw: &str) -> Option<SystemTime> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.into());
    }

    for format in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(raw, format) {
            return Some(dt.into());
        }
    }

    let naive = NAIVE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })?;

    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(SystemTime::from)
}

/// Parse an optional timestamp, falling back to [`process_start`].
pub fn parse_or_start(raw: Option<&str>) -> SystemTime {
    raw.and_then(parse_lenient).unwrap_or_else(process_start)
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, UNIX_EPOCH};

    use super::*;

    fn secs(t: SystemTime) -> u64 {
        t.duration_since(UNIX_EPOCH).unwrap().as_secs()
    }

    #[test]
    fn rfc3339_with_offset() {
        let t = parse_lenient("2014-03-01T10:00:00+00:00").unwrap();
        assert_eq!(secs(t), 1_393_668_000);
    }

    #[test]
    fn python_str_datetime_with_offset_and_fraction() {
        let t = parse_lenient("2014-03-01 10:00:00.250000+00:00").unwrap();
        assert_eq!(
            t.duration_since(UNIX_EPOCH).unwrap(),
            Duration::from_millis(1_393_668_000_250)
        );
    }

    #[test]
    fn naive_values_are_local_time() {
        let naive = NaiveDateTime::parse_from_str("2014-03-01 10:00:00", "%Y-%m-%d %H:%M:%S")
            .unwrap();
        let expected: SystemTime = Local.from_local_datetime(&naive).earliest().unwrap().into();
        assert_eq!(parse_lenient("2014-03-01T10:00:00"), Some(expected));
        assert_eq!(parse_lenient("2014-03-01 10:00:00"), Some(expected));
    }

    #[test]
    fn bare_date_is_midnight() {
        assert!(parse_lenient("2014-03-01").is_some());
    }

    #[test]
    fn garbage_falls_back_to_process_start() {
        assert_eq!(parse_lenient("yesterday-ish"), None);
        assert_eq!(parse_or_start(Some("not a time")), process_start());
        assert_eq!(parse_or_start(None), process_start());
        assert_eq!(parse_or_start(Some("   ")), process_start());
    }
}

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, SecondsFormat, Utc};

/// Current time as a millisecond-precision UTC string ending in `Z`.
///
/// Stored timestamps all use this shape so that lexical ordering in SQL
/// matches chronological ordering.
pub fn now_iso_z() -> String {
    to_iso_z(Utc::now())
}

pub fn to_iso_z(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a client supplied timestamp (RFC 3339, optional offset or trailing
/// `Z`, a naive `YYYY-MM-DDTHH:MM:SS[.fff]` treated as UTC, or a bare
/// `YYYY-MM-DD` meaning midnight UTC).
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Round up to the next whole millisecond. Stored stamps carry millis only,
/// so an exclusive bound must not be truncated below a finer input.
pub fn ceil_to_millis(dt: DateTime<Utc>) -> DateTime<Utc> {
    let sub_milli = dt.timestamp_subsec_nanos() % 1_000_000;
    if sub_milli == 0 {
        dt
    } else {
        dt + Duration::nanoseconds(i64::from(1_000_000 - sub_milli))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_to_iso_z_uses_millis_and_z_suffix() {
        let dt = Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(to_iso_z(dt), "2025-01-02T03:04:05.000Z");
    }

    #[test]
    fn test_parse_timestamp_accepts_z_and_offsets() {
        let a = parse_timestamp("2025-01-02T03:04:05.678Z").unwrap();
        let b = parse_timestamp("2025-01-02T05:04:05.678+02:00").unwrap();
        assert_eq!(a, b);
        assert_eq!(to_iso_z(a), "2025-01-02T03:04:05.678Z");
    }

    #[test]
    fn test_parse_timestamp_naive_is_utc() {
        let dt = parse_timestamp("2025-01-02T03:04:05").unwrap();
        assert_eq!(to_iso_z(dt), "2025-01-02T03:04:05.000Z");
    }

    #[test]
    fn test_parse_timestamp_date_only_is_midnight() {
        let dt = parse_timestamp("2025-01-02").unwrap();
        assert_eq!(to_iso_z(dt), "2025-01-02T00:00:00.000Z");
    }

    #[test]
    fn test_ceil_to_millis() {
        let fine = parse_timestamp("2025-01-02T03:04:05.678901Z").unwrap();
        assert_eq!(to_iso_z(ceil_to_millis(fine)), "2025-01-02T03:04:05.679Z");
        let exact = parse_timestamp("2025-01-02T03:04:05.678Z").unwrap();
        assert_eq!(ceil_to_millis(exact), exact);
        let edge = parse_timestamp("2025-01-02T03:04:05.999500Z").unwrap();
        assert_eq!(to_iso_z(ceil_to_millis(edge)), "2025-01-02T03:04:06.000Z");
    }

    #[test]
    fn test_parse_timestamp_rejects_garbage() {
        assert!(parse_timestamp("2025-13-40").is_none());
        assert!(parse_timestamp("yesterday").is_none());
        assert!(parse_timestamp("   ").is_none());
    }
}

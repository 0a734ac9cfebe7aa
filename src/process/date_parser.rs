use chrono::{DateTime, NaiveDate, NaiveDateTime};

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%Y%m%d", "%m/%d/%Y"];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y/%m/%d %H:%M:%S%.f",
    "%m/%d/%Y %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

/// Parse a date-like string into a calendar date. A time-of-day part is accepted and dropped;
/// RFC 3339 timestamps keep the date in their own offset.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    // `%Y%m%d` is lenient about digit counts, so only let it see 8-digit strings
    let compact = s.len() == 8 && s.bytes().all(|b| b.is_ascii_digit());
    for fmt in DATE_FORMATS {
        if *fmt == "%Y%m%d" && !compact {
            continue;
        }
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Some(d);
        }
    }

    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt.date());
        }
    }

    DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.date_naive())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn parses_plain_dates() {
        assert_eq!(parse_date("2021-01-01"), Some(ymd(2021, 1, 1)));
        assert_eq!(parse_date("2019/05/21"), Some(ymd(2019, 5, 21)));
        assert_eq!(parse_date("20190521"), Some(ymd(2019, 5, 21)));
        assert_eq!(parse_date("05/21/2019"), Some(ymd(2019, 5, 21)));
    }

    #[test]
    fn drops_time_of_day() {
        assert_eq!(parse_date("2024/12/22 00:05:00"), Some(ymd(2024, 12, 22)));
        assert_eq!(parse_date("2021-02-02T13:45:10.250"), Some(ymd(2021, 2, 2)));
        assert_eq!(parse_date("2021-02-02T23:30:00+10:00"), Some(ymd(2021, 2, 2)));
    }

    #[test]
    fn rejects_garbage_and_impossible_dates() {
        assert_eq!(parse_date("not-a-date"), None);
        assert_eq!(parse_date("2021-02-30"), None);
        assert_eq!(parse_date("202101"), None);
        assert_eq!(parse_date("   "), None);
    }
}

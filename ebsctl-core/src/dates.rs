//! Calendar-aligned time buckets
//!
//! All arithmetic is in UTC. Day-level buckets are compared as dates, hourly
//! buckets as the instant at the top of the hour.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Timelike, Utc};

/// Seconds from the Unix epoch to 2006-01-01T00:00:00Z, the provider's public launch
const HISTORY_FLOOR_TIMESTAMP: i64 = 1_136_073_600;

/// No snapshot can be older than this; boundary searches stop above it
pub fn history_floor() -> DateTime<Utc> {
    DateTime::<Utc>::default() + Duration::seconds(HISTORY_FLOOR_TIMESTAMP)
}

/// Midnight at the start of `date`
pub fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

/// Top of the hour containing `t`
pub fn start_of_hour(t: DateTime<Utc>) -> DateTime<Utc> {
    start_of_day(t.date_naive()) + Duration::hours(i64::from(t.hour()))
}

/// First day of the month containing `date`
pub fn first_of_month(date: NaiveDate) -> NaiveDate {
    date - Duration::days(i64::from(date.day0()))
}

/// First day of the month `n` calendar months before the month of `date`
pub fn month_start_before(date: NaiveDate, n: u32) -> NaiveDate {
    let mut first = first_of_month(date);
    for _ in 0..n {
        first = first_of_month(first - Duration::days(1));
    }
    first
}

/// First instant of the month `n` calendar months before `reference`'s month
pub fn months_before(reference: DateTime<Utc>, n: u32) -> DateTime<Utc> {
    start_of_day(month_start_before(reference.date_naive(), n))
}

/// The Sunday on or before `date`
pub fn sunday_on_or_before(date: NaiveDate) -> NaiveDate {
    date - Duration::days(i64::from(date.weekday().num_days_from_sunday()))
}

/// The latest Sunday strictly earlier than `date`
pub fn sunday_before(date: NaiveDate) -> NaiveDate {
    sunday_on_or_before(date - Duration::days(1))
}

/// The latest first-of-month strictly earlier than `date`
pub fn first_of_month_before(date: NaiveDate) -> NaiveDate {
    first_of_month(date - Duration::days(1))
}

/// Render an instant the way the provider reports snapshot start times
pub fn format_timestamp(t: DateTime<Utc>) -> String {
    t.format("%Y-%m-%dT%H:%M:%S.000Z").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Weekday};

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_months_before() {
        assert_eq!(months_before(at(2021, 3, 15, 10, 30), 1), at(2021, 2, 1, 0, 0));
        assert_eq!(months_before(at(2021, 1, 15, 10, 30), 1), at(2020, 12, 1, 0, 0));
        assert_eq!(months_before(at(2021, 3, 15, 10, 30), 0), at(2021, 3, 1, 0, 0));
        assert_eq!(months_before(at(2021, 3, 31, 23, 59), 14), at(2020, 1, 1, 0, 0));
    }

    #[test]
    fn test_months_before_zero_is_first_of_month() {
        for (y, m, d) in [(2020, 2, 29), (2019, 12, 31), (2021, 7, 1)] {
            let reference = at(y, m, d, 12, 0);
            assert_eq!(months_before(reference, 0), start_of_day(first_of_month(date(y, m, d))));
        }
    }

    #[test]
    fn test_start_of_hour() {
        assert_eq!(start_of_hour(at(2021, 3, 15, 10, 59)), at(2021, 3, 15, 10, 0));
        assert_eq!(start_of_hour(at(2021, 3, 15, 0, 0)), at(2021, 3, 15, 0, 0));
    }

    #[test]
    fn test_sundays() {
        // 2021-03-14 was a Sunday
        let sunday = date(2021, 3, 14);
        assert_eq!(sunday.weekday(), Weekday::Sun);
        assert_eq!(sunday_on_or_before(sunday), sunday);
        assert_eq!(sunday_on_or_before(date(2021, 3, 17)), sunday);
        assert_eq!(sunday_before(sunday), date(2021, 3, 7));
        assert_eq!(sunday_before(date(2021, 3, 15)), sunday);
    }

    #[test]
    fn test_first_of_month_before() {
        assert_eq!(first_of_month_before(date(2021, 3, 1)), date(2021, 2, 1));
        assert_eq!(first_of_month_before(date(2021, 3, 2)), date(2021, 3, 1));
        assert_eq!(first_of_month_before(date(2021, 1, 1)), date(2020, 12, 1));
    }

    #[test]
    fn test_history_floor() {
        assert_eq!(history_floor(), at(2006, 1, 1, 0, 0));
        assert_eq!(format_timestamp(history_floor()), "2006-01-01T00:00:00.000Z");
    }
}

// Day, week and month boundaries in the statistics timezone. Weeks start on Monday.

use chrono::{DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

pub fn local_date(tz: Tz, at: DateTime<Utc>) -> NaiveDate {
    at.with_timezone(&tz).date_naive()
}

/// First instant of `day` in `tz`, as UTC.
pub fn day_start(tz: Tz, day: NaiveDate) -> DateTime<Utc> {
    let midnight = day.and_time(NaiveTime::MIN);
    match tz.from_local_datetime(&midnight) {
        LocalResult::Single(dt) => dt.with_timezone(&Utc),
        LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
        // DST gap at midnight: the day starts at the first valid local time.
        LocalResult::None => tz
            .from_local_datetime(&(midnight + Duration::hours(1)))
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|| midnight.and_utc()),
    }
}

pub fn next_day(day: NaiveDate) -> NaiveDate {
    day + Duration::days(1)
}

pub fn prev_day(day: NaiveDate) -> NaiveDate {
    day - Duration::days(1)
}

pub fn week_start(day: NaiveDate) -> NaiveDate {
    day - Duration::days(day.weekday().num_days_from_monday() as i64)
}

pub fn month_start(day: NaiveDate) -> NaiveDate {
    day - Duration::days(day.day0() as i64)
}

/// Monday..Sunday of the week before the one containing `day`.
pub fn previous_week(day: NaiveDate) -> (NaiveDate, NaiveDate) {
    let end = prev_day(week_start(day));
    (end - Duration::days(6), end)
}

/// First..last day of the month before the one containing `day`.
pub fn previous_month(day: NaiveDate) -> (NaiveDate, NaiveDate) {
    let end = prev_day(month_start(day));
    (month_start(end), end)
}

/// Inclusive day range.
pub fn days_between(from: NaiveDate, to: NaiveDate) -> impl Iterator<Item = NaiveDate> {
    from.iter_days().take_while(move |d| *d <= to)
}

pub fn format_day(day: NaiveDate) -> String {
    day.format("%Y-%m-%d").to_string()
}

pub fn format_instant(tz: Tz, at: DateTime<Utc>) -> String {
    at.with_timezone(&tz).format("%Y-%m-%d %H:%M").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn week_starts_on_monday() {
        // 2026-10-19 is a Monday
        assert_eq!(week_start(d(2026, 10, 19)), d(2026, 10, 19));
        assert_eq!(week_start(d(2026, 10, 25)), d(2026, 10, 19));
        assert_eq!(week_start(d(2026, 10, 18)), d(2026, 10, 12));
    }

    #[test]
    fn previous_periods() {
        assert_eq!(
            previous_week(d(2026, 10, 21)),
            (d(2026, 10, 12), d(2026, 10, 18))
        );
        assert_eq!(
            previous_month(d(2026, 3, 15)),
            (d(2026, 2, 1), d(2026, 2, 28))
        );
        assert_eq!(
            previous_month(d(2026, 1, 1)),
            (d(2025, 12, 1), d(2025, 12, 31))
        );
    }

    #[test]
    fn day_start_uses_timezone() {
        let tz: Tz = "Asia/Shanghai".parse().unwrap();
        let start = day_start(tz, d(2026, 10, 19));
        assert_eq!(start.to_rfc3339(), "2026-10-18T16:00:00+00:00");
        assert_eq!(local_date(tz, start), d(2026, 10, 19));
    }

    #[test]
    fn day_start_handles_midnight_dst_gap() {
        // Santiago springs forward at midnight.
        let tz: Tz = "America/Santiago".parse().unwrap();
        let start = day_start(tz, d(2026, 9, 6));
        assert_eq!(local_date(tz, start), d(2026, 9, 6));
    }

    #[test]
    fn days_between_is_inclusive() {
        let days: Vec<_> = days_between(d(2026, 2, 27), d(2026, 3, 1)).collect();
        assert_eq!(days, vec![d(2026, 2, 27), d(2026, 2, 28), d(2026, 3, 1)]);
    }
}

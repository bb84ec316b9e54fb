//! Calendar arithmetic on wall-clock time.
//!
//! Days are added on the local calendar rather than as 24 hour spans so a ring
//! time stays at the same wall-clock time across daylight saving changes.

use chrono::{DateTime, Duration, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Timelike};

/// Source of the current time, swapped out in tests
pub trait Clock: Send {
    fn now(&self) -> DateTime<Local>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// Maps a wall-clock time onto `tz`.
///
/// An ambiguous time (clocks turned back) resolves to its earliest instant, a
/// skipped time (clocks turned forward) is pushed forward past the gap.
pub fn resolve_local<Tz: TimeZone>(tz: &Tz, naive: NaiveDateTime) -> DateTime<Tz> {
    if let Some(time) = tz.from_local_datetime(&naive).earliest() {
        return time;
    }
    let shifted = naive + Duration::hours(1);
    tz.from_local_datetime(&shifted)
        .earliest()
        .unwrap_or_else(|| tz.from_utc_datetime(&naive))
}

/// builds a timestamp from its calendar components, `None` if they don't form a valid date
#[must_use]
pub fn from_components<Tz: TimeZone>(
    tz: &Tz,
    year: i32,
    month: u32,
    day: u32,
    hour: u32,
    minute: u32,
) -> Option<DateTime<Tz>> {
    let naive = NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, 0)?;
    Some(resolve_local(tz, naive))
}

#[must_use]
pub fn from_epoch_millis(millis: i64) -> Option<DateTime<Local>> {
    Local.timestamp_millis_opt(millis).single()
}

/// hour and minute of `time`, seconds dropped
#[must_use]
pub fn time_of_day<Tz: TimeZone>(time: &DateTime<Tz>) -> NaiveTime {
    let naive = time.naive_local();
    NaiveTime::from_hms_opt(naive.hour(), naive.minute(), 0).unwrap_or(NaiveTime::MIN)
}

/// `time` on the calendar day `days` after the one `day` falls on
#[must_use]
pub fn day_at<Tz: TimeZone>(day: &DateTime<Tz>, days: i64, time: NaiveTime) -> DateTime<Tz> {
    let date = day.date_naive() + Duration::days(days);
    resolve_local(&day.timezone(), date.and_time(time))
}

/// `time` on the same calendar day as `day`
#[must_use]
pub fn same_day_at<Tz: TimeZone>(day: &DateTime<Tz>, time: NaiveTime) -> DateTime<Tz> {
    day_at(day, 0, time)
}

#[must_use]
pub fn add_minutes<Tz: TimeZone>(time: &DateTime<Tz>, minutes: i64) -> DateTime<Tz> {
    time.clone() + Duration::minutes(minutes)
}

/// US eastern time for 2023 only: summer time from 2023-03-12 02:00 to
/// 2023-11-05 02:00 local, enough to exercise both transitions.
#[cfg(test)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct NewYork2023;

#[cfg(test)]
impl NewYork2023 {
    fn summer() -> chrono::FixedOffset {
        chrono::FixedOffset::west_opt(4 * 3600).unwrap()
    }

    fn winter() -> chrono::FixedOffset {
        chrono::FixedOffset::west_opt(5 * 3600).unwrap()
    }
}

#[cfg(test)]
impl TimeZone for NewYork2023 {
    type Offset = chrono::FixedOffset;

    fn from_offset(_: &Self::Offset) -> Self {
        Self
    }

    fn offset_from_local_date(&self, local: &NaiveDate) -> chrono::LocalResult<Self::Offset> {
        self.offset_from_local_datetime(&local.and_time(NaiveTime::MIN))
    }

    fn offset_from_local_datetime(
        &self,
        local: &NaiveDateTime,
    ) -> chrono::LocalResult<Self::Offset> {
        // an offset fits if the instant it gives is really in that offset
        let fitting: Vec<_> = [Self::summer(), Self::winter()]
            .into_iter()
            .filter(|offset| {
                let utc = *local - Duration::seconds(i64::from(offset.local_minus_utc()));
                self.offset_from_utc_datetime(&utc) == *offset
            })
            .collect();
        match fitting.as_slice() {
            [one] => chrono::LocalResult::Single(*one),
            [summer, winter] => chrono::LocalResult::Ambiguous(*summer, *winter),
            _ => chrono::LocalResult::None,
        }
    }

    fn offset_from_utc_date(&self, utc: &NaiveDate) -> Self::Offset {
        self.offset_from_utc_datetime(&utc.and_time(NaiveTime::MIN))
    }

    fn offset_from_utc_datetime(&self, utc: &NaiveDateTime) -> Self::Offset {
        let start = NaiveDate::from_ymd_opt(2023, 3, 12).unwrap().and_hms_opt(7, 0, 0).unwrap();
        let end = NaiveDate::from_ymd_opt(2023, 11, 5).unwrap().and_hms_opt(6, 0, 0).unwrap();
        if (start..end).contains(utc) {
            Self::summer()
        } else {
            Self::winter()
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Datelike, FixedOffset};

    use super::*;

    fn hm(hour: u32, minute: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(hour, minute, 0).unwrap()
    }

    #[test]
    fn components_round_trip() {
        let time = from_components(&Local, 2023, 6, 15, 7, 30).unwrap();
        assert_eq!(time.year(), 2023);
        assert_eq!(time.month(), 6);
        assert_eq!(time.day(), 15);
        assert_eq!(time.hour(), 7);
        assert_eq!(time.minute(), 30);
        assert_eq!(time.second(), 0);
    }

    #[test]
    fn invalid_components() {
        assert!(from_components(&Local, 2023, 2, 30, 7, 0).is_none());
        assert!(from_components(&Local, 2023, 6, 15, 24, 0).is_none());
    }

    #[test]
    fn same_day_keeps_the_date() {
        let tz = FixedOffset::east_opt(3600).unwrap();
        let day = from_components(&tz, 2023, 6, 15, 23, 59).unwrap();
        let at = same_day_at(&day, hm(0, 5));
        assert_eq!(at, from_components(&tz, 2023, 6, 15, 0, 5).unwrap());
    }

    #[test]
    fn day_at_crosses_month_and_year() {
        let tz = FixedOffset::west_opt(5 * 3600).unwrap();
        let eve = from_components(&tz, 2023, 12, 31, 22, 15).unwrap();
        assert_eq!(
            day_at(&eve, 1, hm(6, 0)),
            from_components(&tz, 2024, 1, 1, 6, 0).unwrap()
        );
        assert_eq!(
            day_at(&eve, -31, hm(22, 15)),
            from_components(&tz, 2023, 11, 30, 22, 15).unwrap()
        );
    }

    #[test]
    fn skipped_time_moves_past_the_gap() {
        let gap = from_components(&NewYork2023, 2023, 3, 12, 2, 30).unwrap();
        assert_eq!(gap.naive_local().time(), hm(3, 30));
        assert_eq!(gap.offset().local_minus_utc(), -4 * 3600);
    }

    #[test]
    fn repeated_time_takes_the_earliest() {
        let fold = from_components(&NewYork2023, 2023, 11, 5, 1, 30).unwrap();
        assert_eq!(fold.naive_local().time(), hm(1, 30));
        assert_eq!(fold.offset().local_minus_utc(), -4 * 3600);
    }

    #[test]
    fn day_at_keeps_wall_clock_time_after_a_gap() {
        let after_gap = from_components(&NewYork2023, 2023, 3, 12, 4, 0).unwrap();
        let next = day_at(&after_gap, 1, hm(2, 30));
        assert_eq!(next.naive_local().time(), hm(2, 30));
        assert_eq!(next.day(), 13);
    }

    #[test]
    fn add_minutes_rolls_over_midnight() {
        let time = from_components(&Local, 2023, 6, 15, 23, 58).unwrap();
        assert_eq!(
            add_minutes(&time, 5),
            from_components(&Local, 2023, 6, 16, 0, 3).unwrap()
        );
    }

    #[test]
    fn time_of_day_drops_seconds() {
        let time = from_components(&Local, 2023, 6, 15, 7, 30).unwrap() + Duration::seconds(42);
        assert_eq!(time_of_day(&time), hm(7, 30));
    }

    #[test]
    fn epoch_millis() {
        let time = from_components(&Local, 2023, 6, 15, 7, 30).unwrap();
        assert_eq!(from_epoch_millis(time.timestamp_millis()), Some(time));
    }
}

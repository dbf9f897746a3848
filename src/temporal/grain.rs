//! Date grains: truncation and shifting on offset-aware datetimes.

use std::fmt;

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Timelike};
use serde::{Deserialize, Serialize};

/// Resolution of a date value, finest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DateEntityGrain {
    Second,
    Minute,
    Hour,
    #[default]
    Day,
    Week,
    Month,
    Quarter,
    Year,
}

impl DateEntityGrain {
    /// Finer than a day.
    pub fn is_time(self) -> bool {
        self <= DateEntityGrain::Hour
    }

    pub fn truncate(self, dt: DateTime<FixedOffset>) -> DateTime<FixedOffset> {
        in_offset(dt, start_of(self, dt.naive_local()))
    }

    pub fn shift(self, dt: DateTime<FixedOffset>, amount: i32) -> DateTime<FixedOffset> {
        in_offset(dt, shift_naive(dt.naive_local(), amount, self))
    }

    /// Exclusive end of the period of this grain starting at `start`.
    pub fn end_from(self, start: DateTime<FixedOffset>) -> DateTime<FixedOffset> {
        self.shift(start, 1)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DateEntityGrain::Second => "second",
            DateEntityGrain::Minute => "minute",
            DateEntityGrain::Hour => "hour",
            DateEntityGrain::Day => "day",
            DateEntityGrain::Week => "week",
            DateEntityGrain::Month => "month",
            DateEntityGrain::Quarter => "quarter",
            DateEntityGrain::Year => "year",
        }
    }
}

impl fmt::Display for DateEntityGrain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn in_offset(original: DateTime<FixedOffset>, local: NaiveDateTime) -> DateTime<FixedOffset> {
    original.offset().from_local_datetime(&local).single().unwrap_or(original)
}

fn midnight() -> NaiveTime {
    NaiveTime::default()
}

fn start_of(grain: DateEntityGrain, dt: NaiveDateTime) -> NaiveDateTime {
    let date = dt.date();
    match grain {
        DateEntityGrain::Second => dt.with_nanosecond(0).unwrap_or(dt),
        DateEntityGrain::Minute => date.and_hms_opt(dt.hour(), dt.minute(), 0).unwrap_or(dt),
        DateEntityGrain::Hour => date.and_hms_opt(dt.hour(), 0, 0).unwrap_or(dt),
        DateEntityGrain::Day => date.and_time(midnight()),
        DateEntityGrain::Week => {
            let monday = date - Duration::days(i64::from(date.weekday().num_days_from_monday()));
            monday.and_time(midnight())
        }
        DateEntityGrain::Month => first_of(date.year(), date.month()).unwrap_or(date).and_time(midnight()),
        DateEntityGrain::Quarter => {
            let month = ((date.month() - 1) / 3) * 3 + 1;
            first_of(date.year(), month).unwrap_or(date).and_time(midnight())
        }
        DateEntityGrain::Year => first_of(date.year(), 1).unwrap_or(date).and_time(midnight()),
    }
}

fn first_of(year: i32, month: u32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, 1)
}

fn shift_naive(dt: NaiveDateTime, amount: i32, grain: DateEntityGrain) -> NaiveDateTime {
    let amount64 = i64::from(amount);
    match grain {
        DateEntityGrain::Second => dt + Duration::seconds(amount64),
        DateEntityGrain::Minute => dt + Duration::minutes(amount64),
        DateEntityGrain::Hour => dt + Duration::hours(amount64),
        DateEntityGrain::Day => dt + Duration::days(amount64),
        DateEntityGrain::Week => dt + Duration::weeks(amount64),
        DateEntityGrain::Month => add_months(dt, amount),
        DateEntityGrain::Quarter => add_months(dt, amount * 3),
        DateEntityGrain::Year => add_months(dt, amount * 12),
    }
}

/// Month arithmetic clamping the day, so Jan 31 + 1 month is the last day of February.
fn add_months(dt: NaiveDateTime, months: i32) -> NaiveDateTime {
    let zero_based = dt.month() as i32 - 1 + months;
    let year = dt.year() + zero_based.div_euclid(12);
    let month = zero_based.rem_euclid(12) as u32 + 1;
    let day = dt.day().min(days_in_month(year, month));
    NaiveDate::from_ymd_opt(year, month, day).map(|d| d.and_time(dt.time())).unwrap_or(dt)
}

pub(crate) fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    first_of(next_year, next_month).and_then(|d| d.pred_opt()).map(|d| d.day()).unwrap_or(28)
}

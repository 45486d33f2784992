//! The month window every day-indexed array is relative to.
//!
//! Index 0 of a [`DayFlags`](crate::day_flags::DayFlags) is day 1 of the
//! month. The month is recomputed from the clock on every refresh.

use std::fmt;
use std::ops::Range;

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CalendarMonth {
    first: NaiveDate,
}

/// The (month, year) pair recorded alongside the persisted snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthStamp {
    pub month: u32,
    pub year: i32,
}

impl CalendarMonth {
    pub fn containing(date: NaiveDate) -> Self {
        CalendarMonth {
            first: date - Duration::days(i64::from(date.day0())),
        }
    }

    pub fn of(now: NaiveDateTime) -> Self {
        Self::containing(now.date())
    }

    pub fn from_ym(year: i32, month: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, 1).map(|first| CalendarMonth { first })
    }

    pub fn year(&self) -> i32 {
        self.first.year()
    }

    pub fn month(&self) -> u32 {
        self.first.month()
    }

    pub fn first_day(&self) -> NaiveDate {
        self.first
    }

    pub fn days_in_month(&self) -> u32 {
        match self.month() {
            2 if NaiveDate::from_ymd_opt(self.year(), 2, 29).is_some() => 29,
            2 => 28,
            4 | 6 | 9 | 11 => 30,
            _ => 31,
        }
    }

    /// Days of the month, 1-based.
    pub fn day_range(&self) -> Range<u32> {
        1..self.days_in_month() + 1
    }

    pub fn date_of(&self, day: u32) -> Option<NaiveDate> {
        self.first.with_day(day)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        Self::containing(date) == *self
    }

    /// Zero-based index of `date` within this month.
    pub fn day_index(&self, date: NaiveDate) -> Option<usize> {
        self.contains(date).then(|| date.day0() as usize)
    }

    /// Midnight at the start of day 1.
    pub fn start(&self) -> NaiveDateTime {
        self.first.and_time(NaiveTime::MIN)
    }

    /// Midnight at the start of day 1 of the following month.
    pub fn end(&self) -> NaiveDateTime {
        self.start() + Duration::days(i64::from(self.days_in_month()))
    }

    pub fn next(&self) -> Self {
        Self::containing(self.end().date())
    }

    /// Number of empty cells before day 1 in a week row starting on `first_weekday`.
    pub fn leading_blanks(&self, first_weekday: Weekday) -> usize {
        let day = self.first.weekday().num_days_from_sunday();
        let start = first_weekday.num_days_from_sunday();
        ((day + 7 - start) % 7) as usize
    }

    pub fn stamp(&self) -> MonthStamp {
        MonthStamp {
            month: self.month(),
            year: self.year(),
        }
    }
}

impl fmt::Display for CalendarMonth {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.first.format("%B %Y"))
    }
}

//! Month grid read path.
//!
//! Source arrays may be shorter than the month (or belong to another month
//! entirely); every lookup here falls back to "not set" rather than failing.

use chrono::{NaiveDate, Weekday};

use crate::busy::BusyPeriod;
use crate::day_flags::DayFlags;
use crate::month::CalendarMonth;
use crate::refresh::CalendarState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayCell {
    pub day: u32,
    pub date: NaiveDate,
    pub is_today: bool,
    pub is_past: bool,
    pub complete: bool,
    pub busy: BusyPeriod,
    pub holiday: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GridCell {
    /// Padding before day 1.
    Blank,
    Day(DayCell),
}

#[derive(Debug, Clone, PartialEq)]
pub struct MonthGrid {
    pub month: CalendarMonth,
    pub first_weekday: Weekday,
    pub cells: Vec<GridCell>,
}

impl MonthGrid {
    pub fn build(
        month: CalendarMonth,
        today: NaiveDate,
        state: &CalendarState,
        first_weekday: Weekday,
    ) -> Self {
        let same_month = state.month == month;
        let empty = DayFlags::new();
        let flags = state
            .flags
            .loaded()
            .filter(|_| same_month)
            .unwrap_or(&empty);
        let busy: &[BusyPeriod] = state
            .busy
            .loaded()
            .filter(|_| same_month)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        let holidays = state.holidays.loaded();

        let mut cells = vec![GridCell::Blank; month.leading_blanks(first_weekday)];
        for (index, day) in month.day_range().enumerate() {
            let Some(date) = month.date_of(day) else {
                continue;
            };
            cells.push(GridCell::Day(DayCell {
                day,
                date,
                is_today: date == today,
                is_past: date < today,
                complete: flags.get(index),
                busy: busy.get(index).copied().unwrap_or_default(),
                holiday: holidays.is_some_and(|h| h.contains(&date)),
            }));
        }

        MonthGrid {
            month,
            first_weekday,
            cells,
        }
    }

    /// Rows of seven cells; the last row may be shorter.
    pub fn weeks(&self) -> impl Iterator<Item = &[GridCell]> {
        self.cells.chunks(7)
    }

    pub fn days(&self) -> impl Iterator<Item = &DayCell> {
        self.cells.iter().filter_map(|cell| match cell {
            GridCell::Day(day) => Some(day),
            GridCell::Blank => None,
        })
    }
}

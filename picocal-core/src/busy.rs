//! Morning / afternoon / evening occupancy per day.

use std::ops::Range;

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::event::CalendarEvent;

/// Occupancy of the three fixed day buckets:
/// morning `[06:00, 12:00)`, afternoon `[12:00, 18:00)`, evening `[18:00, 24:00)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusyPeriod {
    pub morning: bool,
    pub afternoon: bool,
    pub evening: bool,
}

impl BusyPeriod {
    pub fn is_free(&self) -> bool {
        !(self.morning || self.afternoon || self.evening)
    }
}

const MORNING_START: u32 = 6;
const AFTERNOON_START: u32 = 12;
const EVENING_START: u32 = 18;

/// Scans an event set for bucket overlaps. It never fetches anything itself.
#[derive(Debug, Clone, Default)]
pub struct BusyPeriodCalculator {
    events: Vec<CalendarEvent>,
}

impl BusyPeriodCalculator {
    pub fn new(events: Vec<CalendarEvent>) -> Self {
        let events = events.into_iter().filter(|e| e.blocks_time()).collect();
        BusyPeriodCalculator { events }
    }

    /// One entry per day in `days` (1-based day numbers), in range order.
    pub fn calculate(&self, month_start: NaiveDate, days: Range<u32>) -> Vec<BusyPeriod> {
        days.map(|day| {
            let date = month_start + Duration::days(i64::from(day) - 1);
            self.busy_periods_for(date)
        })
        .collect()
    }

    pub fn busy_periods_for(&self, date: NaiveDate) -> BusyPeriod {
        let at = |hour: u32| date.and_time(NaiveTime::MIN) + Duration::hours(i64::from(hour));
        let midnight = date.and_time(NaiveTime::MIN) + Duration::days(1);

        BusyPeriod {
            morning: self.any_overlap(at(MORNING_START), at(AFTERNOON_START)),
            afternoon: self.any_overlap(at(AFTERNOON_START), at(EVENING_START)),
            evening: self.any_overlap(at(EVENING_START), midnight),
        }
    }

    fn any_overlap(&self, from: NaiveDateTime, to: NaiveDateTime) -> bool {
        self.events.iter().any(|e| e.overlaps(from, to))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventStatus, Transparency};

    fn at(day: u32, hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 4, day)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    }

    fn april_first() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 4, 1).unwrap()
    }

    #[test]
    fn test_event_inside_morning() {
        let calc = BusyPeriodCalculator::new(vec![CalendarEvent::new(
            "Standup",
            at(3, 9, 30),
            at(3, 10, 15),
        )]);
        let busy = calc.calculate(april_first(), 1..31);

        assert_eq!(busy.len(), 30);
        assert_eq!(
            busy[2],
            BusyPeriod {
                morning: true,
                afternoon: false,
                evening: false
            }
        );
        assert!(busy.iter().enumerate().all(|(i, b)| i == 2 || b.is_free()));
    }

    #[test]
    fn test_event_spanning_noon_marks_both_buckets() {
        let calc =
            BusyPeriodCalculator::new(vec![CalendarEvent::new("Lunch", at(3, 11, 30), at(3, 12, 30))]);
        let busy = calc.busy_periods_for(at(3, 0, 0).date());
        assert!(busy.morning);
        assert!(busy.afternoon);
        assert!(!busy.evening);
    }

    #[test]
    fn test_touching_boundary_is_not_overlap() {
        let calc =
            BusyPeriodCalculator::new(vec![CalendarEvent::new("Early", at(3, 5, 0), at(3, 6, 0))]);
        assert!(calc.busy_periods_for(at(3, 0, 0).date()).is_free());
    }

    #[test]
    fn test_late_evening_event_counts_until_midnight() {
        let calc =
            BusyPeriodCalculator::new(vec![CalendarEvent::new("Late", at(3, 23, 59), at(4, 1, 0))]);
        let busy = calc.calculate(april_first(), 3..5);
        assert!(busy[0].evening);
        assert!(busy[1].is_free());
    }

    #[test]
    fn test_cancelled_and_free_events_are_ignored() {
        let mut cancelled = CalendarEvent::new("Cancelled", at(3, 9, 0), at(3, 10, 0));
        cancelled.status = EventStatus::Cancelled;
        let mut free = CalendarEvent::new("Focus", at(3, 13, 0), at(3, 14, 0));
        free.transparency = Transparency::Transparent;

        let calc = BusyPeriodCalculator::new(vec![cancelled, free]);
        assert!(calc.busy_periods_for(at(3, 0, 0).date()).is_free());
    }

    #[test]
    fn test_empty_event_set_is_all_free() {
        let busy = BusyPeriodCalculator::default().calculate(april_first(), 1..31);
        assert_eq!(busy.len(), 30);
        assert!(busy.iter().all(BusyPeriod::is_free));
    }
}

//! Calendar-derived signals: busy periods and holidays.
//!
//! Event and holiday lookups fail independently; callers substitute
//! all-free busy periods or an empty holiday set for whichever side failed.

mod ics_dir;

pub use ics_dir::IcsDirectory;

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::busy::{BusyPeriod, BusyPeriodCalculator};
use crate::error::{PicoCalError, PicoCalResult};
use crate::event::CalendarEvent;
use crate::month::CalendarMonth;

pub type HolidaySet = BTreeSet<NaiveDate>;

#[async_trait]
pub trait CalendarSignalSource: Send + Sync {
    /// Event instances overlapping `month`, in local wall time.
    ///
    /// Fails with `PermissionDenied` or `CalendarAccess`.
    async fn events(&self, month: CalendarMonth) -> PicoCalResult<Vec<CalendarEvent>>;

    /// Holiday dates within `month`.
    ///
    /// Fails with `PermissionDenied` or `CalendarAccess`.
    async fn holidays(&self, month: CalendarMonth) -> PicoCalResult<HolidaySet>;
}

/// Placeholder for devices without calendar access.
pub struct NoCalendarSource;

#[async_trait]
impl CalendarSignalSource for NoCalendarSource {
    async fn events(&self, _month: CalendarMonth) -> PicoCalResult<Vec<CalendarEvent>> {
        Err(PicoCalError::CalendarAccess("no calendar configured".into()))
    }

    async fn holidays(&self, _month: CalendarMonth) -> PicoCalResult<HolidaySet> {
        Err(PicoCalError::CalendarAccess("no holiday calendar configured".into()))
    }
}

/// Fetch the month's events and scan them into one busy triple per day.
pub async fn fetch_busy_periods(
    source: &dyn CalendarSignalSource,
    month: CalendarMonth,
) -> PicoCalResult<Vec<BusyPeriod>> {
    let events = source.events(month).await?;
    Ok(BusyPeriodCalculator::new(events).calculate(month.first_day(), month.day_range()))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct OneMeeting;

    #[async_trait]
    impl CalendarSignalSource for OneMeeting {
        async fn events(&self, month: CalendarMonth) -> PicoCalResult<Vec<CalendarEvent>> {
            let day = month.date_of(2).unwrap();
            Ok(vec![CalendarEvent::new(
                "Review",
                day.and_hms_opt(19, 0, 0).unwrap(),
                day.and_hms_opt(20, 0, 0).unwrap(),
            )])
        }

        async fn holidays(&self, _month: CalendarMonth) -> PicoCalResult<HolidaySet> {
            Ok(HolidaySet::new())
        }
    }

    #[tokio::test]
    async fn test_fetch_busy_periods_covers_whole_month() {
        let month = CalendarMonth::from_ym(2024, 2).unwrap();
        let busy = fetch_busy_periods(&OneMeeting, month).await.unwrap();
        assert_eq!(busy.len(), 29);
        assert!(busy[1].evening);
        assert_eq!(busy.iter().filter(|b| !b.is_free()).count(), 1);
    }

    #[tokio::test]
    async fn test_no_calendar_source_fails_both_lookups() {
        let month = CalendarMonth::from_ym(2024, 2).unwrap();
        assert!(fetch_busy_periods(&NoCalendarSource, month).await.is_err());
        assert!(NoCalendarSource.holidays(month).await.is_err());
    }
}

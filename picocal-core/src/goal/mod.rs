//! Daily "goal met" signal.
//!
//! A goal source turns whatever its backend records per day into a
//! [`DayFlags`] for the current month. Threshold rules belong to the source;
//! the rest of the core treats the result as already boolean.

mod daily_totals;
mod github;

pub use daily_totals::DailyTotalsFile;
pub use github::GitHubContributions;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::day_flags::DayFlags;
use crate::error::{PicoCalError, PicoCalResult};
use crate::month::CalendarMonth;

#[async_trait]
pub trait GoalSignalSource: Send + Sync {
    /// Flags for day 1 through `today` of `month`.
    ///
    /// Fails with `SourceUnavailable`, `PermissionDenied` or `Backend`.
    async fn fetch_month_flags(
        &self,
        month: CalendarMonth,
        today: NaiveDate,
    ) -> PicoCalResult<DayFlags>;
}

/// Placeholder for devices without a goal backend.
pub struct NoGoalSource;

#[async_trait]
impl GoalSignalSource for NoGoalSource {
    async fn fetch_month_flags(
        &self,
        _month: CalendarMonth,
        _today: NaiveDate,
    ) -> PicoCalResult<DayFlags> {
        Err(PicoCalError::SourceUnavailable(
            "no goal source configured".into(),
        ))
    }
}

/// When a day's total counts as "goal met".
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GoalThreshold {
    pub minimum: f64,
    /// `true`: total >= minimum. `false`: total > minimum.
    #[serde(default = "default_inclusive")]
    pub inclusive: bool,
}

fn default_inclusive() -> bool {
    true
}

impl GoalThreshold {
    pub fn at_least(minimum: f64) -> Self {
        GoalThreshold {
            minimum,
            inclusive: true,
        }
    }

    pub fn above(minimum: f64) -> Self {
        GoalThreshold {
            minimum,
            inclusive: false,
        }
    }

    pub fn is_met(&self, total: f64) -> bool {
        if self.inclusive {
            total >= self.minimum
        } else {
            total > self.minimum
        }
    }
}

/// Map per-day totals to flags covering day 1 through `today` (clamped to the month).
///
/// Days with no recorded total are `false`, never absent.
pub fn flags_from_daily_totals(
    month: CalendarMonth,
    today: NaiveDate,
    totals: &BTreeMap<NaiveDate, f64>,
    threshold: GoalThreshold,
) -> DayFlags {
    let first = month.first_day();
    if today < first {
        return DayFlags::new();
    }

    let last_day = if month.contains(today) {
        today
    } else {
        first + Duration::days(i64::from(month.days_in_month()) - 1)
    };
    let days = (last_day - first).num_days() + 1;

    (0..days)
        .map(|offset| {
            let date = first + Duration::days(offset);
            totals
                .get(&date)
                .is_some_and(|total| threshold.is_met(*total))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 4, day).unwrap()
    }

    fn april() -> CalendarMonth {
        CalendarMonth::from_ym(2024, 4).unwrap()
    }

    #[test]
    fn test_flags_cover_through_today() {
        let totals = BTreeMap::from([(date(1), 620.0), (date(3), 480.0), (date(4), 501.0)]);
        let flags = flags_from_daily_totals(april(), date(5), &totals, GoalThreshold::above(500.0));
        assert_eq!(flags.as_slice(), &[true, false, false, true, false]);
    }

    #[test]
    fn test_inclusive_threshold() {
        let totals = BTreeMap::from([(date(1), 1.0), (date(2), 0.0)]);
        let flags = flags_from_daily_totals(april(), date(2), &totals, GoalThreshold::at_least(1.0));
        assert_eq!(flags.as_slice(), &[true, false]);
    }

    #[test]
    fn test_totals_outside_month_are_ignored() {
        let march_31 = NaiveDate::from_ymd_opt(2024, 3, 31).unwrap();
        let totals = BTreeMap::from([(march_31, 900.0)]);
        let flags = flags_from_daily_totals(april(), date(1), &totals, GoalThreshold::above(500.0));
        assert_eq!(flags.as_slice(), &[false]);
    }

    #[test]
    fn test_today_after_month_clamps_to_month_length() {
        let may_2 = NaiveDate::from_ymd_opt(2024, 5, 2).unwrap();
        let flags =
            flags_from_daily_totals(april(), may_2, &BTreeMap::new(), GoalThreshold::above(500.0));
        assert_eq!(flags.len(), 30);
    }

    #[test]
    fn test_today_before_month_is_empty() {
        let march_2 = NaiveDate::from_ymd_opt(2024, 3, 2).unwrap();
        let flags =
            flags_from_daily_totals(april(), march_2, &BTreeMap::new(), GoalThreshold::above(1.0));
        assert!(flags.is_empty());
    }
}

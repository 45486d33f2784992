//! Goal source backed by an exported file of daily totals.
//!
//! The file is a JSON object keyed by `YYYY-MM-DD`, e.g. active energy
//! burned per day exported from a health app:
//!
//! ```json
//! { "2024-04-01": 612.5, "2024-04-02": 388.0 }
//! ```

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::NaiveDate;

use super::{GoalSignalSource, GoalThreshold, flags_from_daily_totals};
use crate::day_flags::DayFlags;
use crate::error::{PicoCalError, PicoCalResult};
use crate::month::CalendarMonth;

pub struct DailyTotalsFile {
    path: PathBuf,
    threshold: GoalThreshold,
}

impl DailyTotalsFile {
    pub fn new(path: PathBuf, threshold: GoalThreshold) -> Self {
        DailyTotalsFile { path, threshold }
    }
}

#[async_trait]
impl GoalSignalSource for DailyTotalsFile {
    async fn fetch_month_flags(
        &self,
        month: CalendarMonth,
        today: NaiveDate,
    ) -> PicoCalResult<DayFlags> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => PicoCalError::SourceUnavailable(format!(
                    "no export at {}",
                    self.path.display()
                )),
                ErrorKind::PermissionDenied => {
                    PicoCalError::PermissionDenied(self.path.display().to_string())
                }
                _ => PicoCalError::Backend(e.to_string()),
            })?;

        let totals: BTreeMap<NaiveDate, f64> = serde_json::from_str(&content).map_err(|e| {
            PicoCalError::Backend(format!("Invalid export {}: {e}", self.path.display()))
        })?;

        Ok(flags_from_daily_totals(month, today, &totals, self.threshold))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn april() -> CalendarMonth {
        CalendarMonth::from_ym(2024, 4).unwrap()
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 4, 3).unwrap()
    }

    #[tokio::test]
    async fn test_reads_export_and_applies_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("energy.json");
        std::fs::write(&path, r#"{ "2024-04-01": 612.5, "2024-04-02": 500.0 }"#).unwrap();

        let source = DailyTotalsFile::new(path, GoalThreshold::above(500.0));
        let flags = source.fetch_month_flags(april(), today()).await.unwrap();
        assert_eq!(flags.as_slice(), &[true, false, false]);
    }

    #[tokio::test]
    async fn test_missing_export_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let source = DailyTotalsFile::new(dir.path().join("nope.json"), GoalThreshold::above(1.0));
        let result = source.fetch_month_flags(april(), today()).await;
        assert!(matches!(result, Err(PicoCalError::SourceUnavailable(_))));
    }

    #[tokio::test]
    async fn test_malformed_export_is_backend_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("energy.json");
        std::fs::write(&path, "not json").unwrap();

        let source = DailyTotalsFile::new(path, GoalThreshold::above(1.0));
        let result = source.fetch_month_flags(april(), today()).await;
        assert!(matches!(result, Err(PicoCalError::Backend(_))));
    }
}

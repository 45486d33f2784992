//! Calendar source backed by directories of `.ics` files.
//!
//! One VEVENT per file, as calendar sync tools usually lay them out. Holidays
//! come from a separate directory whose events mark whole days.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{Duration, NaiveDateTime, NaiveTime};
use chrono_tz::Tz;
use tracing::{debug, warn};

use super::{CalendarSignalSource, HolidaySet};
use crate::error::{PicoCalError, PicoCalResult};
use crate::event::CalendarEvent;
use crate::ics::{IcsEvent, parse_event};
use crate::month::CalendarMonth;
use crate::recurrence::expand_occurrences;

pub struct IcsDirectory {
    events_dir: PathBuf,
    holidays_dir: Option<PathBuf>,
    zone: Tz,
}

impl IcsDirectory {
    pub fn new(events_dir: PathBuf, zone: Tz) -> Self {
        IcsDirectory {
            events_dir,
            holidays_dir: None,
            zone,
        }
    }

    pub fn with_holidays(mut self, holidays_dir: PathBuf) -> Self {
        self.holidays_dir = Some(holidays_dir);
        self
    }

    /// Local `(start, end)` of every instance of `event` that could touch `month`.
    fn instances(&self, event: &IcsEvent, month: CalendarMonth) -> Vec<(NaiveDateTime, NaiveDateTime)> {
        let start = event.start.to_local(self.zone);
        let duration = match &event.end {
            Some(end) => (end.to_local(self.zone) - start).max(Duration::zero()),
            None if event.start.is_date() => Duration::days(1),
            None => Duration::zero(),
        };

        if event.rrule.is_none() {
            return vec![(start, start + duration)];
        }

        // pad by a day so zone offsets can't push an instance out of the window,
        // and by the event's length so one started last month still counts
        let from = (month.start() - Duration::days(1) - duration).and_utc();
        let to = (month.end() + Duration::days(1)).and_utc();

        match expand_occurrences(event, from, to) {
            Ok(starts) => starts
                .iter()
                .map(|occurrence| {
                    let start = occurrence.to_local(self.zone);
                    (start, start + duration)
                })
                .collect(),
            Err(e) => {
                warn!(uid = %event.uid, error = %e, "skipping recurring event");
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl CalendarSignalSource for IcsDirectory {
    async fn events(&self, month: CalendarMonth) -> PicoCalResult<Vec<CalendarEvent>> {
        let (window_start, window_end) = (month.start(), month.end());

        let events: Vec<CalendarEvent> = load_dir(&self.events_dir)
            .await?
            .iter()
            .flat_map(|event| {
                self.instances(event, month)
                    .into_iter()
                    .map(move |(start, end)| CalendarEvent {
                        uid: event.uid.clone(),
                        summary: event.summary.clone(),
                        start,
                        end,
                        all_day: event.start.is_date(),
                        status: event.status,
                        transparency: event.transparency,
                    })
            })
            .filter(|e| e.overlaps(window_start, window_end))
            .collect();

        debug!(count = events.len(), %month, "loaded calendar events");
        Ok(events)
    }

    async fn holidays(&self, month: CalendarMonth) -> PicoCalResult<HolidaySet> {
        let Some(dir) = &self.holidays_dir else {
            return Ok(HolidaySet::new());
        };

        let mut holidays = HolidaySet::new();
        for event in load_dir(dir).await? {
            for (start, end) in self.instances(&event, month) {
                let mut day = start.date();
                loop {
                    if month.contains(day) {
                        holidays.insert(day);
                    }
                    day += Duration::days(1);
                    if day.and_time(NaiveTime::MIN) >= end {
                        break;
                    }
                }
            }
        }

        Ok(holidays)
    }
}

async fn load_dir(dir: &Path) -> PicoCalResult<Vec<IcsEvent>> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| access_error(dir, e))?;

    let mut events = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(|e| access_error(dir, e))? {
        let path = entry.path();
        if !path.extension().is_some_and(|e| e == "ics") {
            continue;
        }

        match tokio::fs::read_to_string(&path).await {
            Ok(content) => match parse_event(&content) {
                Some(event) => events.push(event),
                None => warn!(path = %path.display(), "skipping unparseable event file"),
            },
            Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable event file"),
        }
    }

    Ok(events)
}

fn access_error(dir: &Path, e: std::io::Error) -> PicoCalError {
    match e.kind() {
        ErrorKind::PermissionDenied => PicoCalError::PermissionDenied(dir.display().to_string()),
        _ => PicoCalError::CalendarAccess(format!("{}: {e}", dir.display())),
    }
}

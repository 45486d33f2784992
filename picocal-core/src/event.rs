//! Calendar events as seen by the busy-period scan.
//!
//! Times are local wall-clock times in the configured zone; sources convert
//! whatever they read into this shape before handing events to the core.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub uid: String,
    pub summary: String,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub all_day: bool,
    pub status: EventStatus,
    pub transparency: Transparency,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventStatus {
    Confirmed,
    Tentative,
    Cancelled,
}

/// Event transparency (busy/free status)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Transparency {
    /// Event blocks time on calendar (default)
    Opaque,
    /// Event does not block time (shows as free)
    Transparent,
}

impl CalendarEvent {
    pub fn new(summary: &str, start: NaiveDateTime, end: NaiveDateTime) -> Self {
        CalendarEvent {
            uid: String::new(),
            summary: summary.to_string(),
            start,
            end,
            all_day: false,
            status: EventStatus::Confirmed,
            transparency: Transparency::Opaque,
        }
    }

    /// Whether this event occupies time on the calendar.
    pub fn blocks_time(&self) -> bool {
        self.status != EventStatus::Cancelled && self.transparency == Transparency::Opaque
    }

    /// Half-open overlap test against `[from, to)`.
    pub fn overlaps(&self, from: NaiveDateTime, to: NaiveDateTime) -> bool {
        self.start < to && self.end > from
    }
}

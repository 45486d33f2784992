//! Reconciliation core for picocal.
//!
//! Keeps a per-day "goal met" timeline in step between two devices:
//! - `day_flags` for the timeline type and its monotonic union
//! - `goal` and `calendar` for the fallible signal sources
//! - `store` for the durable snapshot
//! - `peer` for the intermittent device-to-device link
//! - `refresh` for the cycle tying them together
//! - `grid` for reading the result back as a month

pub mod busy;
pub mod calendar;
pub mod clock;
pub mod config;
pub mod day_flags;
pub mod error;
pub mod event;
pub mod goal;
pub mod grid;
pub mod ics;
pub mod month;
pub mod peer;
pub mod recurrence;
pub mod refresh;
pub mod store;

pub use config::PicoCalConfig;
pub use day_flags::DayFlags;
pub use error::{PicoCalError, PicoCalResult};
pub use month::CalendarMonth;
pub use refresh::{DeviceRole, RefreshCoordinator, RefreshOutcome, RefreshTrigger};

use anyhow::Result;
use owo_colors::OwoColorize;
use picocal_core::clock::{Clock, ZonedClock};
use picocal_core::grid::MonthGrid;
use picocal_core::refresh::CalendarState;
use picocal_core::store::{FileBackend, SHARED_FLAGS_KEY, SharedStore};
use picocal_core::{CalendarMonth, DayFlags, PicoCalConfig};

use crate::render::Render;

pub fn run(config: &PicoCalConfig) -> Result<()> {
    let store = SharedStore::open(FileBackend::in_dir(&config.store_dir()));
    let now = ZonedClock(config.timezone()?).now();
    let month = CalendarMonth::of(now);

    // a snapshot recorded in an earlier month is cleared on the next sync
    let flags = if store.last_recorded() == Some(month.stamp()) {
        store.retrieve(SHARED_FLAGS_KEY)
    } else {
        println!("{}", "No snapshot for this month yet".dimmed());
        DayFlags::new()
    };

    let state = CalendarState::from_snapshot(month, flags);
    let grid = MonthGrid::build(month, now.date(), &state, config.first_weekday);
    println!("{}", grid.render());

    Ok(())
}

use anyhow::Result;
use owo_colors::OwoColorize;
use picocal_core::clock::{Clock, ZonedClock};
use picocal_core::grid::MonthGrid;
use picocal_core::{PicoCalConfig, RefreshOutcome, RefreshTrigger};

use crate::render::Render;

pub async fn run(config: &PicoCalConfig, trigger: RefreshTrigger) -> Result<()> {
    let coordinator = super::coordinator(config).await?;

    match coordinator.refresh(trigger).await {
        RefreshOutcome::Completed(report) => {
            println!("{}", report.render());
            println!();

            let today = ZonedClock(config.timezone()?).now().date();
            let grid = MonthGrid::build(
                report.month,
                today,
                &coordinator.state(),
                config.first_weekday,
            );
            println!("{}", grid.render());
        }
        RefreshOutcome::AlreadyRunning => {
            println!("{}", "A refresh is already running".dimmed());
        }
    }

    Ok(())
}

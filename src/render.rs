//! Terminal rendering for picocal types.

use chrono::Weekday;
use owo_colors::OwoColorize;
use picocal_core::busy::BusyPeriod;
use picocal_core::grid::{DayCell, GridCell, MonthGrid};
use picocal_core::refresh::{PeerOutcome, RefreshReport};

/// Extension trait for TUI rendering with colors.
pub trait Render {
    fn render(&self) -> String;
}

/// Width of one grid column, including the separating space
const CELL_WIDTH: usize = 4;

fn weekday_label(day: Weekday) -> String {
    let name = format!("{day:?}");
    name[..2].to_string()
}

fn busy_marks(busy: BusyPeriod) -> String {
    [busy.morning, busy.afternoon, busy.evening]
        .iter()
        .map(|&b| if b { '•' } else { '·' })
        .collect()
}

fn render_day(cell: &DayCell) -> String {
    let text = format!("{:>3}", cell.day);
    let styled = if cell.complete {
        text.green().bold().to_string()
    } else if cell.holiday {
        text.red().to_string()
    } else if cell.is_past {
        text.dimmed().to_string()
    } else {
        text
    };

    if cell.is_today {
        format!("{} ", styled.underline())
    } else {
        format!("{styled} ")
    }
}

impl Render for MonthGrid {
    fn render(&self) -> String {
        let mut lines = Vec::new();

        let title = self.month.to_string();
        let width = CELL_WIDTH * 7;
        lines.push(format!("{:^width$}", title).bold().to_string());

        let mut header = String::new();
        let mut day = self.first_weekday;
        for _ in 0..7 {
            header.push_str(&format!("{:>3} ", weekday_label(day)));
            day = day.succ();
        }
        lines.push(header.dimmed().to_string());

        for week in self.weeks() {
            let mut numbers = String::new();
            let mut marks = String::new();
            for cell in week {
                match cell {
                    GridCell::Blank => {
                        numbers.push_str(&" ".repeat(CELL_WIDTH));
                        marks.push_str(&" ".repeat(CELL_WIDTH));
                    }
                    GridCell::Day(day) => {
                        numbers.push_str(&render_day(day));
                        marks.push_str(&format!("{} ", busy_marks(day.busy)));
                    }
                }
            }
            lines.push(numbers.trim_end().to_string());
            lines.push(marks.trim_end().dimmed().to_string());
        }

        let met = self.days().filter(|d| d.complete).count();
        let total = self.days().count();
        lines.push(format!("{met}/{total} days met").dimmed().to_string());

        lines.join("\n")
    }
}

fn render_step(label: &str, error: Option<&str>) -> String {
    match error {
        None => format!("   {} {}", "✓".green(), label),
        Some(e) => format!("   {} {} {}", "✗".red(), label, e.red()),
    }
}

impl Render for PeerOutcome {
    fn render(&self) -> String {
        match self {
            PeerOutcome::Acknowledged(reply) => {
                format!("   {} peer {}", "✓".green(), reply.dimmed())
            }
            PeerOutcome::Skipped => format!("   {} peer {}", "-".dimmed(), "not pushed".dimmed()),
            PeerOutcome::Failed(e) => format!("   {} peer {}", "✗".yellow(), e.yellow()),
        }
    }
}

impl Render for RefreshReport {
    fn render(&self) -> String {
        let mut lines = vec![format!(
            "{} {} ({} trigger)",
            "Synced".bold(),
            self.month,
            self.trigger
        )];

        if self.cleared {
            lines.push(format!("   {}", "New month, snapshot cleared".cyan()));
        }
        lines.push(render_step("goal", self.goal_error.as_deref()));
        lines.push(render_step("busy periods", self.busy_error.as_deref()));
        lines.push(render_step("holidays", self.holidays_error.as_deref()));
        lines.push(render_step("store", self.persist_error.as_deref()));
        lines.push(self.peer.render());

        lines.join("\n")
    }
}

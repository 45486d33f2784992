//! Occurrences of repeating events inside a window.

use chrono::{DateTime, Duration, Utc};
use rrule::RRuleSet;

use crate::error::{PicoCalError, PicoCalResult};
use crate::ics::{EventTime, IcsEvent};

/// A month holds at most 31 daily instances; this leaves room for sub-daily rules.
const MAX_INSTANCES: u16 = 366;

/// `DTSTART`/`EXDATE` suffix in the form the rrule parser accepts.
fn rule_time(time: &EventTime) -> String {
    match time {
        // all-day anchors are read as midnight UTC; callers only keep the date
        EventTime::Date(day) => day.format(":%Y%m%dT000000Z").to_string(),
        EventTime::DateTimeUtc(at) => at.format(":%Y%m%dT%H%M%SZ").to_string(),
        EventTime::DateTimeFloating(at) => at.format(":%Y%m%dT%H%M%SZ").to_string(),
        EventTime::DateTimeZoned { datetime, tzid } => {
            format!(";TZID={tzid}{}", datetime.format(":%Y%m%dT%H%M%S"))
        }
    }
}

fn rule_set(master: &IcsEvent, rule: &str) -> PicoCalResult<RRuleSet> {
    let mut text = format!("DTSTART{}\nRRULE:{rule}", rule_time(&master.start));
    for skipped in &master.exdates {
        text.push_str("\nEXDATE");
        text.push_str(&rule_time(skipped));
    }
    text.parse().map_err(|e| {
        PicoCalError::IcsParse(format!("bad RRULE on '{}': {e}", master.uid))
    })
}

/// Re-express an instance in the same form as the event's own start.
fn shaped_like(anchor: &EventTime, instance: DateTime<rrule::Tz>) -> EventTime {
    match anchor {
        EventTime::Date(_) => EventTime::Date(instance.date_naive()),
        EventTime::DateTimeUtc(_) => EventTime::DateTimeUtc(instance.to_utc()),
        EventTime::DateTimeFloating(_) => EventTime::DateTimeFloating(instance.naive_utc()),
        EventTime::DateTimeZoned { tzid, .. } => EventTime::DateTimeZoned {
            datetime: instance.naive_local(),
            tzid: tzid.clone(),
        },
    }
}

/// Start times of every instance of `master` within `[from, to]`, both ends included.
///
/// Non-recurring events yield nothing.
pub fn expand_occurrences(
    master: &IcsEvent,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> PicoCalResult<Vec<EventTime>> {
    let Some(rule) = master.rrule.as_deref() else {
        return Ok(Vec::new());
    };

    // rrule's after/before bounds are exclusive
    let utc = rrule::Tz::UTC;
    let window = rule_set(master, rule)?
        .after((from - Duration::seconds(1)).with_timezone(&utc))
        .before((to + Duration::seconds(1)).with_timezone(&utc));

    let found = window.all(MAX_INSTANCES);
    if found.limited {
        tracing::debug!(uid = %master.uid, "occurrence cap reached");
    }

    Ok(found
        .dates
        .into_iter()
        .map(|instance| shaped_like(&master.start, instance))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ics::parse_event;
    use chrono::TimeZone;

    fn standup() -> IcsEvent {
        let lines = [
            "BEGIN:VCALENDAR",
            "VERSION:2.0",
            "PRODID:-//picocal//tests//EN",
            "BEGIN:VEVENT",
            "UID:standup-3",
            "SUMMARY:Standup",
            "DTSTART:20240101T093000Z",
            "DTEND:20240101T094500Z",
            "RRULE:FREQ=WEEKLY;BYDAY=MO,TH",
            "EXDATE:20240411T093000Z",
            "END:VEVENT",
            "END:VCALENDAR",
        ];
        parse_event(&lines.join("\r\n")).unwrap()
    }

    fn april() -> (DateTime<Utc>, DateTime<Utc>) {
        (
            Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 4, 30, 23, 59, 59).unwrap(),
        )
    }

    #[test]
    fn test_april_instances_skip_exdate() {
        let (from, to) = april();
        let days: Vec<u32> = expand_occurrences(&standup(), from, to)
            .unwrap()
            .iter()
            .map(|t| chrono::Datelike::day(&t.to_local(chrono_tz::UTC)))
            .collect();

        // Mondays and Thursdays, minus the 11th
        assert_eq!(days, vec![1, 4, 8, 15, 18, 22, 25, 29]);
    }

    #[test]
    fn test_window_edges_are_inclusive() {
        let event = standup();
        let from = Utc.with_ymd_and_hms(2024, 4, 1, 9, 30, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2024, 4, 4, 9, 30, 0).unwrap();
        assert_eq!(expand_occurrences(&event, from, to).unwrap().len(), 2);
    }

    #[test]
    fn test_single_event_has_no_occurrences() {
        let mut event = standup();
        event.rrule = None;
        let (from, to) = april();
        assert!(expand_occurrences(&event, from, to).unwrap().is_empty());
    }
}

//! Reading VEVENTs out of `.ics` files.
//!
//! Only the fields the busy/holiday scan needs are kept. Times are held in
//! their original form until [`EventTime::to_local`] projects them onto the
//! configured zone.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use icalendar::{
    CalendarDateTime, DatePerhapsTime,
    parser::{Property, read_calendar, unfold},
};

use crate::event::{EventStatus, Transparency};

#[derive(Debug, Clone, PartialEq)]
pub enum EventTime {
    Date(NaiveDate),
    DateTimeUtc(chrono::DateTime<Utc>),
    DateTimeFloating(NaiveDateTime),
    DateTimeZoned { datetime: NaiveDateTime, tzid: String },
}

impl EventTime {
    pub fn is_date(&self) -> bool {
        matches!(self, EventTime::Date(_))
    }

    /// Wall-clock time of this instant in `zone`.
    ///
    /// Floating times are already wall-clock. Unknown TZIDs are treated as floating.
    pub fn to_local(&self, zone: Tz) -> NaiveDateTime {
        match self {
            EventTime::Date(d) => d.and_time(NaiveTime::MIN),
            EventTime::DateTimeUtc(dt) => dt.with_timezone(&zone).naive_local(),
            EventTime::DateTimeFloating(dt) => *dt,
            EventTime::DateTimeZoned { datetime, tzid } => match tzid.parse::<Tz>() {
                Ok(source_zone) => source_zone
                    .from_local_datetime(datetime)
                    .earliest()
                    .map(|dt| dt.with_timezone(&zone).naive_local())
                    .unwrap_or(*datetime),
                Err(_) => *datetime,
            },
        }
    }
}

/// The parts of a VEVENT the core cares about.
#[derive(Debug, Clone)]
pub struct IcsEvent {
    pub uid: String,
    pub summary: String,
    pub start: EventTime,
    pub end: Option<EventTime>,
    pub status: EventStatus,
    pub transparency: Transparency,
    pub rrule: Option<String>,
    pub exdates: Vec<EventTime>,
}

/// First VEVENT in `content`, or `None` if there is none or it lacks UID/DTSTART.
pub fn parse_event(content: &str) -> Option<IcsEvent> {
    let unfolded = unfold(content);
    let calendar = read_calendar(&unfolded).ok()?;
    let vevent = calendar.components.iter().find(|c| c.name == "VEVENT")?;
    let text = |name: &str| vevent.find_prop(name).map(|p| p.val.to_string());
    let time = |name: &str| {
        vevent
            .find_prop(name)
            .and_then(|p| DatePerhapsTime::try_from(p).ok())
            .map(to_event_time)
    };

    let status = match text("STATUS").as_deref() {
        Some("CANCELLED") => EventStatus::Cancelled,
        Some("TENTATIVE") => EventStatus::Tentative,
        _ => EventStatus::Confirmed,
    };
    let transparency = match text("TRANSP").as_deref() {
        Some("TRANSPARENT") => Transparency::Transparent,
        _ => Transparency::Opaque,
    };

    Some(IcsEvent {
        uid: text("UID")?,
        summary: text("SUMMARY").unwrap_or_default(),
        start: time("DTSTART")?,
        end: time("DTEND"),
        status,
        transparency,
        rrule: text("RRULE"),
        exdates: vevent
            .properties
            .iter()
            .filter(|p| p.name == "EXDATE")
            .flat_map(parse_exdate_property)
            .collect(),
    })
}

fn to_event_time(dpt: DatePerhapsTime) -> EventTime {
    match dpt {
        DatePerhapsTime::Date(d) => EventTime::Date(d),
        DatePerhapsTime::DateTime(cal_dt) => match cal_dt {
            CalendarDateTime::Utc(dt) => EventTime::DateTimeUtc(dt),
            CalendarDateTime::Floating(naive) => EventTime::DateTimeFloating(naive),
            CalendarDateTime::WithTimezone { date_time, tzid } => EventTime::DateTimeZoned {
                datetime: date_time,
                tzid,
            },
        },
    }
}

/// One bare ICS time value. `tzid` wins over a trailing `Z`.
fn parse_time_value(value: &str, tzid: Option<&str>, date_only: bool) -> Option<EventTime> {
    if date_only {
        return NaiveDate::parse_from_str(value, "%Y%m%d").ok().map(EventTime::Date);
    }

    let (bare, utc) = match value.strip_suffix('Z') {
        Some(bare) => (bare, true),
        None => (value, false),
    };
    let datetime = NaiveDateTime::parse_from_str(bare, "%Y%m%dT%H%M%S").ok()?;

    Some(match (tzid, utc) {
        (Some(tzid), _) => EventTime::DateTimeZoned {
            datetime,
            tzid: tzid.to_string(),
        },
        (None, true) => EventTime::DateTimeUtc(datetime.and_utc()),
        (None, false) => EventTime::DateTimeFloating(datetime),
    })
}

/// EXDATE may list several comma-separated values sharing one TZID/VALUE.
fn parse_exdate_property(prop: &Property) -> Vec<EventTime> {
    let param = |key: &str| {
        prop.params
            .iter()
            .find(|p| p.key == key)
            .and_then(|p| p.val.as_ref())
            .map(|v| v.to_string())
    };
    let tzid = param("TZID");
    let date_only = param("VALUE").as_deref() == Some("DATE");

    prop.val
        .as_ref()
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .filter_map(|v| parse_time_value(v, tzid.as_deref(), date_only))
        .collect()
}

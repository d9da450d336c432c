//! ICS payload generation.

use crate::constants::PRODID;
use crate::event::{DesiredEvent, EventTime, TaskStatus};
use icalendar::{Alarm, Calendar, Component, EventLike, Property, Trigger, ValueType};

/// Generate the .ics payload PUT to the calendar for a desired event.
pub fn generate_ics(event: &DesiredEvent) -> String {
    let mut cal = Calendar::new();

    let mut ics_event = icalendar::Event::new();
    ics_event.uid(&event.task_id);
    ics_event.summary(&event.summary);

    // DTSTAMP is required by RFC 5545; it never feeds the content hash
    let dtstamp = chrono::Utc::now().format("%Y%m%dT%H%M%SZ").to_string();
    ics_event.add_property("DTSTAMP", &dtstamp);

    add_datetime_property(&mut ics_event, "DTSTART", &event.start);
    add_datetime_property(&mut ics_event, "DTEND", &event.end);

    if let Some(ref desc) = event.description {
        ics_event.description(desc);
    }

    if let Some(ref loc) = event.location {
        ics_event.location(loc);
    }

    if let Some(ref url) = event.url {
        ics_event.add_property("URL", url);
    }

    if let Some(ref category) = event.category {
        ics_event.add_property("CATEGORIES", category);
    }

    // Only CANCELLED maps onto a VEVENT status; everything else is CONFIRMED (implied)
    if event.status == TaskStatus::Cancelled {
        ics_event.add_property("STATUS", "CANCELLED");
    }

    // All-day tasks don't block time
    if event.is_all_day() {
        ics_event.add_property("TRANSP", "TRANSPARENT");
    }

    if let Some(minutes) = event.reminder_minutes {
        let trigger = Trigger::before_start(chrono::Duration::minutes(minutes));
        let alarm = Alarm::display("Reminder", trigger);
        ics_event.alarm(alarm);
    }

    let ics_event = ics_event.done();
    cal.push(ics_event);
    let cal = cal.done();

    strip_ics_bloat(&cal.to_string())
}

/// Clean up ICS output from the icalendar crate
/// - Replace PRODID with ours
/// - Remove CALSCALE:GREGORIAN (it's the default)
/// - Remove DTSTAMP and UID inside VALARM sections (not required by RFC 5545)
fn strip_ics_bloat(ics: &str) -> String {
    let mut result = String::with_capacity(ics.len());
    let mut in_valarm = false;

    for line in ics.lines() {
        if line.starts_with("PRODID:") {
            result.push_str("PRODID:");
            result.push_str(PRODID);
            result.push_str("\r\n");
            continue;
        }

        if line == "CALSCALE:GREGORIAN" {
            continue;
        }

        if line == "BEGIN:VALARM" {
            in_valarm = true;
        } else if line == "END:VALARM" {
            in_valarm = false;
        }

        if in_valarm && (line.starts_with("DTSTAMP:") || line.starts_with("UID:")) {
            continue;
        }

        result.push_str(line);
        result.push_str("\r\n");
    }

    result
}

/// Add a datetime property with proper formatting based on EventTime variant
fn add_datetime_property(ics_event: &mut icalendar::Event, name: &str, time: &EventTime) {
    match time {
        EventTime::Date(_) => {
            let mut prop = Property::new(name, time.to_ics_string());
            prop.append_parameter(ValueType::Date);
            ics_event.append_property(prop);
        }
        EventTime::DateTime(_) => {
            ics_event.add_property(name, time.to_ics_string());
        }
    }
}

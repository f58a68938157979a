use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use courier_types::{AgentAssignment, Task, TaskPriority, TaskType};

/// One VEVENT lifted out of an ICS attachment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub summary: String,
    pub description: String,
    pub location: String,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub organizer: String,
    pub attendees: Vec<String>,
    pub uid: String,
    pub recurrence: Option<String>,
}

static MAILTO: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)mailto:([^\s;]+)").unwrap());

/// Parse ICS content into events. Line-based: properties are split at the
/// first `:` with any `;`-separated parameters dropped, and folded
/// continuation lines (leading whitespace) are joined first.
pub fn parse_ics(content: &str) -> Vec<CalendarEvent> {
    let unfolded = unfold_lines(content);
    let mut events = Vec::new();
    let mut current: Option<CalendarEvent> = None;

    for line in unfolded {
        if line.eq_ignore_ascii_case("BEGIN:VEVENT") {
            current = Some(CalendarEvent::default());
            continue;
        }
        if line.eq_ignore_ascii_case("END:VEVENT") {
            if let Some(event) = current.take() {
                if !event.summary.is_empty() || event.start_time.is_some() {
                    events.push(event);
                }
            }
            continue;
        }
        let Some(event) = current.as_mut() else {
            continue;
        };
        let Some((name, value)) = split_property(&line) else {
            continue;
        };
        match name.to_ascii_uppercase().as_str() {
            "SUMMARY" => event.summary = value.to_string(),
            "DESCRIPTION" => event.description = value.to_string(),
            "LOCATION" => event.location = value.to_string(),
            "UID" => event.uid = value.to_string(),
            "RRULE" => event.recurrence = Some(value.to_string()),
            "DTSTART" => event.start_time = parse_ics_datetime(value),
            "DTEND" => event.end_time = parse_ics_datetime(value),
            "ORGANIZER" => {
                event.organizer = MAILTO
                    .captures(value)
                    .map(|c| c[1].to_string())
                    .unwrap_or_else(|| value.to_string());
            }
            "ATTENDEE" => {
                if let Some(caps) = MAILTO.captures(value) {
                    event.attendees.push(caps[1].to_string());
                }
            }
            _ => {}
        }
    }

    events
}

fn unfold_lines(content: &str) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    for raw in content.lines() {
        let line = raw.trim_end_matches('\r');
        if (line.starts_with(' ') || line.starts_with('\t')) && !lines.is_empty() {
            if let Some(last) = lines.last_mut() {
                last.push_str(line.trim_start());
            }
        } else {
            lines.push(line.to_string());
        }
    }
    lines
}

/// `DTSTART;TZID=Europe/Paris:20250901T100000` → ("DTSTART", "20250901T100000")
fn split_property(line: &str) -> Option<(&str, &str)> {
    let (head, value) = line.split_once(':')?;
    let name = head.split(';').next().unwrap_or(head);
    Some((name.trim(), value.trim()))
}

fn parse_ics_datetime(raw: &str) -> Option<DateTime<Utc>> {
    let cleaned = raw.trim().trim_end_matches('Z');
    if let Ok(dt) = NaiveDateTime::parse_from_str(cleaned, "%Y%m%dT%H%M%S") {
        return Some(Utc.from_utc_datetime(&dt));
    }
    if let Ok(date) = NaiveDate::parse_from_str(cleaned, "%Y%m%d") {
        return date.and_hms_opt(0, 0, 0).map(|dt| Utc.from_utc_datetime(&dt));
    }
    None
}

/// Convert a calendar event into a task. Proximity drives priority: events
/// within a day are high, within three days medium, otherwise low.
pub fn task_from_event(event: &CalendarEvent, sender: &str, now: DateTime<Utc>) -> Task {
    let priority = match event.start_time {
        Some(start) => {
            let days_until = (start - now).num_days();
            if days_until <= 1 {
                TaskPriority::High
            } else if days_until <= 3 {
                TaskPriority::Medium
            } else {
                TaskPriority::Low
            }
        }
        None => TaskPriority::Medium,
    };

    let summary = if event.summary.is_empty() {
        "Untitled Event"
    } else {
        &event.summary
    };

    let mut task = Task::new(
        format!("Calendar Event: {summary}"),
        format!("Add calendar event from {sender}"),
    );
    task.task_type = TaskType::CalendarEvent;
    task.priority = priority;
    // No calendar specialist is configured; the general assignment stands in.
    task.assignment = AgentAssignment::general("Calendar events route to the general assistant");
    task.requirements.deadline = event.start_time.filter(|start| *start > now);

    let mut constraints = vec![format!("Add event '{summary}' to calendar")];
    if let Some(start) = event.start_time {
        constraints.push(format!("Start: {}", start.to_rfc3339()));
    }
    if let Some(end) = event.end_time {
        constraints.push(format!("End: {}", end.to_rfc3339()));
    }
    if !event.location.is_empty() {
        constraints.push(format!("Location: {}", event.location));
    }
    if let Some(rule) = &event.recurrence {
        constraints.push(format!("Recurrence: {rule}"));
    }
    task.requirements.constraints = constraints;

    task.context.insert(
        "event_details".to_string(),
        serde_json::to_value(event).unwrap_or(serde_json::Value::Null),
    );
    task.context
        .insert("source".to_string(), serde_json::json!("email_calendar_attachment"));
    task.note("created from calendar attachment");
    task
}

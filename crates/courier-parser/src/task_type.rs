use once_cell::sync::Lazy;
use regex::Regex;

use courier_types::{ParsingConfig, TaskType};

static CALENDAR_PHRASES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(meeting|invite|calendar|schedule a call|schedule a meeting|appointment|rsvp)\b")
        .unwrap()
});

/// Detect the task type from keyword families, checked in the configured
/// precedence order. Calendar phrasing is checked after the keyword families
/// fail; `general` is the final fallback.
pub fn detect_task_type(subject: &str, body: &str, config: &ParsingConfig) -> TaskType {
    let content = format!("{} {}", subject, body).to_lowercase();

    for family in &config.task_type_keywords {
        if family.keywords.iter().any(|kw| content.contains(kw.as_str())) {
            return family.task_type;
        }
    }

    if CALENDAR_PHRASES.is_match(&content) {
        return TaskType::CalendarEvent;
    }

    TaskType::General
}

use courier_types::{ParsingConfig, TaskPriority};

/// Detect priority from keyword markers in the combined subject and body.
///
/// Precedence is urgent > high > low; medium is the default. When markers
/// from several sets appear, the highest-priority set wins regardless of
/// position in the text.
pub fn detect_priority(subject: &str, body: &str, config: &ParsingConfig) -> TaskPriority {
    let content = format!("{} {}", subject, body).to_lowercase();

    let matches = |keywords: &[String]| keywords.iter().any(|kw| content.contains(kw.as_str()));

    if matches(&config.urgent_keywords) {
        TaskPriority::Urgent
    } else if matches(&config.high_keywords) {
        TaskPriority::High
    } else if matches(&config.low_keywords) {
        TaskPriority::Low
    } else {
        TaskPriority::Medium
    }
}

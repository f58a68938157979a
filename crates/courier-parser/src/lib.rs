//! Email → structured-task extraction.
//!
//! The parser is total: `parse` always returns a `Task`. Individual stages
//! (priority, task type, deadline, lists, title, tags, hygiene) are pure
//! functions over the envelope text; when envelope assembly itself fails the
//! parser emits a fallback task that embeds the serialized input and the
//! failure reason, so nothing is ever dropped on the floor.

mod calendar;
mod deadline;
mod hygiene;
mod lists;
mod priority;
mod tags;
mod task_type;
mod title;

pub use calendar::{parse_ics, task_from_event, CalendarEvent};
pub use deadline::{extract_deadline, DeadlineCandidate};
pub use hygiene::{scrub_body, ScrubbedBody};
pub use lists::{
    extract_inline_list, extract_list_items, extract_requirement_sections, RequirementSections,
};
pub use priority::detect_priority;
pub use tags::extract_tags;
pub use task_type::detect_task_type;
pub use title::extract_title;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};

use courier_types::{
    AgentAssignment, AttachmentInfo, CourierConfig, EmailEnvelope, EmailMetadata, Task,
    TaskPriority, TaskRequirements, TaskType,
};

static URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"https?://[^\s<>"{}|\\^`\[\]]+"#).unwrap());
static EMAIL_ADDR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[\w.-]+@[\w.-]+\.\w+\b").unwrap());
static PR_ISSUE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?:#|PR|pr|issue)\s*(\d+)").unwrap());
static INLINE_SECTION: Lazy<[(Regex, usize); 3]> = Lazy::new(|| {
    [
        (
            Regex::new(r"(?im)^.*(?:deliverables?|outputs?)\s*(?:include|:|;)\s*(.+)$").unwrap(),
            0,
        ),
        (
            Regex::new(r"(?im)^.*(?:success\s+criteria|acceptance\s+criteria|done\s+when)\s*[:;]\s*(.+)$")
                .unwrap(),
            1,
        ),
        (
            Regex::new(r"(?im)^.*(?:depends\s+on|blocked\s+by|waiting\s+for)\s*[:;]?\s*(.+)$")
                .unwrap(),
            2,
        ),
    ]
});

pub struct EmailParser {
    config: Arc<CourierConfig>,
}

impl EmailParser {
    pub fn new(config: Arc<CourierConfig>) -> Self {
        Self { config }
    }

    /// Parse an email envelope into a task. Never fails; malformed input
    /// yields a fallback task with a processing note.
    pub fn parse(&self, envelope: &EmailEnvelope) -> Task {
        match self.parse_inner(envelope) {
            Ok(task) => {
                tracing::info!(task_id = %task.task_id, task_type = %task.task_type, "parsed email into task");
                task
            }
            Err(reason) => {
                tracing::warn!(%reason, "email parse failed, emitting fallback task");
                self.fallback_task(envelope, &reason)
            }
        }
    }

    fn parse_inner(&self, envelope: &EmailEnvelope) -> Result<Task, String> {
        if envelope.subject.is_empty()
            && envelope.body_plain.is_empty()
            && envelope.sender.is_empty()
            && envelope.headers.is_empty()
        {
            return Err("empty envelope".to_string());
        }

        let metadata = extract_metadata(envelope);
        let subject = metadata.subject.clone();
        let now = Utc::now();

        // An ICS attachment pasted or attached inline wins over free-form
        // parsing: the event already carries the structure.
        if envelope.body_plain.contains("BEGIN:VCALENDAR") {
            if let Some(event) = parse_ics(&envelope.body_plain).into_iter().next() {
                let mut task = task_from_event(&event, &metadata.sender, now);
                task.email_metadata = Some(metadata);
                return Ok(task);
            }
        }

        let parsing = &self.config.parsing;
        let task_type = detect_task_type(&subject, &envelope.body_plain, parsing);
        let priority = detect_priority(&subject, &envelope.body_plain, parsing);

        let scrubbed = scrub_body(&envelope.body_plain);
        let title = extract_title(&subject, &scrubbed.text);
        let description = if scrubbed.text.len() < 20 {
            format!("Subject: {}\n\n{}", subject, scrubbed.text)
        } else {
            scrubbed.text.clone()
        };

        let requirements = extract_requirements(&envelope.body_plain, now);

        let rule = self.config.assignment_for(task_type);
        let assignment = AgentAssignment {
            primary_agent: rule.primary,
            supporting_agents: rule.supporting,
            reason: rule.reason,
        };

        let mut task = Task::new(title, description);
        task.task_type = task_type;
        task.priority = priority;
        task.requirements = requirements;
        task.assignment = assignment;
        task.context = extract_context(envelope, &scrubbed);
        task.extend_tags(extract_tags(&subject, &envelope.body_plain, parsing));
        task.email_metadata = Some(metadata);
        task.note("parsed from inbound email");
        Ok(task)
    }

    /// Assemble the task of last resort: general type, medium priority, the
    /// serialized envelope and failure reason embedded in the description.
    pub fn fallback_task(&self, envelope: &EmailEnvelope, reason: &str) -> Task {
        let serialized =
            serde_json::to_string_pretty(envelope).unwrap_or_else(|_| "<unserializable>".into());
        let mut task = Task::new(
            "Unparsed Email Task",
            format!("Failed to parse email: {reason}\n\nOriginal content:\n{serialized}"),
        );
        task.task_type = TaskType::General;
        task.priority = TaskPriority::Medium;
        task.assignment = AgentAssignment::general("Fallback assignment due to parsing error");
        task.note(format!("parsing error: {reason}"));
        task
    }
}

fn extract_metadata(envelope: &EmailEnvelope) -> EmailMetadata {
    let header = |name: &str| {
        envelope
            .headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.clone())
    };

    let date_header = header("date");
    let timestamp = parse_timestamp(envelope.timestamp.as_deref(), date_header.as_deref())
        .unwrap_or_else(Utc::now);

    let sender = header("from")
        .filter(|s| !s.is_empty())
        .or_else(|| (!envelope.sender.is_empty()).then(|| envelope.sender.clone()))
        .unwrap_or_else(|| "unknown@email.com".to_string());

    let subject = header("subject")
        .filter(|s| !s.is_empty())
        .or_else(|| (!envelope.subject.is_empty()).then(|| envelope.subject.clone()))
        .unwrap_or_else(|| "No Subject".to_string());

    let recipients = if envelope.recipient.is_empty() {
        header("to").map(|to| vec![to]).unwrap_or_default()
    } else {
        vec![envelope.recipient.clone()]
    };

    let cc = header("cc")
        .map(|cc| {
            cc.split(',')
                .map(|addr| addr.trim().to_string())
                .filter(|addr| !addr.is_empty())
                .collect()
        })
        .unwrap_or_default();

    let attachments = envelope
        .attachments
        .iter()
        .map(|raw| AttachmentInfo {
            filename: raw
                .get("filename")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string(),
            content_type: raw
                .get("content-type")
                .and_then(Value::as_str)
                .unwrap_or("application/octet-stream")
                .to_string(),
            size: raw.get("size").and_then(Value::as_u64).unwrap_or(0),
        })
        .collect();

    EmailMetadata {
        message_id: header("message-id")
            .unwrap_or_else(|| format!("email_{}", uuid_suffix())),
        sender,
        recipients,
        subject,
        timestamp,
        cc,
        reply_to: header("reply-to"),
        thread_id: header("in-reply-to"),
        attachments,
        headers: envelope.headers.clone(),
    }
}

fn uuid_suffix() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

fn parse_timestamp(unix: Option<&str>, date_header: Option<&str>) -> Option<DateTime<Utc>> {
    if let Some(raw) = unix {
        if let Ok(secs) = raw.parse::<i64>() {
            if let Some(ts) = Utc.timestamp_opt(secs, 0).single() {
                return Some(ts);
            }
        }
        if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
            return Some(ts.with_timezone(&Utc));
        }
    }
    if let Some(raw) = date_header {
        if let Ok(ts) = DateTime::parse_from_rfc2822(raw) {
            return Some(ts.with_timezone(&Utc));
        }
        if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
            return Some(ts.with_timezone(&Utc));
        }
    }
    None
}

fn extract_requirements(body: &str, now: DateTime<Utc>) -> TaskRequirements {
    let sections = extract_requirement_sections(body);
    let mut requirements = TaskRequirements {
        deadline: extract_deadline(body, now).map(|c| c.deadline),
        dependencies: sections.dependencies,
        success_criteria: sections.success_criteria,
        constraints: sections.constraints,
        deliverables: sections.deliverables,
    };

    // Inline fallbacks for sections without a headed list block.
    for (pattern, slot) in INLINE_SECTION.iter() {
        let target = match slot {
            0 => &mut requirements.deliverables,
            1 => &mut requirements.success_criteria,
            _ => &mut requirements.dependencies,
        };
        if !target.is_empty() {
            continue;
        }
        if let Some(caps) = pattern.captures(body) {
            let items = extract_inline_list(&format!("including: {}", &caps[1]));
            target.extend(items);
        }
    }

    requirements
}

fn extract_context(envelope: &EmailEnvelope, scrubbed: &ScrubbedBody) -> HashMap<String, Value> {
    let mut context = HashMap::new();
    let body = &envelope.body_plain;

    let header = |name: &str| {
        envelope
            .headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.clone())
    };

    if let Some(thread) = header("in-reply-to") {
        context.insert("is_reply".to_string(), json!(true));
        context.insert("thread_id".to_string(), json!(thread));
    }

    let urls: Vec<&str> = URL.find_iter(body).map(|m| m.as_str()).collect();
    if !urls.is_empty() {
        context.insert("referenced_urls".to_string(), json!(urls));
    }

    if scrubbed.code_block_count > 0 {
        context.insert("has_code".to_string(), json!(true));
        context.insert(
            "code_blocks_count".to_string(),
            json!(scrubbed.code_block_count),
        );
    }

    let mut mentions: Vec<String> = EMAIL_ADDR
        .find_iter(body)
        .map(|m| m.as_str().to_string())
        .collect();
    mentions.sort();
    mentions.dedup();
    if !mentions.is_empty() {
        context.insert("mentions".to_string(), json!(mentions));
    }

    let mut refs: Vec<String> = PR_ISSUE
        .captures_iter(body)
        .map(|caps| caps[1].to_string())
        .collect();
    refs.sort();
    refs.dedup();
    if !refs.is_empty() {
        context.insert("referenced_items".to_string(), json!(refs));
    }

    context
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_types::TaskStatus;

    fn parser() -> EmailParser {
        EmailParser::new(Arc::new(CourierConfig::default()))
    }

    fn envelope(subject: &str, body: &str) -> EmailEnvelope {
        EmailEnvelope {
            sender: "user@example.com".to_string(),
            recipient: "agent@courier.dev".to_string(),
            subject: subject.to_string(),
            body_plain: body.to_string(),
            headers: HashMap::from([
                ("from".to_string(), "user@example.com".to_string()),
                ("subject".to_string(), subject.to_string()),
                ("message-id".to_string(), "<msg-1@example.com>".to_string()),
            ]),
            timestamp: None,
            attachments: Vec::new(),
        }
    }

    #[test]
    fn urgent_bug_report_end_to_end() {
        let task = parser().parse(&envelope(
            "URGENT: login broken",
            "Users can't log in. Fix ASAP.",
        ));
        assert_eq!(task.priority, TaskPriority::Urgent);
        assert_eq!(task.task_type, TaskType::BugReport);
        assert_eq!(task.assignment.primary_agent, "bug");
        assert_eq!(task.status, TaskStatus::Pending);

        let deadline = task.requirements.deadline.expect("asap deadline");
        let delta = deadline - task.created_at;
        assert!((delta - chrono::Duration::hours(4)).num_seconds().abs() <= 1);
    }

    #[test]
    fn deliverables_and_iso_deadline() {
        let task = parser().parse(&envelope(
            "Project kickoff",
            "Deliverables:\n- API spec\n- Integration tests\nBy 2031-12-15",
        ));
        assert_eq!(
            task.requirements.deliverables,
            vec!["API spec", "Integration tests"]
        );
        let deadline = task.requirements.deadline.expect("iso deadline");
        assert_eq!(deadline.date_naive().to_string(), "2031-12-15");
    }

    #[test]
    fn parser_is_total_on_empty_input() {
        let task = parser().parse(&EmailEnvelope::default());
        assert!(!task.title.is_empty());
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.task_type, TaskType::General);
        assert_eq!(task.assignment.primary_agent, "general");
        assert!(task
            .processing_notes
            .iter()
            .any(|n| n.note.contains("parsing error")));
    }

    #[test]
    fn every_parsed_task_has_nonempty_title_and_pending_status() {
        let inputs = [
            ("", ""),
            ("x", "y"),
            ("Re: help", "please fix the build\n> quoted"),
            ("A long and specific subject line", "body"),
        ];
        for (subject, body) in inputs {
            let task = parser().parse(&envelope(subject, body));
            assert!(!task.title.is_empty(), "empty title for {subject:?}");
            assert_eq!(task.status, TaskStatus::Pending);
        }
    }

    #[test]
    fn deadline_is_strictly_after_creation() {
        let task = parser().parse(&envelope("deadline", "finish within 2 days"));
        let deadline = task.requirements.deadline.expect("relative deadline");
        assert!(deadline > task.created_at);
    }

    #[test]
    fn code_blocks_are_preserved_and_counted() {
        let body = "Fix this:\n```rust\nfn broken() {}\n```\nstack trace attached";
        let task = parser().parse(&envelope("bug in parser", body));
        assert!(task.description.contains("fn broken()"));
        assert_eq!(task.context["code_blocks_count"], json!(1));
    }

    #[test]
    fn calendar_invite_routes_to_general_assignment() {
        let task = parser().parse(&envelope(
            "Quarterly planning",
            "Can we schedule a meeting next week to plan?",
        ));
        assert_eq!(task.task_type, TaskType::CalendarEvent);
        assert_eq!(task.assignment.primary_agent, "general");
    }

    #[test]
    fn metadata_captures_sender_and_message_id() {
        let task = parser().parse(&envelope("subject line ok", "body text goes here"));
        let meta = task.email_metadata.expect("metadata");
        assert_eq!(meta.sender, "user@example.com");
        assert_eq!(meta.message_id, "<msg-1@example.com>");
        assert_eq!(meta.recipients, vec!["agent@courier.dev"]);
    }

    #[test]
    fn inline_ics_content_takes_the_calendar_path() {
        let body = "BEGIN:VCALENDAR\nBEGIN:VEVENT\nSUMMARY:Design review\nDTSTART:20990501T140000Z\nEND:VEVENT\nEND:VCALENDAR";
        let task = parser().parse(&envelope("Fwd: invite", body));
        assert_eq!(task.task_type, TaskType::CalendarEvent);
        assert_eq!(task.title, "Calendar Event: Design review");
        assert!(task.requirements.deadline.is_some());
        assert!(task.email_metadata.is_some());
    }

    #[test]
    fn supporting_agents_never_contain_the_primary() {
        let cfg = CourierConfig::default();
        for (subject, body) in [
            ("bug: crash on start", "it crashes"),
            ("please review my PR", "code review needed"),
            ("new feature", "implement dark mode"),
        ] {
            let task = EmailParser::new(Arc::new(cfg.clone())).parse(&envelope(subject, body));
            assert!(!task
                .assignment
                .supporting_agents
                .contains(&task.assignment.primary_agent));
        }
    }
}

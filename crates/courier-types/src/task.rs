use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    Medium,
    High,
    Urgent,
}

impl TaskPriority {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskPriority::Urgent => "urgent",
            TaskPriority::High => "high",
            TaskPriority::Medium => "medium",
            TaskPriority::Low => "low",
        }
    }
}

impl std::fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    CodeReview,
    BugReport,
    FeatureRequest,
    Documentation,
    Deployment,
    Investigation,
    CalendarEvent,
    General,
}

impl TaskType {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskType::CodeReview => "code_review",
            TaskType::BugReport => "bug_report",
            TaskType::FeatureRequest => "feature_request",
            TaskType::Documentation => "documentation",
            TaskType::Deployment => "deployment",
            TaskType::Investigation => "investigation",
            TaskType::CalendarEvent => "calendar_event",
            TaskType::General => "general",
        }
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Queued,
    Running,
    Dispatched,
    Completed,
    Failed,
    Abandoned,
}

impl TaskStatus {
    /// Whether a transition from `self` to `next` is legal.
    ///
    /// pending → (queued | running | failed)
    /// queued/running → (dispatched | completed | failed)
    /// failed → abandoned
    ///
    /// No backward transitions; terminal states only move failed → abandoned.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        match (self, next) {
            (Pending, Queued) | (Pending, Running) | (Pending, Failed) => true,
            (Queued, Running) => true,
            (Queued, Dispatched) | (Queued, Completed) | (Queued, Failed) => true,
            (Running, Dispatched) | (Running, Completed) | (Running, Failed) => true,
            (Dispatched, Completed) | (Dispatched, Failed) => true,
            (Failed, Abandoned) => true,
            _ => false,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Abandoned
        )
    }
}

/// Metadata carried over from the source email.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailMetadata {
    pub message_id: String,
    pub sender: String,
    #[serde(default)]
    pub recipients: Vec<String>,
    pub subject: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub cc: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub attachments: Vec<AttachmentInfo>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentInfo {
    pub filename: String,
    pub content_type: String,
    #[serde(default)]
    pub size: u64,
}

/// Requirements extracted from the email body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskRequirements {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<DateTime<Utc>>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub success_criteria: Vec<String>,
    #[serde(default)]
    pub constraints: Vec<String>,
    #[serde(default)]
    pub deliverables: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentAssignment {
    pub primary_agent: String,
    #[serde(default)]
    pub supporting_agents: Vec<String>,
    #[serde(default)]
    pub reason: String,
}

impl AgentAssignment {
    pub fn general(reason: impl Into<String>) -> Self {
        Self {
            primary_agent: "general".to_string(),
            supporting_agents: Vec::new(),
            reason: reason.into(),
        }
    }
}

/// Timestamped entry in the append-only processing log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingNote {
    pub at: DateTime<Utc>,
    pub note: String,
}

impl ProcessingNote {
    pub fn now(note: impl Into<String>) -> Self {
        Self {
            at: Utc::now(),
            note: note.into(),
        }
    }
}

/// The canonical unit of work derived from an email.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    pub created_at: DateTime<Utc>,
    pub title: String,
    pub description: String,
    pub task_type: TaskType,
    pub priority: TaskPriority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_metadata: Option<EmailMetadata>,
    #[serde(default)]
    pub requirements: TaskRequirements,
    pub assignment: AgentAssignment,
    pub status: TaskStatus,
    #[serde(default)]
    pub processed: bool,
    /// 0–100, derived from completed steps. Never decreases.
    #[serde(default)]
    pub progress: u8,
    #[serde(default)]
    pub processing_notes: Vec<ProcessingNote>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub context: HashMap<String, Value>,
}

impl Task {
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            task_id: format!("task_{}", &uuid::Uuid::new_v4().simple().to_string()[..12]),
            created_at: Utc::now(),
            title: title.into(),
            description: description.into(),
            task_type: TaskType::General,
            priority: TaskPriority::Medium,
            email_metadata: None,
            requirements: TaskRequirements::default(),
            assignment: AgentAssignment::general("unassigned"),
            status: TaskStatus::Pending,
            processed: false,
            progress: 0,
            processing_notes: Vec::new(),
            tags: Vec::new(),
            context: HashMap::new(),
        }
    }

    /// Append tags, deduplicating case-insensitively while preserving the
    /// first occurrence.
    pub fn extend_tags<I: IntoIterator<Item = String>>(&mut self, tags: I) {
        for tag in tags {
            let lowered = tag.to_lowercase();
            if !self.tags.iter().any(|t| t.to_lowercase() == lowered) {
                self.tags.push(tag);
            }
        }
    }

    pub fn note(&mut self, note: impl Into<String>) {
        self.processing_notes.push(ProcessingNote::now(note));
    }

    /// Render the prompt handed to the assigned agent.
    pub fn agent_prompt(&self) -> String {
        let mut parts = vec![
            format!("Task: {}", self.title),
            format!("Type: {}", self.task_type),
            format!("Priority: {}", self.priority),
            format!("\nDescription:\n{}", self.description),
        ];
        if let Some(deadline) = self.requirements.deadline {
            parts.push(format!("\nDeadline: {}", deadline.to_rfc3339()));
        }
        if !self.requirements.success_criteria.is_empty() {
            parts.push(format!(
                "\nSuccess Criteria:\n{}",
                bullet_list(&self.requirements.success_criteria)
            ));
        }
        if !self.requirements.deliverables.is_empty() {
            parts.push(format!(
                "\nDeliverables:\n{}",
                bullet_list(&self.requirements.deliverables)
            ));
        }
        if let Some(meta) = &self.email_metadata {
            parts.push(format!("\nRequested by: {}", meta.sender));
        }
        parts.join("\n")
    }
}

fn bullet_list(items: &[String]) -> String {
    items
        .iter()
        .map(|item| format!("- {item}"))
        .collect::<Vec<_>>()
        .join("\n")
}

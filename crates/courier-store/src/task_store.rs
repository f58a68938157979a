use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;

use courier_types::{Task, TaskStatus};

use crate::{StoreError, StoreResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationEntry {
    pub agent_id: String,
    pub role: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    pub at: DateTime<Utc>,
}

/// Single source of truth for task state.
///
/// Implementations must serialize concurrent writers per task: status
/// transitions are validated against the lifecycle, appends are never
/// dropped, and progress only moves forward.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn create_task(&self, task: Task) -> StoreResult<()>;

    async fn get_task(&self, task_id: &str) -> StoreResult<Task>;

    /// Validated status transition. Illegal transitions return
    /// `StoreError::InvalidTransition` and leave the task untouched.
    async fn update_status(&self, task_id: &str, status: TaskStatus) -> StoreResult<Task>;

    /// Monotone progress update; a value below the current progress is
    /// ignored.
    async fn set_progress(&self, task_id: &str, progress: u8) -> StoreResult<()>;

    async fn list_active(&self) -> StoreResult<Vec<Task>>;

    async fn append_note(&self, task_id: &str, note: &str) -> StoreResult<()>;

    async fn append_conversation(
        &self,
        task_id: &str,
        agent_id: &str,
        role: &str,
        content: &str,
        metadata: Option<Value>,
    ) -> StoreResult<()>;

    async fn conversation(&self, task_id: &str) -> StoreResult<Vec<ConversationEntry>>;
}

#[derive(Debug, Clone)]
struct TaskRecord {
    task: Task,
    conversation: Vec<ConversationEntry>,
}

/// In-memory task store. One write lock over the whole map serializes
/// writers, which keeps per-task transitions totally ordered.
#[derive(Default)]
pub struct MemoryTaskStore {
    records: RwLock<HashMap<String, TaskRecord>>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn status_name(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Pending => "pending",
        TaskStatus::Queued => "queued",
        TaskStatus::Running => "running",
        TaskStatus::Dispatched => "dispatched",
        TaskStatus::Completed => "completed",
        TaskStatus::Failed => "failed",
        TaskStatus::Abandoned => "abandoned",
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn create_task(&self, task: Task) -> StoreResult<()> {
        let mut records = self.records.write().await;
        records.insert(
            task.task_id.clone(),
            TaskRecord {
                task,
                conversation: Vec::new(),
            },
        );
        Ok(())
    }

    async fn get_task(&self, task_id: &str) -> StoreResult<Task> {
        let records = self.records.read().await;
        records
            .get(task_id)
            .map(|r| r.task.clone())
            .ok_or_else(|| StoreError::TaskNotFound(task_id.to_string()))
    }

    async fn update_status(&self, task_id: &str, status: TaskStatus) -> StoreResult<Task> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(task_id)
            .ok_or_else(|| StoreError::TaskNotFound(task_id.to_string()))?;

        if !record.task.status.can_transition_to(status) {
            return Err(StoreError::InvalidTransition {
                task_id: task_id.to_string(),
                from: status_name(record.task.status),
                to: status_name(status),
            });
        }

        record.task.status = status;
        if status.is_terminal() {
            record.task.processed = true;
        }
        Ok(record.task.clone())
    }

    async fn set_progress(&self, task_id: &str, progress: u8) -> StoreResult<()> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(task_id)
            .ok_or_else(|| StoreError::TaskNotFound(task_id.to_string()))?;
        record.task.progress = record.task.progress.max(progress.min(100));
        Ok(())
    }

    async fn list_active(&self) -> StoreResult<Vec<Task>> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .filter(|r| {
                matches!(
                    r.task.status,
                    TaskStatus::Pending | TaskStatus::Queued | TaskStatus::Running
                )
            })
            .map(|r| r.task.clone())
            .collect())
    }

    async fn append_note(&self, task_id: &str, note: &str) -> StoreResult<()> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(task_id)
            .ok_or_else(|| StoreError::TaskNotFound(task_id.to_string()))?;
        record.task.note(note);
        Ok(())
    }

    async fn append_conversation(
        &self,
        task_id: &str,
        agent_id: &str,
        role: &str,
        content: &str,
        metadata: Option<Value>,
    ) -> StoreResult<()> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(task_id)
            .ok_or_else(|| StoreError::TaskNotFound(task_id.to_string()))?;
        record.conversation.push(ConversationEntry {
            agent_id: agent_id.to_string(),
            role: role.to_string(),
            content: content.to_string(),
            metadata,
            at: Utc::now(),
        });
        Ok(())
    }

    async fn conversation(&self, task_id: &str) -> StoreResult<Vec<ConversationEntry>> {
        let records = self.records.read().await;
        records
            .get(task_id)
            .map(|r| r.conversation.clone())
            .ok_or_else(|| StoreError::TaskNotFound(task_id.to_string()))
    }
}

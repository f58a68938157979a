mod cache;
mod dlq;
mod task_store;

pub use cache::{AgentResponseCache, Cache, CacheStats, MemoryCache, TaskSnapshotCache};
pub use dlq::{DeadLetterEntry, DeadLetterQueue, DeadLetterStatus, DlqStats};
pub use task_store::{ConversationEntry, MemoryTaskStore, TaskStore};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("task `{0}` not found")]
    TaskNotFound(String),

    #[error("illegal status transition {from} -> {to} for task `{task_id}`")]
    InvalidTransition {
        task_id: String,
        from: &'static str,
        to: &'static str,
    },
}

pub type StoreResult<T> = Result<T, StoreError>;

impl From<StoreError> for courier_types::CourierError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::TaskNotFound(id) => {
                courier_types::CourierError::NotFound(format!("task `{id}`"))
            }
            StoreError::InvalidTransition { .. } => {
                courier_types::CourierError::Validation(err.to_string())
            }
            other => courier_types::CourierError::Internal(other.to_string()),
        }
    }
}

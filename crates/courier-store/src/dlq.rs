//! Dead-letter queue for terminally failed tasks.
//!
//! Backed by its own SQLite database (WAL) so entries survive process
//! restarts and can be retried from the admin path. Retrying increments the
//! attempt counter; entries that reach the configured cap are abandoned
//! automatically.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;

use courier_types::TaskPriority;

use crate::StoreResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadLetterStatus {
    Pending,
    Retrying,
    Abandoned,
}

impl DeadLetterStatus {
    fn as_str(self) -> &'static str {
        match self {
            DeadLetterStatus::Pending => "pending",
            DeadLetterStatus::Retrying => "retrying",
            DeadLetterStatus::Abandoned => "abandoned",
        }
    }

    fn parse(raw: &str) -> Self {
        match raw {
            "retrying" => DeadLetterStatus::Retrying,
            "abandoned" => DeadLetterStatus::Abandoned,
            _ => DeadLetterStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub id: String,
    pub task_id: String,
    pub agent_id: String,
    pub payload: Value,
    pub last_error: String,
    pub attempts: u32,
    pub priority: TaskPriority,
    pub status: DeadLetterStatus,
    pub first_seen: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abandon_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DlqStats {
    pub pending: u64,
    pub retrying: u64,
    pub abandoned: u64,
    pub total: u64,
}

pub struct DeadLetterQueue {
    conn: Arc<Mutex<Connection>>,
    #[allow(dead_code)]
    db_path: PathBuf,
    max_attempts: u32,
}

impl DeadLetterQueue {
    /// Open (or create) the dead-letter database at `db_path`.
    pub async fn new(db_path: impl AsRef<Path>, max_attempts: u32) -> StoreResult<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            let _ = tokio::fs::create_dir_all(parent).await;
        }

        let conn = Connection::open(&db_path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous  = NORMAL;",
        )?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS dead_letters (
                id             TEXT PRIMARY KEY,
                task_id        TEXT NOT NULL,
                agent_id       TEXT NOT NULL,
                payload        TEXT NOT NULL,
                last_error     TEXT NOT NULL,
                attempts       INTEGER NOT NULL DEFAULT 0,
                priority       TEXT NOT NULL,
                status         TEXT NOT NULL DEFAULT 'pending',
                first_seen     TEXT NOT NULL,
                abandon_reason TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_dlq_status ON dead_letters(status);
            CREATE INDEX IF NOT EXISTS idx_dlq_first_seen ON dead_letters(first_seen);",
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path,
            max_attempts,
        })
    }

    pub async fn add(
        &self,
        task_id: &str,
        agent_id: &str,
        payload: Value,
        error: &str,
        attempts: u32,
        priority: TaskPriority,
    ) -> StoreResult<DeadLetterEntry> {
        let entry = DeadLetterEntry {
            id: uuid::Uuid::new_v4().to_string(),
            task_id: task_id.to_string(),
            agent_id: agent_id.to_string(),
            payload,
            last_error: error.to_string(),
            attempts,
            priority,
            status: DeadLetterStatus::Pending,
            first_seen: Utc::now(),
            abandon_reason: None,
        };

        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO dead_letters
             (id, task_id, agent_id, payload, last_error, attempts, priority, status, first_seen)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                entry.id,
                entry.task_id,
                entry.agent_id,
                entry.payload.to_string(),
                entry.last_error,
                entry.attempts,
                entry.priority.as_str(),
                entry.status.as_str(),
                entry.first_seen.to_rfc3339(),
            ],
        )?;
        tracing::warn!(task_id, agent_id, "task moved to dead-letter queue");
        Ok(entry)
    }

    /// Hand back up to `max` pending entries for another attempt, highest
    /// priority first, oldest first within a priority. Entries whose
    /// incremented attempt count reaches the cap are abandoned instead of
    /// returned.
    pub async fn retry_next(&self, max: usize) -> StoreResult<Vec<DeadLetterEntry>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, task_id, agent_id, payload, last_error, attempts, priority, status,
                    first_seen, abandon_reason
             FROM dead_letters
             WHERE status = 'pending'
             ORDER BY CASE priority
                 WHEN 'urgent' THEN 0
                 WHEN 'high' THEN 1
                 WHEN 'medium' THEN 2
                 ELSE 3 END,
                 first_seen ASC
             LIMIT ?1",
        )?;
        let candidates = stmt
            .query_map(params![max as i64], row_to_entry)?
            .collect::<Result<Vec<_>, _>>()?;
        drop(stmt);

        let mut handed_back = Vec::new();
        for mut entry in candidates {
            entry.attempts += 1;
            if entry.attempts >= self.max_attempts {
                conn.execute(
                    "UPDATE dead_letters
                     SET attempts = ?1, status = 'abandoned', abandon_reason = ?2
                     WHERE id = ?3",
                    params![entry.attempts, "max retry attempts exhausted", entry.id],
                )?;
                tracing::warn!(task_id = %entry.task_id, "dead letter auto-abandoned");
            } else {
                conn.execute(
                    "UPDATE dead_letters SET attempts = ?1, status = 'retrying' WHERE id = ?2",
                    params![entry.attempts, entry.id],
                )?;
                entry.status = DeadLetterStatus::Retrying;
                handed_back.push(entry);
            }
        }
        Ok(handed_back)
    }

    /// Return a retried entry to the pending pool after another failure.
    pub async fn requeue(&self, id: &str, error: &str) -> StoreResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE dead_letters SET status = 'pending', last_error = ?1
             WHERE id = ?2 AND status = 'retrying'",
            params![error, id],
        )?;
        Ok(())
    }

    pub async fn resolve(&self, id: &str) -> StoreResult<()> {
        let conn = self.conn.lock().await;
        conn.execute("DELETE FROM dead_letters WHERE id = ?1", params![id])?;
        Ok(())
    }

    pub async fn abandon(&self, id: &str, reason: &str) -> StoreResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE dead_letters SET status = 'abandoned', abandon_reason = ?1 WHERE id = ?2",
            params![reason, id],
        )?;
        Ok(())
    }

    pub async fn get(&self, id: &str) -> StoreResult<Option<DeadLetterEntry>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, task_id, agent_id, payload, last_error, attempts, priority, status,
                    first_seen, abandon_reason
             FROM dead_letters WHERE id = ?1",
        )?;
        let mut rows = stmt.query_map(params![id], row_to_entry)?;
        Ok(rows.next().transpose()?)
    }

    pub async fn stats(&self) -> StoreResult<DlqStats> {
        let conn = self.conn.lock().await;
        let count = |status: &str| -> Result<u64, rusqlite::Error> {
            conn.query_row(
                "SELECT COUNT(*) FROM dead_letters WHERE status = ?1",
                params![status],
                |row| row.get::<_, i64>(0),
            )
            .map(|n| n as u64)
        };
        let pending = count("pending")?;
        let retrying = count("retrying")?;
        let abandoned = count("abandoned")?;
        Ok(DlqStats {
            pending,
            retrying,
            abandoned,
            total: pending + retrying + abandoned,
        })
    }
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> Result<DeadLetterEntry, rusqlite::Error> {
    let payload_raw: String = row.get(3)?;
    let priority_raw: String = row.get(6)?;
    let status_raw: String = row.get(7)?;
    let first_seen_raw: String = row.get(8)?;
    Ok(DeadLetterEntry {
        id: row.get(0)?,
        task_id: row.get(1)?,
        agent_id: row.get(2)?,
        payload: serde_json::from_str(&payload_raw).unwrap_or(Value::Null),
        last_error: row.get(4)?,
        attempts: row.get::<_, i64>(5)? as u32,
        priority: match priority_raw.as_str() {
            "urgent" => TaskPriority::Urgent,
            "high" => TaskPriority::High,
            "low" => TaskPriority::Low,
            _ => TaskPriority::Medium,
        },
        status: DeadLetterStatus::parse(&status_raw),
        first_seen: DateTime::parse_from_rfc3339(&first_seen_raw)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        abandon_reason: row.get(9)?,
    })
}

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use courier_types::Task;

/// Namespaced KV cache with per-entry TTL.
///
/// Contract: a miss is never an error, and implementation failures must
/// degrade to direct computation; callers treat `None` as "compute it".
/// Values are stored in their portable textual (JSON) form.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, namespace: &str, key: &str) -> Option<String>;
    async fn set(&self, namespace: &str, key: &str, value: String, ttl: Duration);
    async fn delete(&self, namespace: &str, key: &str);
    async fn len(&self) -> usize;
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

struct MemoryCacheState {
    entries: HashMap<(String, String), (String, Instant)>,
    hits: u64,
    misses: u64,
    last_sweep: Instant,
}

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// In-process cache backend with lazy expiry plus a periodic sweep.
pub struct MemoryCache {
    state: Mutex<MemoryCacheState>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryCacheState {
                entries: HashMap::new(),
                hits: 0,
                misses: 0,
                last_sweep: Instant::now(),
            }),
        }
    }

    pub async fn stats(&self) -> CacheStats {
        let state = self.state.lock().await;
        let now = Instant::now();
        CacheStats {
            entries: state
                .entries
                .values()
                .filter(|(_, expiry)| *expiry > now)
                .count(),
            hits: state.hits,
            misses: state.misses,
        }
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, namespace: &str, key: &str) -> Option<String> {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        let entry = state
            .entries
            .get(&(namespace.to_string(), key.to_string()))
            .cloned();
        match entry {
            Some((value, expiry)) if expiry > now => {
                state.hits += 1;
                Some(value)
            }
            Some(_) => {
                state
                    .entries
                    .remove(&(namespace.to_string(), key.to_string()));
                state.misses += 1;
                None
            }
            None => {
                state.misses += 1;
                None
            }
        }
    }

    async fn set(&self, namespace: &str, key: &str, value: String, ttl: Duration) {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        if now.duration_since(state.last_sweep) >= SWEEP_INTERVAL {
            state.entries.retain(|_, (_, expiry)| *expiry > now);
            state.last_sweep = now;
        }
        state
            .entries
            .insert((namespace.to_string(), key.to_string()), (value, now + ttl));
    }

    async fn delete(&self, namespace: &str, key: &str) {
        let mut state = self.state.lock().await;
        state
            .entries
            .remove(&(namespace.to_string(), key.to_string()));
    }

    async fn len(&self) -> usize {
        let state = self.state.lock().await;
        let now = Instant::now();
        state
            .entries
            .values()
            .filter(|(_, expiry)| *expiry > now)
            .count()
    }
}

const AGENT_RESPONSES_NS: &str = "agent_responses";
const TASKS_NS: &str = "tasks";

/// Memoizes agent responses keyed by `agent_id:sha256(prompt)`.
#[derive(Clone)]
pub struct AgentResponseCache {
    cache: Arc<dyn Cache>,
    ttl: Duration,
}

impl AgentResponseCache {
    pub fn new(cache: Arc<dyn Cache>, ttl: Duration) -> Self {
        Self { cache, ttl }
    }

    pub fn prompt_hash(prompt: &str) -> String {
        format!("{:064x}", Sha256::digest(prompt.as_bytes()))
    }

    fn key(agent_id: &str, prompt: &str) -> String {
        format!("{}:{}", agent_id, Self::prompt_hash(prompt))
    }

    pub async fn get(&self, agent_id: &str, prompt: &str) -> Option<String> {
        self.cache
            .get(AGENT_RESPONSES_NS, &Self::key(agent_id, prompt))
            .await
    }

    pub async fn put(&self, agent_id: &str, prompt: &str, response: &str) {
        self.cache
            .set(
                AGENT_RESPONSES_NS,
                &Self::key(agent_id, prompt),
                response.to_string(),
                self.ttl,
            )
            .await;
    }
}

/// Short-lived task snapshots, invalidated on every status change.
#[derive(Clone)]
pub struct TaskSnapshotCache {
    cache: Arc<dyn Cache>,
    ttl: Duration,
}

impl TaskSnapshotCache {
    pub fn new(cache: Arc<dyn Cache>, ttl: Duration) -> Self {
        Self { cache, ttl }
    }

    pub async fn get(&self, task_id: &str) -> Option<Task> {
        let raw = self.cache.get(TASKS_NS, task_id).await?;
        match serde_json::from_str(&raw) {
            Ok(task) => Some(task),
            Err(err) => {
                tracing::warn!(error = %err, "dropping undecodable task snapshot");
                self.cache.delete(TASKS_NS, task_id).await;
                None
            }
        }
    }

    pub async fn put(&self, task: &Task) {
        match serde_json::to_string(task) {
            Ok(raw) => self.cache.set(TASKS_NS, &task.task_id, raw, self.ttl).await,
            Err(err) => tracing::warn!(error = %err, "failed to serialize task snapshot"),
        }
    }

    pub async fn invalidate(&self, task_id: &str) {
        self.cache.delete(TASKS_NS, task_id).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_roundtrip() {
        let cache = MemoryCache::new();
        cache
            .set("ns", "k", "v".to_string(), Duration::from_secs(60))
            .await;
        assert_eq!(cache.get("ns", "k").await.as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn miss_is_none_not_error() {
        let cache = MemoryCache::new();
        assert!(cache.get("ns", "absent").await.is_none());
    }

    #[tokio::test]
    async fn namespaces_are_isolated() {
        let cache = MemoryCache::new();
        cache
            .set("a", "k", "1".to_string(), Duration::from_secs(60))
            .await;
        assert!(cache.get("b", "k").await.is_none());
    }

    #[tokio::test]
    async fn entries_expire() {
        let cache = MemoryCache::new();
        cache
            .set("ns", "k", "v".to_string(), Duration::from_millis(10))
            .await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(cache.get("ns", "k").await.is_none());
    }

    #[tokio::test]
    async fn agent_response_cache_short_circuits_repeat_prompts() {
        let backend: Arc<dyn Cache> = Arc::new(MemoryCache::new());
        let cache = AgentResponseCache::new(backend, Duration::from_secs(60));
        assert!(cache.get("coder", "prompt").await.is_none());
        cache.put("coder", "prompt", "answer").await;
        assert_eq!(cache.get("coder", "prompt").await.as_deref(), Some("answer"));
        // A different agent with the same prompt is a different key.
        assert!(cache.get("bug", "prompt").await.is_none());
    }

    #[tokio::test]
    async fn task_snapshot_invalidation_removes_entry() {
        let backend: Arc<dyn Cache> = Arc::new(MemoryCache::new());
        let cache = TaskSnapshotCache::new(backend, Duration::from_secs(60));
        let task = Task::new("T", "D");
        cache.put(&task).await;
        assert!(cache.get(&task.task_id).await.is_some());
        cache.invalidate(&task.task_id).await;
        assert!(cache.get(&task.task_id).await.is_none());
    }

    #[tokio::test]
    async fn stats_count_hits_and_misses() {
        let cache = MemoryCache::new();
        cache
            .set("ns", "k", "v".to_string(), Duration::from_secs(60))
            .await;
        let _ = cache.get("ns", "k").await;
        let _ = cache.get("ns", "missing").await;
        let stats = cache.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
    }
}

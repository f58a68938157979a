use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

/// Storage backing the replay cache. The contract is a single atomic
/// check-and-set: two concurrent calls with the same key must yield exactly
/// one `false`.
#[async_trait]
pub trait ReplayBackend: Send + Sync {
    /// Returns `true` if the key was already present (unexpired). Otherwise
    /// records it with `ttl` and returns `false`, atomically.
    async fn check_and_set(&self, key: &str, ttl: Duration) -> anyhow::Result<bool>;

    /// Unconditionally record the key with `ttl`.
    async fn set(&self, key: &str, ttl: Duration) -> anyhow::Result<()>;

    async fn len(&self) -> usize;

    fn kind(&self) -> &'static str;
}

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

struct MemoryReplayState {
    entries: HashMap<String, Instant>,
    last_sweep: Instant,
}

/// In-memory replay backend with periodic expiry sweeps. All mutation
/// happens under one mutex guard, which is what makes check-and-set atomic.
pub struct MemoryReplayBackend {
    state: Mutex<MemoryReplayState>,
}

impl MemoryReplayBackend {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryReplayState {
                entries: HashMap::new(),
                last_sweep: Instant::now(),
            }),
        }
    }
}

impl Default for MemoryReplayBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn sweep_expired(state: &mut MemoryReplayState, now: Instant) {
    if now.duration_since(state.last_sweep) < SWEEP_INTERVAL {
        return;
    }
    let before = state.entries.len();
    state.entries.retain(|_, expiry| *expiry > now);
    state.last_sweep = now;
    let removed = before - state.entries.len();
    if removed > 0 {
        tracing::debug!(removed, "swept expired replay tokens");
    }
}

#[async_trait]
impl ReplayBackend for MemoryReplayBackend {
    async fn check_and_set(&self, key: &str, ttl: Duration) -> anyhow::Result<bool> {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        sweep_expired(&mut state, now);

        match state.entries.get(key) {
            Some(expiry) if *expiry > now => Ok(true),
            _ => {
                state.entries.insert(key.to_string(), now + ttl);
                Ok(false)
            }
        }
    }

    async fn set(&self, key: &str, ttl: Duration) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        state.entries.insert(key.to_string(), now + ttl);
        Ok(())
    }

    async fn len(&self) -> usize {
        let state = self.state.lock().await;
        let now = Instant::now();
        state.entries.values().filter(|expiry| **expiry > now).count()
    }

    fn kind(&self) -> &'static str {
        "in-memory"
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplayStats {
    pub backend: &'static str,
    pub active_tokens: usize,
    pub ttl_secs: u64,
}

/// Bounded-TTL set of recently seen webhook tokens.
///
/// Token values are never stored in plaintext; the cache key is the SHA-256
/// of the token, optionally folded with a context hash. A backend failure
/// fails open with a warning; the signature verifier remains the primary
/// defense.
pub struct ReplayCache {
    backend: Arc<dyn ReplayBackend>,
    ttl: Duration,
    revoke_multiplier: u32,
}

impl ReplayCache {
    pub fn new(backend: Arc<dyn ReplayBackend>, ttl: Duration, revoke_multiplier: u32) -> Self {
        Self {
            backend,
            ttl,
            revoke_multiplier,
        }
    }

    fn cache_key(token: &str, context: Option<&Value>) -> String {
        let mut key = format!("{:064x}", Sha256::digest(token.as_bytes()));
        if let Some(ctx) = context {
            let ctx_hash = format!(
                "{:064x}",
                Sha256::digest(ctx.to_string().as_bytes())
            );
            key.push(':');
            key.push_str(&ctx_hash[..8]);
        }
        key
    }

    /// Returns `true` iff the token was already recorded within the TTL
    /// window. A fresh token is recorded as a side effect.
    pub async fn seen(&self, token: &str, context: Option<&Value>) -> bool {
        if token.is_empty() {
            tracing::warn!("empty token offered to replay cache");
            return true;
        }

        let key = Self::cache_key(token, context);
        match self.backend.check_and_set(&key, self.ttl).await {
            Ok(seen) => {
                if seen {
                    tracing::warn!("replay detected for webhook token");
                }
                seen
            }
            Err(err) => {
                tracing::warn!(error = %err, "replay backend unavailable, failing open");
                false
            }
        }
    }

    /// Force-record a token with an extended TTL.
    pub async fn revoke(&self, token: &str, context: Option<&Value>) {
        let key = Self::cache_key(token, context);
        let ttl = self.ttl * self.revoke_multiplier;
        if let Err(err) = self.backend.set(&key, ttl).await {
            tracing::warn!(error = %err, "failed to revoke token");
        }
    }

    pub async fn stats(&self) -> ReplayStats {
        ReplayStats {
            backend: self.backend.kind(),
            active_tokens: self.backend.len().await,
            ttl_secs: self.ttl.as_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cache_with_ttl(ttl: Duration) -> ReplayCache {
        ReplayCache::new(Arc::new(MemoryReplayBackend::new()), ttl, 24)
    }

    #[tokio::test]
    async fn first_sighting_is_fresh_second_is_replay() {
        let cache = cache_with_ttl(Duration::from_secs(60));
        assert!(!cache.seen("token-a", None).await);
        assert!(cache.seen("token-a", None).await);
    }

    #[tokio::test]
    async fn distinct_tokens_do_not_collide() {
        let cache = cache_with_ttl(Duration::from_secs(60));
        assert!(!cache.seen("token-a", None).await);
        assert!(!cache.seen("token-b", None).await);
    }

    #[tokio::test]
    async fn context_scopes_the_key() {
        let cache = cache_with_ttl(Duration::from_secs(60));
        let ctx_a = json!({"source_ip": "10.0.0.1"});
        let ctx_b = json!({"source_ip": "10.0.0.2"});
        assert!(!cache.seen("token-a", Some(&ctx_a)).await);
        assert!(!cache.seen("token-a", Some(&ctx_b)).await);
        assert!(cache.seen("token-a", Some(&ctx_a)).await);
    }

    #[tokio::test]
    async fn empty_token_counts_as_replay() {
        let cache = cache_with_ttl(Duration::from_secs(60));
        assert!(cache.seen("", None).await);
    }

    #[tokio::test]
    async fn expired_tokens_are_fresh_again() {
        let cache = cache_with_ttl(Duration::from_millis(20));
        assert!(!cache.seen("token-a", None).await);
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(!cache.seen("token-a", None).await);
    }

    #[tokio::test]
    async fn concurrent_checks_yield_exactly_one_false() {
        let cache = Arc::new(cache_with_ttl(Duration::from_secs(60)));
        let mut handles = Vec::new();
        for _ in 0..16 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move { cache.seen("raced", None).await }));
        }
        let mut fresh = 0;
        for handle in handles {
            if !handle.await.unwrap() {
                fresh += 1;
            }
        }
        assert_eq!(fresh, 1);
    }

    #[tokio::test]
    async fn stats_report_active_tokens() {
        let cache = cache_with_ttl(Duration::from_secs(60));
        cache.seen("one", None).await;
        cache.seen("two", None).await;
        let stats = cache.stats().await;
        assert_eq!(stats.backend, "in-memory");
        assert_eq!(stats.active_tokens, 2);
    }

    #[tokio::test]
    async fn revoked_token_is_seen() {
        let cache = cache_with_ttl(Duration::from_secs(60));
        cache.revoke("revoked", None).await;
        assert!(cache.seen("revoked", None).await);
    }
}

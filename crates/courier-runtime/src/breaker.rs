use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::RwLock;

use courier_types::{BreakerConfig, CourierError, CourierResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure_at: Option<Instant>,
    probe_in_flight: bool,
    calls: u64,
    successes: u64,
    failures: u64,
    rejections: u64,
}

impl Default for BreakerInner {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            last_failure_at: None,
            probe_in_flight: false,
            calls: 0,
            successes: 0,
            failures: 0,
            rejections: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BreakerStatus {
    pub agent: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub calls: u64,
    pub successes: u64,
    pub failures: u64,
    pub rejections: u64,
}

/// Per-agent failure isolation.
///
/// Closed trips to open after `failure_threshold` consecutive failures.
/// Open rejects every call with `CircuitOpen` until the recovery timeout has
/// elapsed since the last failure, then admits exactly one half-open probe;
/// the probe's outcome decides between closed and open.
pub struct CircuitBreaker {
    agent: String,
    failure_threshold: u32,
    recovery_timeout: Duration,
    inner: RwLock<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(agent: impl Into<String>, config: &BreakerConfig) -> Self {
        Self {
            agent: agent.into(),
            failure_threshold: config.failure_threshold,
            recovery_timeout: Duration::from_secs(config.recovery_timeout_secs),
            inner: RwLock::new(BreakerInner::default()),
        }
    }

    /// Gate a call: returns `CircuitOpen` without invoking anything when the
    /// circuit rejects it.
    async fn try_acquire(&self) -> CourierResult<()> {
        let mut inner = self.inner.write().await;
        match inner.state {
            CircuitState::Closed => {
                inner.calls += 1;
                Ok(())
            }
            CircuitState::Open => {
                let recovered = inner
                    .last_failure_at
                    .map(|at| at.elapsed() >= self.recovery_timeout)
                    .unwrap_or(true);
                if recovered {
                    tracing::info!(agent = %self.agent, "circuit half-open, admitting probe");
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_in_flight = true;
                    inner.calls += 1;
                    Ok(())
                } else {
                    inner.rejections += 1;
                    Err(CourierError::CircuitOpen(self.agent.clone()))
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    inner.rejections += 1;
                    Err(CourierError::CircuitOpen(self.agent.clone()))
                } else {
                    inner.probe_in_flight = true;
                    inner.calls += 1;
                    Ok(())
                }
            }
        }
    }

    async fn record_success(&self) {
        let mut inner = self.inner.write().await;
        inner.successes += 1;
        inner.probe_in_flight = false;
        match inner.state {
            CircuitState::HalfOpen => {
                tracing::info!(agent = %self.agent, "circuit closed after successful probe");
                inner.state = CircuitState::Closed;
                inner.consecutive_failures = 0;
                inner.last_failure_at = None;
            }
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
            }
            CircuitState::Open => {}
        }
    }

    async fn record_failure(&self) {
        let mut inner = self.inner.write().await;
        inner.failures += 1;
        inner.consecutive_failures += 1;
        inner.last_failure_at = Some(Instant::now());
        inner.probe_in_flight = false;
        match inner.state {
            CircuitState::HalfOpen => {
                tracing::warn!(agent = %self.agent, "probe failed, circuit reopened");
                inner.state = CircuitState::Open;
            }
            CircuitState::Closed => {
                if inner.consecutive_failures >= self.failure_threshold {
                    tracing::warn!(
                        agent = %self.agent,
                        failures = inner.consecutive_failures,
                        "failure threshold reached, circuit opened"
                    );
                    inner.state = CircuitState::Open;
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Run `op` through the breaker. The callee is never invoked when the
    /// circuit rejects the call.
    pub async fn call<T, F, Fut>(&self, op: F) -> CourierResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CourierResult<T>>,
    {
        self.try_acquire().await?;
        match op().await {
            Ok(value) => {
                self.record_success().await;
                Ok(value)
            }
            Err(err) => {
                self.record_failure().await;
                Err(err)
            }
        }
    }

    pub async fn state(&self) -> CircuitState {
        self.inner.read().await.state
    }

    pub async fn status(&self) -> BreakerStatus {
        let inner = self.inner.read().await;
        BreakerStatus {
            agent: self.agent.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            calls: inner.calls,
            successes: inner.successes,
            failures: inner.failures,
            rejections: inner.rejections,
        }
    }

    pub async fn reset(&self) {
        let mut inner = self.inner.write().await;
        *inner = BreakerInner::default();
        tracing::info!(agent = %self.agent, "circuit breaker reset");
    }
}

/// Shared registry of per-agent breakers.
#[derive(Clone)]
pub struct BreakerBoard {
    config: BreakerConfig,
    breakers: Arc<RwLock<HashMap<String, Arc<CircuitBreaker>>>>,
}

impl BreakerBoard {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            breakers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn get_or_create(&self, agent: &str) -> Arc<CircuitBreaker> {
        {
            let breakers = self.breakers.read().await;
            if let Some(breaker) = breakers.get(agent) {
                return breaker.clone();
            }
        }
        let mut breakers = self.breakers.write().await;
        breakers
            .entry(agent.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(agent, &self.config)))
            .clone()
    }

    pub async fn status_all(&self) -> Vec<BreakerStatus> {
        let breakers = self.breakers.read().await;
        let mut statuses = Vec::with_capacity(breakers.len());
        for breaker in breakers.values() {
            statuses.push(breaker.status().await);
        }
        statuses.sort_by(|a, b| a.agent.cmp(&b.agent));
        statuses
    }

    pub async fn reset_all(&self) {
        let breakers = self.breakers.read().await;
        for breaker in breakers.values() {
            breaker.reset().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_breaker(recovery_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new(
            "agent-a",
            &BreakerConfig {
                failure_threshold: 3,
                recovery_timeout_secs: 0,
            },
        )
        .with_recovery(Duration::from_millis(recovery_ms))
    }

    impl CircuitBreaker {
        fn with_recovery(mut self, recovery: Duration) -> Self {
            self.recovery_timeout = recovery;
            self
        }
    }

    async fn fail(breaker: &CircuitBreaker) {
        let _ = breaker
            .call::<(), _, _>(|| async { Err(CourierError::TransientRemote("boom".into())) })
            .await;
    }

    #[tokio::test]
    async fn opens_after_threshold_consecutive_failures() {
        let breaker = test_breaker(10_000);
        for _ in 0..3 {
            fail(&breaker).await;
        }
        assert_eq!(breaker.state().await, CircuitState::Open);

        // The fourth call is rejected without invoking the callee.
        let mut invoked = false;
        let result = breaker
            .call(|| {
                invoked = true;
                async { Ok(()) }
            })
            .await;
        assert!(matches!(result, Err(CourierError::CircuitOpen(_))));
        assert!(!invoked);
    }

    #[tokio::test]
    async fn success_resets_the_failure_count() {
        let breaker = test_breaker(10_000);
        fail(&breaker).await;
        fail(&breaker).await;
        breaker.call(|| async { Ok(()) }).await.unwrap();
        fail(&breaker).await;
        fail(&breaker).await;
        assert_eq!(breaker.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn recovers_through_a_successful_probe() {
        let breaker = test_breaker(20);
        for _ in 0..3 {
            fail(&breaker).await;
        }
        assert_eq!(breaker.state().await, CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(40)).await;
        breaker.call(|| async { Ok(()) }).await.unwrap();
        assert_eq!(breaker.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn failed_probe_reopens_the_circuit() {
        let breaker = test_breaker(20);
        for _ in 0..3 {
            fail(&breaker).await;
        }
        tokio::time::sleep(Duration::from_millis(40)).await;
        fail(&breaker).await;
        assert_eq!(breaker.state().await, CircuitState::Open);

        // Reopening refreshed last_failure_at, so the next call is rejected.
        let result = breaker.call(|| async { Ok(()) }).await;
        assert!(matches!(result, Err(CourierError::CircuitOpen(_))));
    }

    #[tokio::test]
    async fn status_tracks_counters() {
        let breaker = test_breaker(10_000);
        breaker.call(|| async { Ok(()) }).await.unwrap();
        fail(&breaker).await;
        let status = breaker.status().await;
        assert_eq!(status.calls, 2);
        assert_eq!(status.successes, 1);
        assert_eq!(status.failures, 1);
    }

    #[tokio::test]
    async fn board_shares_breakers_per_agent() {
        let board = BreakerBoard::new(BreakerConfig::default());
        let first = board.get_or_create("coder").await;
        let second = board.get_or_create("coder").await;
        assert!(Arc::ptr_eq(&first, &second));

        let other = board.get_or_create("bug").await;
        assert!(!Arc::ptr_eq(&first, &other));
        assert_eq!(board.status_all().await.len(), 2);
    }

    #[tokio::test]
    async fn board_reset_closes_everything() {
        let board = BreakerBoard::new(BreakerConfig {
            failure_threshold: 1,
            recovery_timeout_secs: 600,
        });
        let breaker = board.get_or_create("coder").await;
        fail(&breaker).await;
        assert_eq!(breaker.state().await, CircuitState::Open);
        board.reset_all().await;
        assert_eq!(breaker.state().await, CircuitState::Closed);
    }
}

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use courier_types::{CourierResult, RetryPolicyConfig};

/// Exponential backoff with full jitter.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub exp_base: f64,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryPolicyConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            exp_base: config.exp_base,
        }
    }

    /// Deterministic backoff for attempt `n` (1-based):
    /// `min(base * exp_base^(n-1), max_delay)`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = self.exp_base.powi(attempt.saturating_sub(1) as i32);
        let delay = self.base_delay.as_secs_f64() * factor;
        Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
    }

    /// Full jitter: `random(0, delay)`, floored at `0.1 * base` so a burst
    /// of retries never lands at the same instant but also never becomes a
    /// busy-loop.
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let ceiling = self.backoff_delay(attempt).as_secs_f64();
        let jittered = rand::thread_rng().gen_range(0.0..=ceiling.max(f64::EPSILON));
        let floor = self.base_delay.as_secs_f64() * 0.1;
        Duration::from_secs_f64(jittered.max(floor))
    }

    /// Upper bound on total sleep time across all attempts. Jitter only
    /// shortens the actual wait.
    pub fn worst_case_envelope(&self) -> Duration {
        (1..self.max_attempts)
            .map(|attempt| self.backoff_delay(attempt))
            .sum()
    }
}

/// Retry `op` under the policy. Only errors whose kind is retryable
/// (transient network/timeout/5xx) are retried; everything else propagates
/// on the first occurrence.
pub async fn retry<T, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> CourierResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = CourierResult<T>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < policy.max_attempts => {
                let delay = policy.jittered_delay(attempt);
                tracing::warn!(
                    label,
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retrying after transient failure"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => {
                if attempt > 1 {
                    tracing::error!(label, attempt, error = %err, "giving up after retries");
                }
                return Err(err);
            }
        }
    }
}

//! Resilient multi-agent execution.
//!
//! The executor drives workflow executions against the agent registry,
//! protected by per-agent circuit breakers, jittered retries, and fallback
//! chains. Terminal failures land in the dead-letter queue; successes are
//! cached, recorded to the task store, and delivered through the mail
//! collaborator.

mod breaker;
mod executor;
mod retry;

pub use breaker::{BreakerBoard, BreakerStatus, CircuitBreaker, CircuitState};
pub use executor::{ExecutionMode, ExecutionOutcome, MultiAgentExecutor, StepOutput};
pub use retry::{retry, RetryPolicy};

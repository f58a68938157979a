use thiserror::Error;

/// Cross-cutting error taxonomy for the Courier pipeline.
///
/// Every variant maps to a stable machine code from a closed catalog; HTTP
/// handlers render these as `{status: "error", code, message}` envelopes and
/// never leak internal detail beyond the message carried here.
#[derive(Error, Debug)]
pub enum CourierError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Network failures, timeouts, and 5xx responses from downstream
    /// services. Retried with backoff; escalates the circuit breaker.
    #[error("transient remote error: {0}")]
    TransientRemote(String),

    #[error("circuit open for `{0}`")]
    CircuitOpen(String),

    /// Non-auth 4xx from downstream. Not retried.
    #[error("permanent remote error: {0}")]
    PermanentRemote(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl CourierError {
    pub fn code(&self) -> &'static str {
        match self {
            CourierError::Validation(_) => "INVALID_PARAMETER",
            CourierError::Authentication(_) => "UNAUTHORIZED",
            CourierError::NotFound(_) => "NOT_FOUND",
            CourierError::TransientRemote(_) => "SERVICE_UNAVAILABLE",
            CourierError::CircuitOpen(_) => "CIRCUIT_OPEN",
            CourierError::PermanentRemote(_) => "INVALID_PARAMETER",
            CourierError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether a retry with backoff can plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CourierError::TransientRemote(_))
    }
}

pub type CourierResult<T> = Result<T, CourierError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_errors_are_retryable() {
        assert!(CourierError::TransientRemote("timeout".into()).is_retryable());
        assert!(!CourierError::Validation("bad".into()).is_retryable());
        assert!(!CourierError::CircuitOpen("coder".into()).is_retryable());
        assert!(!CourierError::PermanentRemote("400".into()).is_retryable());
    }

    #[test]
    fn codes_come_from_the_closed_catalog() {
        let catalog = [
            "MISSING_PARAMETER",
            "INVALID_PARAMETER",
            "UNAUTHORIZED",
            "NOT_FOUND",
            "RATE_LIMITED",
            "AGENT_TIMEOUT",
            "CIRCUIT_OPEN",
            "SERVICE_UNAVAILABLE",
            "DUPLICATE_ENTRY",
            "INTERNAL_ERROR",
        ];
        for err in [
            CourierError::Validation("x".into()),
            CourierError::Authentication("x".into()),
            CourierError::NotFound("x".into()),
            CourierError::TransientRemote("x".into()),
            CourierError::CircuitOpen("x".into()),
            CourierError::PermanentRemote("x".into()),
            CourierError::Internal("x".into()),
        ] {
            assert!(catalog.contains(&err.code()), "unknown code {}", err.code());
        }
    }
}

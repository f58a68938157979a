//! Webhook authentication and replay protection.
//!
//! Two defenses run in order on every inbound webhook: the signature
//! verifier authenticates the payload (HMAC-SHA256 over timestamp then token
//! with a shared signing key), then the replay cache rejects tokens already
//! seen inside the TTL window. The verifier fails closed; the replay cache
//! fails open so a degraded backend never blocks ingestion.

mod replay;
mod verifier;

pub use replay::{MemoryReplayBackend, ReplayBackend, ReplayCache, ReplayStats};
pub use verifier::SignatureVerifier;

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SecurityError {
    #[error("webhook timestamp outside the accepted window")]
    StaleTimestamp,

    #[error("webhook signature mismatch")]
    BadSignature,

    #[error("webhook signing key is not configured")]
    ConfigMissing,
}

pub type SecurityResult<T> = Result<T, SecurityError>;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use courier_types::WebhookSignature;

use crate::{SecurityError, SecurityResult};

type HmacSha256 = Hmac<Sha256>;

/// Authenticates inbound webhooks.
///
/// The signed message is the timestamp concatenated with the token; the
/// provided signature is a
/// lowercase hex digest. Comparison happens inside `Mac::verify_slice`,
/// which is constant-time. Any malformed input fails closed as
/// `BadSignature`.
#[derive(Clone)]
pub struct SignatureVerifier {
    signing_key: Vec<u8>,
    max_age_secs: u64,
}

impl SignatureVerifier {
    pub fn new(signing_key: impl Into<Vec<u8>>, max_age_secs: u64) -> Self {
        Self {
            signing_key: signing_key.into(),
            max_age_secs,
        }
    }

    pub fn verify(&self, signature: &WebhookSignature, now: DateTime<Utc>) -> SecurityResult<()> {
        if self.signing_key.is_empty() {
            return Err(SecurityError::ConfigMissing);
        }

        let timestamp: i64 = signature
            .timestamp
            .parse()
            .map_err(|_| SecurityError::BadSignature)?;
        let age = (now.timestamp() - timestamp).unsigned_abs();
        if age > self.max_age_secs {
            tracing::warn!(age_secs = age, "rejecting stale webhook timestamp");
            return Err(SecurityError::StaleTimestamp);
        }

        let provided = hex::decode(&signature.signature).map_err(|_| SecurityError::BadSignature)?;

        let mut mac = HmacSha256::new_from_slice(&self.signing_key)
            .map_err(|_| SecurityError::ConfigMissing)?;
        mac.update(signature.timestamp.as_bytes());
        mac.update(signature.token.as_bytes());
        mac.verify_slice(&provided).map_err(|_| {
            tracing::warn!("webhook signature verification failed");
            SecurityError::BadSignature
        })
    }

    /// Produce the hex signature for timestamp-then-token. Used for outbound
    /// signing and test fixtures.
    pub fn sign(&self, token: &str, timestamp: &str) -> SecurityResult<String> {
        if self.signing_key.is_empty() {
            return Err(SecurityError::ConfigMissing);
        }
        let mut mac = HmacSha256::new_from_slice(&self.signing_key)
            .map_err(|_| SecurityError::ConfigMissing)?;
        mac.update(timestamp.as_bytes());
        mac.update(token.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verifier() -> SignatureVerifier {
        SignatureVerifier::new(b"test-signing-key".to_vec(), 120)
    }

    fn signed(token: &str, now: DateTime<Utc>) -> WebhookSignature {
        let timestamp = now.timestamp().to_string();
        let signature = verifier().sign(token, &timestamp).unwrap();
        WebhookSignature {
            timestamp,
            token: token.to_string(),
            signature,
        }
    }

    #[test]
    fn accepts_a_correctly_signed_payload() {
        let now = Utc::now();
        let sig = signed("token-1", now);
        assert!(verifier().verify(&sig, now).is_ok());
    }

    #[test]
    fn rejects_any_signature_mutation() {
        let now = Utc::now();
        let mut sig = signed("token-1", now);
        // Flip one nibble of the hex digest.
        let mut bytes = sig.signature.into_bytes();
        bytes[0] = if bytes[0] == b'0' { b'1' } else { b'0' };
        sig.signature = String::from_utf8(bytes).unwrap();
        assert_eq!(verifier().verify(&sig, now), Err(SecurityError::BadSignature));
    }

    #[test]
    fn rejects_stale_timestamps() {
        let now = Utc::now();
        let sig = signed("token-1", now - chrono::Duration::seconds(500));
        assert_eq!(verifier().verify(&sig, now), Err(SecurityError::StaleTimestamp));
    }

    #[test]
    fn rejects_future_timestamps_outside_window() {
        let now = Utc::now();
        let sig = signed("token-1", now + chrono::Duration::seconds(500));
        assert_eq!(verifier().verify(&sig, now), Err(SecurityError::StaleTimestamp));
    }

    #[test]
    fn fails_closed_on_garbage_input() {
        let now = Utc::now();
        let sig = WebhookSignature {
            timestamp: "not-a-number".to_string(),
            token: "token".to_string(),
            signature: "zzzz".to_string(),
        };
        assert_eq!(verifier().verify(&sig, now), Err(SecurityError::BadSignature));
    }

    #[test]
    fn missing_key_is_a_config_error() {
        let bare = SignatureVerifier::new(Vec::new(), 120);
        let now = Utc::now();
        let sig = signed("token-1", now);
        assert_eq!(bare.verify(&sig, now), Err(SecurityError::ConfigMissing));
    }
}

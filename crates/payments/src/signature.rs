//! Webhook signature verification.
//!
//! Header format: `t=<unix seconds>,v1=<hex hmac-sha256(secret, "<t>.<body>")>`.
//! More than one `v1` entry may be present while the provider rotates secrets.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "stripe-signature";
pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SignatureError {
    #[error("missing signature header")]
    MissingHeader,

    #[error("malformed signature header")]
    Malformed,

    #[error("signature timestamp outside tolerance")]
    Expired,

    #[error("no signature matches the payload")]
    Mismatch,
}

#[derive(Clone)]
pub struct WebhookVerifier {
    secret: Vec<u8>,
    tolerance_secs: i64,
}

impl core::fmt::Debug for WebhookVerifier {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("WebhookVerifier")
            .field("tolerance_secs", &self.tolerance_secs)
            .finish_non_exhaustive()
    }
}

impl WebhookVerifier {
    pub fn new(secret: impl Into<Vec<u8>>, tolerance_secs: i64) -> Self {
        Self {
            secret: secret.into(),
            tolerance_secs,
        }
    }

    fn mac(&self) -> HmacSha256 {
        HmacSha256::new_from_slice(&self.secret).expect("HMAC can take key of any size")
    }

    /// Verify `header` against the raw `payload` at time `now`.
    pub fn verify(
        &self,
        payload: &[u8],
        header: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), SignatureError> {
        let header = header
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .ok_or(SignatureError::MissingHeader)?;

        let mut timestamp: Option<i64> = None;
        let mut signatures: Vec<Vec<u8>> = Vec::new();
        for part in header.split(',') {
            let Some((key, value)) = part.trim().split_once('=') else {
                return Err(SignatureError::Malformed);
            };
            match key {
                "t" => {
                    timestamp = Some(value.parse().map_err(|_| SignatureError::Malformed)?);
                }
                "v1" => {
                    // Undecodable entries cannot match; skip them like any other mismatch.
                    if let Ok(bytes) = hex::decode(value) {
                        signatures.push(bytes);
                    }
                }
                _ => {}
            }
        }

        let timestamp = timestamp.ok_or(SignatureError::Malformed)?;
        if signatures.is_empty() {
            return Err(SignatureError::Mismatch);
        }
        if now.timestamp().abs_diff(timestamp) > self.tolerance_secs.unsigned_abs() {
            return Err(SignatureError::Expired);
        }

        let mut mac = self.mac();
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);

        let matched = signatures
            .iter()
            .any(|sig| mac.clone().verify_slice(sig).is_ok());
        if matched {
            Ok(())
        } else {
            Err(SignatureError::Mismatch)
        }
    }

    /// Produce a header for `payload` signed at `timestamp`.
    pub fn sign(&self, payload: &[u8], timestamp: i64) -> String {
        let mut mac = self.mac();
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        let sig = hex::encode(mac.finalize().into_bytes());
        format!("t={timestamp},v1={sig}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAYLOAD: &[u8] = br#"{"id":"evt_1","type":"checkout.session.completed"}"#;

    fn verifier() -> WebhookVerifier {
        WebhookVerifier::new("whsec_test", DEFAULT_TOLERANCE_SECS)
    }

    #[test]
    fn accepts_valid_signature() {
        let v = verifier();
        let now = Utc::now();
        let header = v.sign(PAYLOAD, now.timestamp());
        assert_eq!(v.verify(PAYLOAD, Some(&header), now), Ok(()));
    }

    #[test]
    fn rejects_tampered_payload() {
        let v = verifier();
        let now = Utc::now();
        let header = v.sign(PAYLOAD, now.timestamp());
        assert_eq!(
            v.verify(b"{\"id\":\"evt_2\"}", Some(&header), now),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn rejects_wrong_secret() {
        let now = Utc::now();
        let header = WebhookVerifier::new("other", 300).sign(PAYLOAD, now.timestamp());
        assert_eq!(
            verifier().verify(PAYLOAD, Some(&header), now),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn rejects_stale_timestamp() {
        let v = verifier();
        let now = Utc::now();
        let header = v.sign(PAYLOAD, now.timestamp() - 301);
        assert_eq!(v.verify(PAYLOAD, Some(&header), now), Err(SignatureError::Expired));
    }

    #[test]
    fn extreme_timestamps_are_expired_not_a_panic() {
        let v = verifier();
        let now = Utc::now();
        for t in [i64::MIN, i64::MAX, i64::MIN + 1] {
            let header = format!("t={t},v1=00");
            assert_eq!(v.verify(b"{}", Some(&header), now), Err(SignatureError::Expired));
        }
    }

    #[test]
    fn accepts_any_matching_v1() {
        let v = verifier();
        let now = Utc::now();
        let good = v.sign(PAYLOAD, now.timestamp());
        let sig = good.split_once(",v1=").map(|(_, s)| s).unwrap();
        let header = format!("t={},v1=deadbeef,v1={sig}", now.timestamp());
        assert_eq!(v.verify(PAYLOAD, Some(&header), now), Ok(()));
    }

    #[test]
    fn rejects_missing_or_garbage_header() {
        let v = verifier();
        let now = Utc::now();
        assert_eq!(v.verify(PAYLOAD, None, now), Err(SignatureError::MissingHeader));
        assert_eq!(v.verify(PAYLOAD, Some(""), now), Err(SignatureError::MissingHeader));
        assert_eq!(v.verify(PAYLOAD, Some("garbage"), now), Err(SignatureError::Malformed));
        assert_eq!(v.verify(PAYLOAD, Some("v1=abcd"), now), Err(SignatureError::Malformed));
        assert_eq!(v.verify(PAYLOAD, Some("t=1234567890"), now), Err(SignatureError::Mismatch));
    }
}

//! Payment-provider objects and webhook events.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use dormswap_core::UserId;

use crate::metadata::MetadataMap;

#[derive(Debug, Error)]
pub enum EventParseError {
    #[error("malformed event payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("event '{0}' has no data.object")]
    MissingObject(String),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Open,
    Complete,
    Expired,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Paid,
    Unpaid,
    NoPaymentRequired,
}

/// A hosted checkout session as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub status: SessionStatus,
    pub payment_status: PaymentStatus,
    #[serde(default)]
    pub metadata: MetadataMap,
    #[serde(default)]
    pub customer: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

impl CheckoutSession {
    /// Whether the session's payment authorizes the transition its metadata names.
    pub fn is_settled(&self) -> bool {
        self.status == SessionStatus::Complete
            && matches!(
                self.payment_status,
                PaymentStatus::Paid | PaymentStatus::NoPaymentRequired
            )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetupIntent {
    pub id: String,
    #[serde(default)]
    pub payment_method: Option<String>,
    #[serde(default)]
    pub customer: Option<String>,
    #[serde(default)]
    pub metadata: MetadataMap,
}

impl SetupIntent {
    pub fn user_id(&self) -> Option<UserId> {
        self.metadata.get("user_id").and_then(|v| v.parse().ok())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderEventKind {
    CheckoutSessionCompleted(CheckoutSession),
    SetupIntentSucceeded(SetupIntent),
    /// Any event type this system does not act on.
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderEvent {
    pub id: String,
    pub kind: ProviderEventKind,
}

#[derive(Deserialize)]
struct RawEvent {
    #[serde(default)]
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    data: Option<RawData>,
}

#[derive(Deserialize)]
struct RawData {
    object: serde_json::Value,
}

impl ProviderEvent {
    /// Parse a verified webhook body.
    pub fn parse(payload: &[u8]) -> Result<Self, EventParseError> {
        let RawEvent {
            id,
            event_type,
            data,
        } = serde_json::from_slice(payload)?;
        let object = || {
            data.map(|d| d.object)
                .ok_or_else(|| EventParseError::MissingObject(event_type.clone()))
        };

        let kind = match event_type.as_str() {
            "checkout.session.completed" => {
                ProviderEventKind::CheckoutSessionCompleted(serde_json::from_value(object()?)?)
            }
            "setup_intent.succeeded" => {
                ProviderEventKind::SetupIntentSucceeded(serde_json::from_value(object()?)?)
            }
            _ => ProviderEventKind::Other(event_type.clone()),
        };
        Ok(Self { id, kind })
    }

    pub fn event_type(&self) -> &str {
        match &self.kind {
            ProviderEventKind::CheckoutSessionCompleted(_) => "checkout.session.completed",
            ProviderEventKind::SetupIntentSucceeded(_) => "setup_intent.succeeded",
            ProviderEventKind::Other(t) => t,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_completed_session() {
        let body = json!({
            "id": "evt_1",
            "type": "checkout.session.completed",
            "data": { "object": {
                "id": "cs_test_1",
                "status": "complete",
                "payment_status": "paid",
                "metadata": { "type": "item_purchase", "item_id": "5" }
            }}
        });
        let event = ProviderEvent::parse(body.to_string().as_bytes()).unwrap();
        let ProviderEventKind::CheckoutSessionCompleted(session) = event.kind else {
            panic!("wrong kind");
        };
        assert!(session.is_settled());
        assert_eq!(session.metadata.get("item_id").map(String::as_str), Some("5"));
    }

    #[test]
    fn unpaid_session_is_not_settled() {
        let session = CheckoutSession {
            id: "cs_1".into(),
            status: SessionStatus::Complete,
            payment_status: PaymentStatus::Unpaid,
            metadata: MetadataMap::new(),
            customer: None,
            url: None,
        };
        assert!(!session.is_settled());
    }

    #[test]
    fn setup_intent_user_id() {
        let body = json!({
            "id": "evt_2",
            "type": "setup_intent.succeeded",
            "data": { "object": {
                "id": "seti_1",
                "payment_method": "pm_1",
                "metadata": { "user_id": "8" }
            }}
        });
        let event = ProviderEvent::parse(body.to_string().as_bytes()).unwrap();
        let ProviderEventKind::SetupIntentSucceeded(intent) = event.kind else {
            panic!("wrong kind");
        };
        assert_eq!(intent.user_id(), Some(UserId::new(8)));
    }

    #[test]
    fn unknown_types_are_kept_and_garbage_rejected() {
        let event = ProviderEvent::parse(br#"{"id":"evt_3","type":"charge.refunded"}"#).unwrap();
        assert_eq!(event.event_type(), "charge.refunded");
        assert!(ProviderEvent::parse(b"not json").is_err());
        assert!(matches!(
            ProviderEvent::parse(br#"{"type":"checkout.session.completed"}"#),
            Err(EventParseError::MissingObject(_))
        ));
    }
}

//! In-memory payment provider for local runs and tests.
//!
//! Sessions are created `open`/`unpaid`; tests (or a local operator) drive them
//! to `complete` and can render the matching webhook body.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::json;

use crate::event::{CheckoutSession, PaymentStatus, SessionStatus};
use crate::provider::{CheckoutRequest, CreatedSession, PaymentProvider, ProviderError};

#[derive(Debug, Clone)]
pub struct RecordedSession {
    pub session: CheckoutSession,
    pub request: CheckoutRequest,
}

#[derive(Debug, Default)]
pub struct InMemoryProvider {
    next: AtomicU64,
    sessions: Mutex<BTreeMap<String, RecordedSession>>,
}

impl InMemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_sessions<R>(&self, f: impl FnOnce(&mut BTreeMap<String, RecordedSession>) -> R) -> R {
        let mut guard = match self.sessions.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    fn set_state(&self, session_id: &str, status: SessionStatus, payment: PaymentStatus) -> Option<CheckoutSession> {
        self.with_sessions(|sessions| {
            let recorded = sessions.get_mut(session_id)?;
            recorded.session.status = status;
            recorded.session.payment_status = payment;
            Some(recorded.session.clone())
        })
    }

    /// Mark a session as paid, as if the buyer finished checkout.
    pub fn complete(&self, session_id: &str) -> Option<CheckoutSession> {
        self.set_state(session_id, SessionStatus::Complete, PaymentStatus::Paid)
    }

    /// Mark a session as abandoned.
    pub fn expire(&self, session_id: &str) -> Option<CheckoutSession> {
        self.set_state(session_id, SessionStatus::Expired, PaymentStatus::Unpaid)
    }

    pub fn session(&self, session_id: &str) -> Option<RecordedSession> {
        self.with_sessions(|sessions| sessions.get(session_id).cloned())
    }

    pub fn sessions(&self) -> Vec<RecordedSession> {
        self.with_sessions(|sessions| sessions.values().cloned().collect())
    }

    /// Body of the `checkout.session.completed` webhook for a session.
    pub fn completed_event(&self, session_id: &str) -> Option<serde_json::Value> {
        let session = self.session(session_id)?.session;
        Some(json!({
            "id": format!("evt_{session_id}"),
            "type": "checkout.session.completed",
            "data": { "object": session },
        }))
    }
}

#[async_trait]
impl PaymentProvider for InMemoryProvider {
    async fn create_checkout_session(
        &self,
        request: CheckoutRequest,
    ) -> Result<CreatedSession, ProviderError> {
        let n = self.next.fetch_add(1, Ordering::Relaxed) + 1;
        let id = format!("cs_test_{n:08}");
        let url = format!("https://checkout.invalid/pay/{id}");

        let session = CheckoutSession {
            id: id.clone(),
            status: SessionStatus::Open,
            payment_status: PaymentStatus::Unpaid,
            metadata: request.metadata.to_map(),
            customer: None,
            url: Some(url.clone()),
        };
        self.with_sessions(|sessions| {
            sessions.insert(id.clone(), RecordedSession { session, request });
        });
        Ok(CreatedSession { id, url })
    }

    async fn retrieve_session(&self, session_id: &str) -> Result<CheckoutSession, ProviderError> {
        self.session(session_id)
            .map(|r| r.session)
            .ok_or_else(|| ProviderError::SessionNotFound(session_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{ProviderEvent, ProviderEventKind};
    use crate::metadata::CheckoutMetadata;
    use dormswap_core::UserId;

    fn request() -> CheckoutRequest {
        CheckoutRequest {
            line_items: vec![],
            metadata: CheckoutMetadata::SellerActivation { user_id: UserId::new(4) },
            success_url: "http://localhost/ok".into(),
            cancel_url: "http://localhost/cancel".into(),
            customer_email: None,
        }
    }

    #[tokio::test]
    async fn sessions_start_open_and_complete_on_demand() {
        let provider = InMemoryProvider::new();
        let created = provider.create_checkout_session(request()).await.unwrap();

        let open = provider.retrieve_session(&created.id).await.unwrap();
        assert!(!open.is_settled());

        provider.complete(&created.id).unwrap();
        let done = provider.retrieve_session(&created.id).await.unwrap();
        assert!(done.is_settled());

        let body = provider.completed_event(&created.id).unwrap().to_string();
        let event = ProviderEvent::parse(body.as_bytes()).unwrap();
        assert!(matches!(event.kind, ProviderEventKind::CheckoutSessionCompleted(s) if s.id == created.id));
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let provider = InMemoryProvider::new();
        assert!(matches!(
            provider.retrieve_session("cs_missing").await,
            Err(ProviderError::SessionNotFound(_))
        ));
    }
}

//! Outbound payment-provider boundary.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use dormswap_core::Cents;

use crate::event::CheckoutSession;
use crate::metadata::CheckoutMetadata;

/// Placeholder the provider substitutes with the real session id in success URLs.
pub const SESSION_ID_PLACEHOLDER: &str = "{CHECKOUT_SESSION_ID}";

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider request failed: {0}")]
    Transport(String),

    #[error("provider rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("checkout session '{0}' not found")]
    SessionNotFound(String),

    #[error("unexpected provider response: {0}")]
    Decode(String),
}

impl ProviderError {
    /// Transport failures and 5xx responses are worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Transport(_) => true,
            ProviderError::Rejected { status, .. } => *status >= 500 || *status == 429,
            ProviderError::SessionNotFound(_) | ProviderError::Decode(_) => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub name: String,
    pub unit_amount: Cents,
    pub quantity: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutRequest {
    pub line_items: Vec<LineItem>,
    pub metadata: CheckoutMetadata,
    /// Must contain [`SESSION_ID_PLACEHOLDER`] so the success page can look the session up.
    pub success_url: String,
    pub cancel_url: String,
    pub customer_email: Option<String>,
}

impl CheckoutRequest {
    pub fn total(&self) -> Cents {
        self.line_items.iter().fold(Cents::ZERO, |acc, li| {
            li.unit_amount
                .checked_mul(i64::from(li.quantity))
                .and_then(|line| acc.checked_add(line))
                .unwrap_or(acc)
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedSession {
    pub id: String,
    pub url: String,
}

/// Hosted-checkout provider.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn create_checkout_session(
        &self,
        request: CheckoutRequest,
    ) -> Result<CreatedSession, ProviderError>;

    /// Fetch the provider's authoritative view of a session.
    async fn retrieve_session(&self, session_id: &str) -> Result<CheckoutSession, ProviderError>;
}

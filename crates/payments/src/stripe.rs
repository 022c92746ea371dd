//! Stripe-compatible HTTP client.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{error, instrument};

use crate::event::CheckoutSession;
use crate::provider::{
    CheckoutRequest, CreatedSession, PaymentProvider, ProviderError,
};

pub const DEFAULT_API_BASE: &str = "https://api.stripe.com";

#[derive(Clone)]
pub struct StripeClient {
    http: reqwest::Client,
    api_base: String,
    secret_key: String,
    currency: String,
}

impl core::fmt::Debug for StripeClient {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("StripeClient")
            .field("api_base", &self.api_base)
            .field("currency", &self.currency)
            .finish_non_exhaustive()
    }
}

#[derive(serde::Deserialize)]
struct SessionCreated {
    id: String,
    url: Option<String>,
}

#[derive(serde::Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(serde::Deserialize)]
struct ErrorDetail {
    message: String,
}

impl StripeClient {
    pub fn new(secret_key: impl Into<String>, api_base: impl Into<String>) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| ProviderError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            secret_key: secret_key.into(),
            currency: "usd".to_string(),
        })
    }

    fn form_for(&self, request: &CheckoutRequest) -> Vec<(String, String)> {
        let mut form = vec![
            ("mode".to_string(), "payment".to_string()),
            ("success_url".to_string(), request.success_url.clone()),
            ("cancel_url".to_string(), request.cancel_url.clone()),
        ];
        if let Some(email) = &request.customer_email {
            form.push(("customer_email".into(), email.clone()));
        }
        for (i, li) in request.line_items.iter().enumerate() {
            let prefix = format!("line_items[{i}]");
            form.push((format!("{prefix}[quantity]"), li.quantity.to_string()));
            form.push((format!("{prefix}[price_data][currency]"), self.currency.clone()));
            form.push((
                format!("{prefix}[price_data][unit_amount]"),
                li.unit_amount.get().to_string(),
            ));
            form.push((format!("{prefix}[price_data][product_data][name]"), li.name.clone()));
        }
        for (key, value) in request.metadata.to_map() {
            form.push((format!("metadata[{key}]"), value));
        }
        form
    }

    async fn rejected(response: reqwest::Response) -> ProviderError {
        let status = response.status().as_u16();
        let message = match response.json::<ErrorBody>().await {
            Ok(body) => body.error.message,
            Err(_) => "unreadable error body".to_string(),
        };
        ProviderError::Rejected { status, message }
    }
}

#[async_trait]
impl PaymentProvider for StripeClient {
    #[instrument(skip(self, request), fields(kind = request.metadata.kind()))]
    async fn create_checkout_session(
        &self,
        request: CheckoutRequest,
    ) -> Result<CreatedSession, ProviderError> {
        let response = self
            .http
            .post(format!("{}/v1/checkout/sessions", self.api_base))
            .basic_auth(&self.secret_key, Option::<&str>::None)
            .form(&self.form_for(&request))
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            let err = Self::rejected(response).await;
            error!(error = %err, "checkout session creation failed");
            return Err(err);
        }

        let created: SessionCreated = response
            .json()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))?;
        let url = created
            .url
            .ok_or_else(|| ProviderError::Decode("session has no url".into()))?;
        Ok(CreatedSession { id: created.id, url })
    }

    #[instrument(skip(self))]
    async fn retrieve_session(&self, session_id: &str) -> Result<CheckoutSession, ProviderError> {
        // The id is interpolated into the request path.
        if !is_session_id(session_id) {
            return Err(ProviderError::SessionNotFound(session_id.to_string()));
        }
        let response = self
            .http
            .get(format!("{}/v1/checkout/sessions/{session_id}", self.api_base))
            .basic_auth(&self.secret_key, Option::<&str>::None)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ProviderError::SessionNotFound(session_id.to_string()));
        }
        if !response.status().is_success() {
            return Err(Self::rejected(response).await);
        }

        response
            .json()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))
    }
}

/// Checkout session ids are `cs_` followed by ASCII letters, digits or underscores.
fn is_session_id(id: &str) -> bool {
    id.strip_prefix("cs_").is_some_and(|rest| {
        !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
    })
}

//! Payment-provider webhook.
//!
//! The body is taken raw: the signature covers the exact bytes sent. A 200
//! tells the provider to stop delivering; anything else schedules a retry.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};

use dormswap_payments::SIGNATURE_HEADER;

use crate::app::{dto, errors, services::AppServices};

pub async fn receive(
    Extension(services): Extension<Arc<AppServices>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());

    match services.reconciler.handle_webhook(&body, signature).await {
        Ok(report) if report.wants_redelivery() => {
            tracing::warn!(outcome = dto::report_label(&report), "webhook partially applied; asking for redelivery");
            errors::json_error(
                StatusCode::SERVICE_UNAVAILABLE,
                "try_again",
                "some items could not be confirmed yet",
            )
        }
        Ok(_) => (StatusCode::OK, "ok").into_response(),
        Err(e) => errors::reconcile_error_to_response(e),
    }
}

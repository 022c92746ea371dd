//! Error → HTTP response mapping.
//!
//! Every failure lands in one of three classes the client can act on:
//! rejected (4xx with a machine-readable code), try again (503), or a
//! server fault (5xx). "Already done" is never an error and never reaches here.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use dormswap_auth::AuthzError;
use dormswap_core::DomainError;
use dormswap_infra::{CheckoutError, LifecycleError, ReconcileError, StoreError};
use dormswap_payments::ProviderError;

pub fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

pub fn forbidden(err: AuthzError) -> Response {
    json_error(StatusCode::FORBIDDEN, "forbidden", err.to_string())
}

pub fn domain_error_to_response(err: DomainError) -> Response {
    let message = err.to_string();
    match err {
        DomainError::Validation(_) => json_error(StatusCode::BAD_REQUEST, "validation_error", message),
        DomainError::InvalidId(_) => json_error(StatusCode::BAD_REQUEST, "invalid_id", message),
        DomainError::InvariantViolation(_) => {
            json_error(StatusCode::CONFLICT, "invalid_transition", message)
        }
        DomainError::Ineligible(_) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "ineligible", message)
        }
        DomainError::NotFound => json_error(StatusCode::NOT_FOUND, "not_found", message),
        DomainError::Unauthorized => json_error(StatusCode::FORBIDDEN, "unauthorized", message),
    }
}

pub fn store_error_to_response(err: StoreError) -> Response {
    if err.is_retryable() {
        tracing::warn!(error = %err, "transient store failure");
        return json_error(StatusCode::SERVICE_UNAVAILABLE, "try_again", err.to_string());
    }
    match err {
        StoreError::Constraint(msg) => json_error(StatusCode::CONFLICT, "constraint_violated", msg),
        other => {
            tracing::error!(error = %other, "store failure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", other.to_string())
        }
    }
}

pub fn lifecycle_error_to_response(err: LifecycleError) -> Response {
    match err {
        LifecycleError::NotFound(what) => {
            json_error(StatusCode::NOT_FOUND, "not_found", format!("{what} not found"))
        }
        LifecycleError::Rejected(e) => domain_error_to_response(e),
        LifecycleError::Store(e) => store_error_to_response(e),
        LifecycleError::PickupPeriodClosed => json_error(
            StatusCode::CONFLICT,
            "pickup_period_closed",
            LifecycleError::PickupPeriodClosed.to_string(),
        ),
        e @ LifecycleError::CategoryInUse { .. } => {
            json_error(StatusCode::CONFLICT, "category_in_use", e.to_string())
        }
    }
}

pub fn provider_error_to_response(err: ProviderError) -> Response {
    match err {
        ProviderError::SessionNotFound(id) => json_error(
            StatusCode::NOT_FOUND,
            "session_not_found",
            format!("checkout session '{id}' not found"),
        ),
        e if e.is_retryable() => {
            tracing::warn!(error = %e, "payment provider unavailable");
            json_error(StatusCode::SERVICE_UNAVAILABLE, "try_again", e.to_string())
        }
        e => {
            tracing::error!(error = %e, "payment provider failure");
            json_error(StatusCode::BAD_GATEWAY, "provider_error", e.to_string())
        }
    }
}

pub fn checkout_error_to_response(err: CheckoutError) -> Response {
    match err {
        CheckoutError::NotFound(what) => {
            json_error(StatusCode::NOT_FOUND, "not_found", format!("{what} not found"))
        }
        CheckoutError::Unavailable(msg) => json_error(StatusCode::CONFLICT, "item_unavailable", msg),
        CheckoutError::Rejected(e) => domain_error_to_response(e),
        CheckoutError::Provider(e) => provider_error_to_response(e),
        CheckoutError::Store(e) => store_error_to_response(e),
    }
}

/// The webhook relies on this mapping: anything non-2xx makes the provider redeliver.
pub fn reconcile_error_to_response(err: ReconcileError) -> Response {
    match err {
        ReconcileError::Signature(e) => {
            json_error(StatusCode::BAD_REQUEST, "invalid_signature", e.to_string())
        }
        ReconcileError::Malformed(e) => {
            json_error(StatusCode::BAD_REQUEST, "malformed_payload", e.to_string())
        }
        ReconcileError::Metadata(e) => {
            json_error(StatusCode::BAD_REQUEST, "malformed_metadata", e.to_string())
        }
        ReconcileError::Provider(e) => provider_error_to_response(e),
        ReconcileError::Lifecycle(e) => lifecycle_error_to_response(e),
        e @ ReconcileError::NotOwner(_) => json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classes_map_to_status() {
        assert_eq!(
            lifecycle_error_to_response(LifecycleError::Store(StoreError::LockTimeout("item 1".into())))
                .status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            lifecycle_error_to_response(DomainError::ineligible("seller has not paid").into()).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            checkout_error_to_response(CheckoutError::Unavailable("sold".into())).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            provider_error_to_response(ProviderError::Rejected {
                status: 402,
                message: "card declined".into()
            })
            .status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            store_error_to_response(StoreError::Decode("bad status".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            lifecycle_error_to_response(LifecycleError::CategoryInUse {
                name: "Lamps".into(),
                items: 2
            })
            .status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            reconcile_error_to_response(ReconcileError::NotOwner("cs_1".into())).status(),
            StatusCode::FORBIDDEN
        );
    }
}

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;

use dormswap_core::{CategoryId, Cents, ItemId};
use dormswap_infra::{ReconcileReport, TransitionOutcome};
use dormswap_inventory::{CollectionMethod, DropoffPod, PayoutMethod, PickupWeek};
use dormswap_payments::CreatedSession;

// -------------------------
// Request DTOs
// -------------------------

/// Money fields are integer cents.
#[derive(Debug, Deserialize)]
pub struct SubmitItemRequest {
    pub category_id: CategoryId,
    pub description: String,
    pub collection_method: CollectionMethod,
    #[serde(default)]
    pub suggested_price: Option<Cents>,
}

#[derive(Debug, Deserialize)]
pub struct ApproveItemRequest {
    pub price: Cents,
    #[serde(default)]
    pub is_large: bool,
}

#[derive(Debug, Deserialize)]
pub struct RepriceItemRequest {
    pub price: Cents,
}

#[derive(Debug, Deserialize)]
pub struct RecategorizeItemRequest {
    pub category_id: CategoryId,
}

#[derive(Debug, Deserialize)]
pub struct CreateCategoryRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct PickupPeriodRequest {
    pub active: bool,
}

#[derive(Debug, Deserialize)]
pub struct ConfirmPickupRequest {
    pub pickup_week: PickupWeek,
    /// Empty means every item awaiting pickup.
    #[serde(default)]
    pub item_ids: Vec<ItemId>,
}

#[derive(Debug, Deserialize)]
pub struct DropoffRequest {
    pub pod: DropoffPod,
}

#[derive(Debug, Deserialize)]
pub struct UpdatePayoutRequest {
    pub payout_method: PayoutMethod,
    pub payout_handle: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct BuyQuery {
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SessionQuery {
    pub session_id: String,
}

// -------------------------
// Response mapping
// -------------------------

#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    pub session_id: String,
    pub url: String,
}

impl From<CreatedSession> for CheckoutResponse {
    fn from(s: CreatedSession) -> Self {
        Self {
            session_id: s.id,
            url: s.url,
        }
    }
}

pub fn checkout_created(session: CreatedSession) -> Response {
    (StatusCode::CREATED, Json(CheckoutResponse::from(session))).into_response()
}

/// `applied` distinguishes "done now" from "already done"; both are success.
pub fn transition_response(outcome: TransitionOutcome) -> Response {
    Json(json!({
        "applied": outcome.is_applied(),
        "item": outcome.item(),
    }))
    .into_response()
}

pub fn report_label(report: &ReconcileReport) -> &'static str {
    match report {
        ReconcileReport::Applied => "applied",
        ReconcileReport::AlreadyApplied => "already_applied",
        ReconcileReport::Ignored(_) => "ignored",
        ReconcileReport::Partial { .. } => "partial",
    }
}

pub fn report_json(report: &ReconcileReport) -> serde_json::Value {
    match report {
        ReconcileReport::Ignored(reason) => json!({
            "outcome": report_label(report),
            "reason": reason,
        }),
        ReconcileReport::Partial {
            applied,
            already_applied,
            failed,
            retryable,
        } => json!({
            "outcome": report_label(report),
            "applied": applied,
            "already_applied": already_applied,
            "failed": failed,
            "retryable": retryable,
        }),
        _ => json!({ "outcome": report_label(report) }),
    }
}

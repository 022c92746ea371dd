//! Seller routes: submissions, dashboard, logistics, payout details, activation.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde_json::json;

use dormswap_auth::Permission;
use dormswap_core::ItemId;
use dormswap_inventory::NewItem;

use crate::app::{dto, errors, services::AppServices};
use crate::authz::authorize_request;
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new()
        .route("/items", post(submit_item))
        .route("/items/:id/dropoff", post(confirm_dropoff))
        .route("/dashboard", get(dashboard))
        .route("/confirm-pickup", post(confirm_pickup))
        .route("/confirm-pickup/success", get(session_success))
        .route("/activate", post(activate))
        .route("/activate/success", get(session_success))
        .route("/upgrade", post(upgrade))
        .route("/upgrade/success", get(session_success))
        .route("/payout", post(update_payout))
}

pub async fn submit_item(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::SubmitItemRequest>,
) -> Response {
    if let Err(e) = authorize_request(&principal, &Permission::SELLER) {
        return errors::forbidden(e);
    }
    if let Err(e) = services.seller_account(principal.principal()).await {
        return errors::lifecycle_error_to_response(e);
    }

    let new = NewItem {
        category_id: body.category_id,
        seller_id: Some(principal.user_id()),
        description: body.description,
        suggested_price: body.suggested_price,
        collection_method: body.collection_method,
        created_at: Utc::now(),
    };
    match services.lifecycle.submit_item(new).await {
        Ok(item) => (StatusCode::CREATED, Json(item)).into_response(),
        Err(e) => errors::lifecycle_error_to_response(e),
    }
}

pub async fn dashboard(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
) -> Response {
    if let Err(e) = authorize_request(&principal, &Permission::SELLER) {
        return errors::forbidden(e);
    }
    let seller = match services.seller_account(principal.principal()).await {
        Ok(s) => s,
        Err(e) => return errors::lifecycle_error_to_response(e),
    };

    match services.lifecycle.seller_dashboard(seller.id).await {
        Ok(dashboard) => Json(json!({
            "seller": {
                "id": seller.id,
                "email": seller.email,
                "is_seller": seller.is_seller,
                "has_paid": seller.has_paid,
                "payment_declined": seller.payment_declined,
                "standing": seller.standing(),
            },
            "dashboard": dashboard,
        }))
        .into_response(),
        Err(e) => errors::lifecycle_error_to_response(e),
    }
}

pub async fn confirm_dropoff(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<ItemId>,
    Json(body): Json<dto::DropoffRequest>,
) -> Response {
    if let Err(e) = authorize_request(&principal, &Permission::SELLER) {
        return errors::forbidden(e);
    }
    match services
        .lifecycle
        .confirm_dropoff(principal.user_id(), id, body.pod)
        .await
    {
        Ok(outcome) => dto::transition_response(outcome),
        Err(e) => errors::lifecycle_error_to_response(e),
    }
}

pub async fn confirm_pickup(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::ConfirmPickupRequest>,
) -> Response {
    if let Err(e) = authorize_request(&principal, &Permission::SELLER) {
        return errors::forbidden(e);
    }
    let seller = match services.seller_account(principal.principal()).await {
        Ok(s) => s,
        Err(e) => return errors::lifecycle_error_to_response(e),
    };

    match services
        .checkout
        .begin_pickup_checkout(seller.id, &body.item_ids, body.pickup_week, Some(seller.email))
        .await
    {
        Ok(session) => dto::checkout_created(session),
        Err(e) => errors::checkout_error_to_response(e),
    }
}

pub async fn activate(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
) -> Response {
    if let Err(e) = authorize_request(&principal, &Permission::SELLER) {
        return errors::forbidden(e);
    }
    if let Err(e) = services.seller_account(principal.principal()).await {
        return errors::lifecycle_error_to_response(e);
    }

    match services.checkout.begin_seller_activation(principal.user_id()).await {
        Ok(Some(session)) => dto::checkout_created(session),
        Ok(None) => Json(json!({ "already_active": true })).into_response(),
        Err(e) => errors::checkout_error_to_response(e),
    }
}

/// Move every in-person item still waiting for drop-off to pickup, for the service fee.
pub async fn upgrade(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
) -> Response {
    if let Err(e) = authorize_request(&principal, &Permission::SELLER) {
        return errors::forbidden(e);
    }
    if let Err(e) = services.seller_account(principal.principal()).await {
        return errors::lifecycle_error_to_response(e);
    }

    match services.checkout.begin_upgrade(principal.user_id()).await {
        Ok(session) => dto::checkout_created(session),
        Err(e) => errors::checkout_error_to_response(e),
    }
}

pub async fn update_payout(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::UpdatePayoutRequest>,
) -> Response {
    if let Err(e) = authorize_request(&principal, &Permission::SELLER) {
        return errors::forbidden(e);
    }
    if let Err(e) = services.seller_account(principal.principal()).await {
        return errors::lifecycle_error_to_response(e);
    }

    match services
        .lifecycle
        .update_payout(principal.user_id(), body.payout_method, &body.payout_handle)
        .await
    {
        Ok(updated) => Json(json!({ "updated": updated })).into_response(),
        Err(e) => errors::lifecycle_error_to_response(e),
    }
}

/// Success page for the seller's own pickup, upgrade and activation checkouts.
/// Another account's session is refused before anything is applied.
pub async fn session_success(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Query(query): Query<dto::SessionQuery>,
) -> Response {
    if let Err(e) = authorize_request(&principal, &Permission::SELLER) {
        return errors::forbidden(e);
    }

    let (session, report) = match services
        .reconciler
        .reconcile_owned_session(&query.session_id, principal.user_id())
        .await
    {
        Ok(v) => v,
        Err(e) => return errors::reconcile_error_to_response(e),
    };

    let mut body = dto::report_json(&report);
    body["session_id"] = json!(session.id);
    body["paid"] = json!(session.is_settled());
    Json(body).into_response()
}

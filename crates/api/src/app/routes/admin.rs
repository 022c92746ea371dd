//! Staff routes: valuation, item corrections, categories, accounts, the pickup-period toggle.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde_json::json;

use dormswap_auth::Permission;
use dormswap_core::{CategoryId, ItemId, UserId};

use crate::app::{dto, errors, services::AppServices};
use crate::authz::authorize_request;
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new()
        .route("/items/:id", delete(delete_item))
        .route("/items/:id/approve", post(approve_item))
        .route("/items/:id/reprice", post(reprice_item))
        .route("/items/:id/category", post(recategorize_item))
        .route("/items/:id/sold", post(mark_sold))
        .route("/items/:id/reverse", post(reverse_sale))
        .route("/items/:id/payout-sent", post(mark_payout_sent))
        .route("/categories", post(create_category))
        .route("/categories/recount", post(recount_categories))
        .route("/categories/:id", delete(delete_category))
        .route("/users/:id", delete(delete_user))
        .route(
            "/settings/pickup-period",
            get(get_pickup_period).post(set_pickup_period),
        )
}

pub async fn approve_item(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<ItemId>,
    Json(body): Json<dto::ApproveItemRequest>,
) -> Response {
    if let Err(e) = authorize_request(&principal, &Permission::ADMIN_ITEMS) {
        return errors::forbidden(e);
    }
    match services.lifecycle.approve(id, body.price, body.is_large).await {
        Ok(outcome) => dto::transition_response(outcome),
        Err(e) => errors::lifecycle_error_to_response(e),
    }
}

pub async fn reprice_item(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<ItemId>,
    Json(body): Json<dto::RepriceItemRequest>,
) -> Response {
    if let Err(e) = authorize_request(&principal, &Permission::ADMIN_ITEMS) {
        return errors::forbidden(e);
    }
    match services.lifecycle.reprice(id, body.price).await {
        Ok(outcome) => dto::transition_response(outcome),
        Err(e) => errors::lifecycle_error_to_response(e),
    }
}

pub async fn recategorize_item(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<ItemId>,
    Json(body): Json<dto::RecategorizeItemRequest>,
) -> Response {
    if let Err(e) = authorize_request(&principal, &Permission::ADMIN_ITEMS) {
        return errors::forbidden(e);
    }
    match services.lifecycle.recategorize(id, body.category_id).await {
        Ok(outcome) => dto::transition_response(outcome),
        Err(e) => errors::lifecycle_error_to_response(e),
    }
}

/// Manual sale (cash at the store): the same settlement a payment performs.
pub async fn mark_sold(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<ItemId>,
) -> Response {
    if let Err(e) = authorize_request(&principal, &Permission::ADMIN_ITEMS) {
        return errors::forbidden(e);
    }
    match services.lifecycle.settle_sale(id).await {
        Ok(outcome) => dto::transition_response(outcome),
        Err(e) => errors::lifecycle_error_to_response(e),
    }
}

pub async fn reverse_sale(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<ItemId>,
) -> Response {
    if let Err(e) = authorize_request(&principal, &Permission::ADMIN_ITEMS) {
        return errors::forbidden(e);
    }
    match services.lifecycle.reverse_sale(id).await {
        Ok(outcome) => dto::transition_response(outcome),
        Err(e) => errors::lifecycle_error_to_response(e),
    }
}

pub async fn mark_payout_sent(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<ItemId>,
) -> Response {
    if let Err(e) = authorize_request(&principal, &Permission::ADMIN_ITEMS) {
        return errors::forbidden(e);
    }
    match services.lifecycle.mark_payout_sent(id).await {
        Ok(outcome) => dto::transition_response(outcome),
        Err(e) => errors::lifecycle_error_to_response(e),
    }
}

pub async fn delete_item(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<ItemId>,
) -> Response {
    if let Err(e) = authorize_request(&principal, &Permission::ADMIN_ITEMS) {
        return errors::forbidden(e);
    }
    match services.lifecycle.remove(id).await {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::lifecycle_error_to_response(e),
    }
}

pub async fn create_category(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::CreateCategoryRequest>,
) -> Response {
    if let Err(e) = authorize_request(&principal, &Permission::ADMIN_CATEGORIES) {
        return errors::forbidden(e);
    }
    match services.lifecycle.create_category(&body.name).await {
        Ok(category) => (StatusCode::CREATED, Json(category)).into_response(),
        Err(e) => errors::lifecycle_error_to_response(e),
    }
}

pub async fn delete_category(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<CategoryId>,
) -> Response {
    if let Err(e) = authorize_request(&principal, &Permission::ADMIN_CATEGORIES) {
        return errors::forbidden(e);
    }
    match services.lifecycle.delete_category(id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::lifecycle_error_to_response(e),
    }
}

/// Remove a seller account, releasing their live items first.
pub async fn delete_user(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<UserId>,
) -> Response {
    if let Err(e) = authorize_request(&principal, &Permission::ADMIN_USERS) {
        return errors::forbidden(e);
    }
    match services.lifecycle.remove_seller(principal.user_id(), id).await {
        Ok(removed) => Json(json!({ "items_removed": removed })).into_response(),
        Err(e) => errors::lifecycle_error_to_response(e),
    }
}

pub async fn recount_categories(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
) -> Response {
    if let Err(e) = authorize_request(&principal, &Permission::ADMIN_CATEGORIES) {
        return errors::forbidden(e);
    }
    match services.lifecycle.recount_categories().await {
        Ok(drift) => Json(json!({ "repaired": drift })).into_response(),
        Err(e) => errors::lifecycle_error_to_response(e),
    }
}

pub async fn get_pickup_period(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
) -> Response {
    if let Err(e) = authorize_request(&principal, &Permission::ADMIN_SETTINGS) {
        return errors::forbidden(e);
    }
    let active = services.lifecycle.settings().pickup_period_active().await;
    Json(json!({ "active": active })).into_response()
}

pub async fn set_pickup_period(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::PickupPeriodRequest>,
) -> Response {
    if let Err(e) = authorize_request(&principal, &Permission::ADMIN_SETTINGS) {
        return errors::forbidden(e);
    }
    match services
        .lifecycle
        .settings()
        .set_pickup_period_active(body.active)
        .await
    {
        Ok(()) => Json(json!({ "active": body.active })).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

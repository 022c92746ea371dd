use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};

use dormswap_core::ItemId;
use dormswap_infra::ItemFilter;
use dormswap_inventory::ItemStatus;
use dormswap_payments::CheckoutMetadata;

use crate::app::{dto, errors, services::AppServices};

pub fn router() -> Router {
    Router::new()
        .route("/categories", get(list_categories))
        .route("/items", get(list_items))
        .route("/items/:id", get(get_item))
        .route("/items/:id/buy", post(buy_item))
        .route("/checkout/success", get(checkout_success))
}

pub async fn list_categories(Extension(services): Extension<Arc<AppServices>>) -> Response {
    match services.store.categories().await {
        Ok(categories) => Json(categories).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn list_items(Extension(services): Extension<Arc<AppServices>>) -> Response {
    match services.store.list_items(&ItemFilter::available()).await {
        Ok(items) => Json(items).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

/// Listed and sold items are public; anything still in intake is not.
pub async fn get_item(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<ItemId>,
) -> Response {
    match services.store.item(id).await {
        Ok(Some(item)) if matches!(item.status, ItemStatus::Available | ItemStatus::Sold) => {
            Json(item).into_response()
        }
        Ok(_) => errors::json_error(StatusCode::NOT_FOUND, "not_found", format!("item {id} not found")),
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn buy_item(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<ItemId>,
    Query(query): Query<dto::BuyQuery>,
) -> Response {
    match services.checkout.begin_purchase(id, query.email).await {
        Ok(session) => dto::checkout_created(session),
        Err(e) => errors::checkout_error_to_response(e),
    }
}

/// Buyer lands here after paying; applies the sale if the webhook has not yet.
pub async fn checkout_success(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::SessionQuery>,
) -> Response {
    let (session, report) = match services.reconciler.reconcile_session(&query.session_id).await {
        Ok(v) => v,
        Err(e) => return errors::reconcile_error_to_response(e),
    };

    let item = match CheckoutMetadata::from_map(&session.metadata) {
        Ok(CheckoutMetadata::ItemPurchase { item_id }) => {
            services.store.item(item_id).await.ok().flatten()
        }
        _ => None,
    };

    let mut body = dto::report_json(&report);
    body["session_id"] = serde_json::json!(session.id);
    body["paid"] = serde_json::json!(session.is_settled());
    body["item"] = serde_json::json!(item);
    Json(body).into_response()
}

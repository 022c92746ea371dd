use axum::{
    routing::{get, post},
    Router,
};

pub mod admin;
pub mod seller;
pub mod storefront;
pub mod system;
pub mod webhook;

/// Routes reachable without a token: storefront, success page, provider webhook.
pub fn public_router() -> Router {
    Router::new()
        .route("/health", get(system::health))
        .route("/webhook", post(webhook::receive))
        .merge(storefront::router())
}

/// Router for all authenticated endpoints.
pub fn protected_router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .nest("/seller", seller::router())
        .nest("/admin", admin::router())
}

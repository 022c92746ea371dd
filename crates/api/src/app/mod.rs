//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: store, provider and notifier selection, service construction
//! - `routes/`: HTTP routes + handlers (one file per audience)
//! - `dto.rs`: request/response DTOs and JSON mapping helpers
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router};
use tower::ServiceBuilder;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

pub use services::{AppServices, build_services};

/// Build the full HTTP router around already-constructed services.
pub fn build_app(services: Arc<AppServices>, jwt_secret: &str) -> Router {
    let jwt = Arc::new(dormswap_auth::Hs256JwtValidator::new(jwt_secret.as_bytes()));
    let auth_state = middleware::AuthState { jwt };

    let protected = routes::protected_router().layer(axum::middleware::from_fn_with_state(
        auth_state,
        middleware::auth_middleware,
    ));

    Router::new()
        .merge(routes::public_router())
        .merge(protected)
        .layer(ServiceBuilder::new().layer(Extension(services)))
}

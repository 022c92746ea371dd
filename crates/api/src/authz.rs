//! API-side authorization guard.
//!
//! Enforced at the route boundary, before any service call, so the lifecycle
//! and payment services stay auth-agnostic.

use dormswap_auth::{AuthzError, Permission, authorize};

use crate::context::PrincipalContext;

/// Check one permission for the current request's principal.
pub fn authorize_request(
    principal: &PrincipalContext,
    required: &Permission,
) -> Result<(), AuthzError> {
    authorize(principal.principal(), required).inspect_err(|e| {
        tracing::info!(user_id = %principal.user_id(), error = %e, "request denied");
    })
}

//! `dormswap-auth` — pure authentication/authorization boundary.
//!
//! Decoupled from HTTP and storage: the API layer extracts the bearer token,
//! this crate verifies it and answers permission checks.

pub mod authorize;
pub mod claims;
pub mod jwt;
pub mod permissions;
pub mod principal;
pub mod roles;

pub use authorize::{AuthzError, authorize};
pub use claims::{JwtClaims, TokenValidationError, validate_claims};
pub use jwt::{Hs256JwtValidator, JwtValidator};
pub use permissions::{Permission, permissions_from_roles};
pub use principal::Principal;
pub use roles::Role;

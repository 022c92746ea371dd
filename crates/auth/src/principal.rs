use dormswap_core::UserId;

use crate::{JwtClaims, Permission, Role, permissions_from_roles};

/// A fully resolved principal for authorization decisions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: UserId,
    pub email: Option<String>,
    pub roles: Vec<Role>,
    pub permissions: Vec<Permission>,
}

impl Principal {
    pub fn from_claims(claims: &JwtClaims) -> Self {
        Self {
            user_id: claims.sub,
            email: claims.email.clone(),
            roles: claims.roles.clone(),
            permissions: permissions_from_roles(&claims.roles),
        }
    }

    pub fn is_staff(&self) -> bool {
        self.roles.iter().any(|r| r == &Role::STAFF)
    }
}

use dormswap_auth::{Permission, Principal, Role};
use dormswap_core::UserId;

/// Authenticated identity for a request.
///
/// Inserted by the auth middleware; present for every protected route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrincipalContext {
    principal: Principal,
}

impl PrincipalContext {
    pub fn new(principal: Principal) -> Self {
        Self { principal }
    }

    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    pub fn user_id(&self) -> UserId {
        self.principal.user_id
    }

    pub fn email(&self) -> Option<&str> {
        self.principal.email.as_deref()
    }

    pub fn roles(&self) -> &[Role] {
        &self.principal.roles
    }

    pub fn permissions(&self) -> &[Permission] {
        &self.principal.permissions
    }
}

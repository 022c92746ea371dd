use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use crate::Role;

/// Permission identifier.
///
/// Permissions are opaque strings (e.g. "admin.items.write"). The wildcard
/// `"*"` allows everything.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(Cow<'static, str>);

impl Permission {
    pub const WILDCARD: Permission = Permission(Cow::Borrowed("*"));

    /// Submit items and manage one's own listings and logistics.
    pub const SELLER: Permission = Permission(Cow::Borrowed("seller.items"));

    pub const ADMIN_ITEMS: Permission = Permission(Cow::Borrowed("admin.items.write"));
    pub const ADMIN_CATEGORIES: Permission = Permission(Cow::Borrowed("admin.categories.write"));
    pub const ADMIN_SETTINGS: Permission = Permission(Cow::Borrowed("admin.settings.write"));
    pub const ADMIN_USERS: Permission = Permission(Cow::Borrowed("admin.users.write"));

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_wildcard(&self) -> bool {
        self.as_str() == "*"
    }
}

impl core::fmt::Display for Permission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Role → permission mapping.
///
/// Every signed-in user may sell; `staff` grants everything.
pub fn permissions_from_roles(roles: &[Role]) -> Vec<Permission> {
    if roles.iter().any(|r| r == &Role::STAFF) {
        return vec![Permission::WILDCARD];
    }
    vec![Permission::SELLER]
}

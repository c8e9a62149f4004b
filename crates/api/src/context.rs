use storefront_auth::Role;
use storefront_core::UserId;

/// Verified identity for a request (attached by the credential resolver).
///
/// Handlers receive this via request extensions and must not re-implement
/// authentication.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CurrentUser {
    user_id: UserId,
    role: Role,
}

impl CurrentUser {
    pub fn new(user_id: UserId, role: Role) -> Self {
        Self { user_id, role }
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn role(&self) -> Role {
        self.role
    }
}

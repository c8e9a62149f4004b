//! Canonical identity model and the user-store seam.
//!
//! The store is the authority for uniqueness (`external_id`, `user_name`,
//! `email`): reconciliation relies on duplicate-key failures surfacing as
//! [`StoreError::Conflict`] rather than on application-level locking, since
//! handlers run across process instances in general.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use storefront_core::UserId;

use crate::Role;

/// The single internal representation of "who is making this request",
/// regardless of which credential scheme resolved it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CanonicalIdentity {
    pub user_id: UserId,
    pub external_id: Option<String>,
    pub role: Role,
}

/// Full user record as held by the user-profile store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub id: UserId,
    /// Identifier issued by the remote authority; absent for
    /// local-credential identities.
    pub external_id: Option<String>,
    pub user_name: String,
    pub email: String,
    pub display_name: String,
    pub role: Role,
    /// Argon2 PHC string; absent for identities created via reconciliation.
    pub password_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserRecord {
    pub fn identity(&self) -> CanonicalIdentity {
        CanonicalIdentity {
            user_id: self.id,
            external_id: self.external_id.clone(),
            role: self.role,
        }
    }
}

/// Insert payload; the store assigns `id` and timestamps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub external_id: Option<String>,
    pub user_name: String,
    pub email: String,
    pub display_name: String,
    pub role: Role,
    pub password_hash: Option<String>,
}

/// Which unique constraint a conflicting write hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniqueField {
    ExternalId,
    UserName,
    Email,
}

impl core::fmt::Display for UniqueField {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            UniqueField::ExternalId => "external_id",
            UniqueField::UserName => "user_name",
            UniqueField::Email => "email",
        };
        f.write_str(s)
    }
}

/// User store operation error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write.
    #[error("uniqueness conflict on {constraint}")]
    Conflict { constraint: UniqueField },

    /// The backend is unreachable or failed unexpectedly.
    #[error("user store unavailable: {0}")]
    Unavailable(String),
}

/// User-profile store consumed by the auth core.
///
/// CRUD by `id`/`external_id`/`email`/`user_name`, with uniqueness enforced
/// by the implementation on `external_id`, `user_name` and `email`.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_id(&self, id: UserId) -> Result<Option<UserRecord>, StoreError>;

    async fn find_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<UserRecord>, StoreError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>, StoreError>;

    async fn find_by_user_name(&self, user_name: &str)
        -> Result<Option<UserRecord>, StoreError>;

    /// Insert a new record; duplicate keys surface as
    /// [`StoreError::Conflict`] naming the violated constraint.
    async fn insert(&self, user: NewUser) -> Result<UserRecord, StoreError>;

    /// Update mutable profile fields (email, display name).
    async fn update_profile(
        &self,
        id: UserId,
        email: &str,
        display_name: &str,
    ) -> Result<(), StoreError>;

    /// Attach an external identity to an existing local record (migration
    /// path for local-credential users signing in externally).
    async fn link_external(
        &self,
        id: UserId,
        external_id: &str,
        display_name: &str,
    ) -> Result<(), StoreError>;

    /// Privileged role mutation; callers gate this on the admin role.
    async fn set_role(&self, id: UserId, role: Role) -> Result<(), StoreError>;

    async fn list(&self) -> Result<Vec<UserRecord>, StoreError>;
}

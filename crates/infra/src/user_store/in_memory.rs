//! In-memory user store for tests/dev.
//!
//! Enforces the same uniqueness semantics as the Postgres store so the
//! reconciliation retry paths behave identically in both environments.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;

use storefront_auth::{NewUser, Role, StoreError, UniqueField, UserRecord, UserStore};
use storefront_core::UserId;

#[derive(Debug, Default)]
pub struct InMemoryUserStore {
    inner: RwLock<HashMap<UserId, UserRecord>>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a record directly (test/bootstrap helper).
    pub fn seed(&self, record: UserRecord) {
        if let Ok(mut map) = self.inner.write() {
            map.insert(record.id, record);
        }
    }

    fn read(
        &self,
    ) -> Result<std::sync::RwLockReadGuard<'_, HashMap<UserId, UserRecord>>, StoreError> {
        self.inner
            .read()
            .map_err(|_| StoreError::Unavailable("user store lock poisoned".into()))
    }

    fn write(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<UserId, UserRecord>>, StoreError> {
        self.inner
            .write()
            .map_err(|_| StoreError::Unavailable("user store lock poisoned".into()))
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn find_by_id(&self, id: UserId) -> Result<Option<UserRecord>, StoreError> {
        Ok(self.read()?.get(&id).cloned())
    }

    async fn find_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<UserRecord>, StoreError> {
        Ok(self
            .read()?
            .values()
            .find(|u| u.external_id.as_deref() == Some(external_id))
            .cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>, StoreError> {
        Ok(self.read()?.values().find(|u| u.email == email).cloned())
    }

    async fn find_by_user_name(
        &self,
        user_name: &str,
    ) -> Result<Option<UserRecord>, StoreError> {
        Ok(self
            .read()?
            .values()
            .find(|u| u.user_name == user_name)
            .cloned())
    }

    async fn insert(&self, user: NewUser) -> Result<UserRecord, StoreError> {
        let mut map = self.write()?;

        if user.external_id.is_some()
            && map.values().any(|u| u.external_id == user.external_id)
        {
            return Err(StoreError::Conflict {
                constraint: UniqueField::ExternalId,
            });
        }
        if map.values().any(|u| u.user_name == user.user_name) {
            return Err(StoreError::Conflict {
                constraint: UniqueField::UserName,
            });
        }
        if map.values().any(|u| u.email == user.email) {
            return Err(StoreError::Conflict {
                constraint: UniqueField::Email,
            });
        }

        let now = Utc::now();
        let record = UserRecord {
            id: UserId::new(),
            external_id: user.external_id,
            user_name: user.user_name,
            email: user.email,
            display_name: user.display_name,
            role: user.role,
            password_hash: user.password_hash,
            created_at: now,
            updated_at: now,
        };
        map.insert(record.id, record.clone());
        Ok(record)
    }

    async fn update_profile(
        &self,
        id: UserId,
        email: &str,
        display_name: &str,
    ) -> Result<(), StoreError> {
        let mut map = self.write()?;
        if map.values().any(|u| u.id != id && u.email == email) {
            return Err(StoreError::Conflict {
                constraint: UniqueField::Email,
            });
        }
        if let Some(u) = map.get_mut(&id) {
            u.email = email.to_string();
            u.display_name = display_name.to_string();
            u.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn link_external(
        &self,
        id: UserId,
        external_id: &str,
        display_name: &str,
    ) -> Result<(), StoreError> {
        let mut map = self.write()?;
        if map
            .values()
            .any(|u| u.external_id.as_deref() == Some(external_id))
        {
            return Err(StoreError::Conflict {
                constraint: UniqueField::ExternalId,
            });
        }
        if let Some(u) = map.get_mut(&id) {
            u.external_id = Some(external_id.to_string());
            u.display_name = display_name.to_string();
            u.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn set_role(&self, id: UserId, role: Role) -> Result<(), StoreError> {
        let mut map = self.write()?;
        if let Some(u) = map.get_mut(&id) {
            u.role = role;
            u.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<UserRecord>, StoreError> {
        let mut users: Vec<UserRecord> = self.read()?.values().cloned().collect();
        users.sort_by_key(|u| u.created_at);
        Ok(users)
    }
}

//! Postgres-backed user store.
//!
//! Uniqueness on `external_id`, `user_name` and `email` is enforced at the
//! database level; it is the authority reconciliation relies on for
//! concurrent first-signups across process instances.
//!
//! Expected schema:
//!
//! ```sql
//! CREATE TABLE users (
//!     id            UUID PRIMARY KEY,
//!     external_id   TEXT UNIQUE,
//!     user_name     TEXT NOT NULL UNIQUE,
//!     email         TEXT NOT NULL UNIQUE,
//!     display_name  TEXT NOT NULL,
//!     role          TEXT NOT NULL,
//!     password_hash TEXT,
//!     created_at    TIMESTAMPTZ NOT NULL,
//!     updated_at    TIMESTAMPTZ NOT NULL
//! );
//! ```
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError | Scenario |
//! |------------|----------------------|------------|----------|
//! | Database (unique violation) | `23505` | `Conflict` | Duplicate key on insert/link (constraint name selects the field) |
//! | Database (other) | Any other | `Unavailable` | Other database errors |
//! | PoolClosed / network | N/A | `Unavailable` | Connection failures |

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use storefront_auth::{NewUser, Role, StoreError, UniqueField, UserRecord, UserStore};
use storefront_core::UserId;

#[derive(Debug, Clone)]
pub struct PostgresUserStore {
    pool: Arc<PgPool>,
}

impl PostgresUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

const SELECT_COLUMNS: &str = "id, external_id, user_name, email, display_name, role, \
                              password_hash, created_at, updated_at";

fn row_to_record(row: &PgRow) -> Result<UserRecord, StoreError> {
    let role_str: String = row
        .try_get("role")
        .map_err(|e| StoreError::Unavailable(e.to_string()))?;
    let role = Role::from_str(&role_str)
        .map_err(|_| StoreError::Unavailable(format!("corrupt role value '{role_str}'")))?;

    let id: uuid::Uuid = row
        .try_get("id")
        .map_err(|e| StoreError::Unavailable(e.to_string()))?;
    let created_at: DateTime<Utc> = row
        .try_get("created_at")
        .map_err(|e| StoreError::Unavailable(e.to_string()))?;
    let updated_at: DateTime<Utc> = row
        .try_get("updated_at")
        .map_err(|e| StoreError::Unavailable(e.to_string()))?;

    Ok(UserRecord {
        id: UserId::from_uuid(id),
        external_id: row
            .try_get("external_id")
            .map_err(|e| StoreError::Unavailable(e.to_string()))?,
        user_name: row
            .try_get("user_name")
            .map_err(|e| StoreError::Unavailable(e.to_string()))?,
        email: row
            .try_get("email")
            .map_err(|e| StoreError::Unavailable(e.to_string()))?,
        display_name: row
            .try_get("display_name")
            .map_err(|e| StoreError::Unavailable(e.to_string()))?,
        role,
        password_hash: row
            .try_get("password_hash")
            .map_err(|e| StoreError::Unavailable(e.to_string()))?,
        created_at,
        updated_at,
    })
}

fn map_sqlx_error(operation: &str, e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &e {
        if db.code().as_deref() == Some("23505") {
            let constraint = db.constraint().unwrap_or_default();
            let field = if constraint.contains("external_id") {
                UniqueField::ExternalId
            } else if constraint.contains("user_name") {
                UniqueField::UserName
            } else {
                UniqueField::Email
            };
            return StoreError::Conflict { constraint: field };
        }
    }
    tracing::warn!(operation, error = %e, "user store query failed");
    StoreError::Unavailable(e.to_string())
}

impl PostgresUserStore {
    async fn find_where(
        &self,
        clause: &str,
        bind: &str,
    ) -> Result<Option<UserRecord>, StoreError> {
        let query = format!("SELECT {SELECT_COLUMNS} FROM users WHERE {clause} = $1");
        let row = sqlx::query(&query)
            .bind(bind)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find", e))?;

        row.as_ref().map(row_to_record).transpose()
    }
}

#[async_trait]
impl UserStore for PostgresUserStore {
    async fn find_by_id(&self, id: UserId) -> Result<Option<UserRecord>, StoreError> {
        let query = format!("SELECT {SELECT_COLUMNS} FROM users WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_by_id", e))?;

        row.as_ref().map(row_to_record).transpose()
    }

    async fn find_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<UserRecord>, StoreError> {
        self.find_where("external_id", external_id).await
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>, StoreError> {
        self.find_where("email", email).await
    }

    async fn find_by_user_name(
        &self,
        user_name: &str,
    ) -> Result<Option<UserRecord>, StoreError> {
        self.find_where("user_name", user_name).await
    }

    async fn insert(&self, user: NewUser) -> Result<UserRecord, StoreError> {
        let id = UserId::new();
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO users
                (id, external_id, user_name, email, display_name, role,
                 password_hash, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(id.as_uuid())
        .bind(&user.external_id)
        .bind(&user.user_name)
        .bind(&user.email)
        .bind(&user.display_name)
        .bind(user.role.as_str())
        .bind(&user.password_hash)
        .bind(now)
        .bind(now)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert", e))?;

        Ok(UserRecord {
            id,
            external_id: user.external_id,
            user_name: user.user_name,
            email: user.email,
            display_name: user.display_name,
            role: user.role,
            password_hash: user.password_hash,
            created_at: now,
            updated_at: now,
        })
    }

    async fn update_profile(
        &self,
        id: UserId,
        email: &str,
        display_name: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE users SET email = $2, display_name = $3, updated_at = $4 WHERE id = $1",
        )
        .bind(id.as_uuid())
        .bind(email)
        .bind(display_name)
        .bind(Utc::now())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_profile", e))?;
        Ok(())
    }

    async fn link_external(
        &self,
        id: UserId,
        external_id: &str,
        display_name: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE users SET external_id = $2, display_name = $3, updated_at = $4 WHERE id = $1",
        )
        .bind(id.as_uuid())
        .bind(external_id)
        .bind(display_name)
        .bind(Utc::now())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("link_external", e))?;
        Ok(())
    }

    async fn set_role(&self, id: UserId, role: Role) -> Result<(), StoreError> {
        sqlx::query("UPDATE users SET role = $2, updated_at = $3 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(role.as_str())
            .bind(Utc::now())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("set_role", e))?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<UserRecord>, StoreError> {
        let query = format!("SELECT {SELECT_COLUMNS} FROM users ORDER BY created_at");
        let rows = sqlx::query(&query)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list", e))?;

        rows.iter().map(row_to_record).collect()
    }
}

//! Admin dashboard routes. Role-gated: absent identity is 401, a
//! non-admin identity is 403, and neither reaches a handler.

use std::sync::Arc;

use axum::{
    extract::Path,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, patch},
    Extension, Json, Router,
};
use serde::Deserialize;

use storefront_auth::{CredentialResolver, Role, UserRecord};
use storefront_core::UserId;

use crate::app::{errors, services::AppServices};
use crate::middleware;

pub fn router() -> Router {
    Router::new()
        .route("/users", get(list_users))
        .route("/users/:id/role", patch(set_user_role))
        .layer(axum::middleware::from_fn(middleware::require_admin))
}

pub async fn list_users(
    Extension(services): Extension<Arc<AppServices>>,
) -> axum::response::Response {
    let users = match services.users.list().await {
        Ok(users) => users,
        Err(e) => return errors::store_error_to_response(e),
    };

    let items: Vec<_> = users.iter().map(user_to_json).collect();
    (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response()
}

#[derive(Debug, Deserialize)]
pub struct SetRoleRequest {
    pub role: String,
}

/// PATCH /admin/users/:id/role - the privileged role mutation.
pub async fn set_user_role(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(resolver): Extension<Arc<CredentialResolver>>,
    Path(id): Path<String>,
    Json(body): Json<SetRoleRequest>,
) -> axum::response::Response {
    let user_id: UserId = match id.parse() {
        Ok(id) => id,
        Err(_) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid user id")
        }
    };
    let role: Role = match body.role.parse() {
        Ok(role) => role,
        Err(_) => {
            return errors::json_error(
                StatusCode::BAD_REQUEST,
                "validation_error",
                "role must be one of: user, admin",
            )
        }
    };

    let record = match services.users.find_by_id(user_id).await {
        Ok(Some(record)) => record,
        Ok(None) => return errors::json_error(StatusCode::NOT_FOUND, "not_found", "user not found"),
        Err(e) => return errors::store_error_to_response(e),
    };

    if let Err(e) = services.users.set_role(user_id, role).await {
        return errors::store_error_to_response(e);
    }

    // Externally-established sessions cache their identity; drop it so the
    // new role takes effect on the next request.
    if let Some(external_id) = &record.external_id {
        resolver.reconciler().forget(external_id);
    }

    tracing::info!(user_id = %user_id, role = %role, "role changed");
    (
        StatusCode::OK,
        Json(serde_json::json!({ "success": true, "id": user_id.to_string(), "role": role.as_str() })),
    )
        .into_response()
}

fn user_to_json(record: &UserRecord) -> serde_json::Value {
    serde_json::json!({
        "id": record.id.to_string(),
        "userName": record.user_name,
        "email": record.email,
        "displayName": record.display_name,
        "role": record.role.as_str(),
        "externalId": record.external_id,
        "createdAt": record.created_at.to_rfc3339(),
    })
}

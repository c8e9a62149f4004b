use axum::{http::StatusCode, response::IntoResponse, Extension, Json};

use storefront_auth::{AuthError, ResolvedIdentity};

use crate::app::errors;
use crate::context::CurrentUser;

/// GET /health - liveness probe (outside the middleware stack).
pub async fn health() -> axum::response::Response {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" }))).into_response()
}

/// GET /whoami - echo the resolved identity.
pub async fn whoami(
    user: Option<Extension<CurrentUser>>,
    Extension(resolved): Extension<ResolvedIdentity>,
) -> axum::response::Response {
    let Some(Extension(user)) = user else {
        return errors::auth_error_response(&AuthError::Unauthenticated);
    };

    (
        StatusCode::OK,
        Json(serde_json::json!({
            "user_id": user.user_id().to_string(),
            "role": user.role().as_str(),
            "scheme": resolved.scheme(),
        })),
    )
        .into_response()
}

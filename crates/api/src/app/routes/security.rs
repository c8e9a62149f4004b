//! Session security routes: anti-forgery token issuance and the local
//! credential scheme (register/login/logout).

use std::sync::Arc;

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Extension, Json, Router,
};
use chrono::Utc;
use serde::Deserialize;

use storefront_auth::{
    AuthError, CredentialResolver, NewUser, Role, SessionKey, UserRecord,
};

use crate::app::{errors, services::AppServices};
use crate::middleware::{CsrfState, SESSION_COOKIE};
use crate::password;

pub fn router() -> Router {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/logout", post(logout))
}

/// GET /csrf-token - issue an anti-forgery token for the session.
///
/// Also sets a readable (non-HTTP-only) mirror cookie for client
/// convenience; verification only ever reads the header/form value.
pub async fn csrf_token(
    Extension(session_key): Extension<SessionKey>,
    Extension(csrf): Extension<CsrfState>,
) -> Response {
    let token = csrf.service.issue(&session_key);

    let response = (
        StatusCode::OK,
        Json(serde_json::json!({ "success": true, "csrfToken": token })),
    )
        .into_response();

    with_cookie(response, &format!("csrf_token={token}; Path=/; SameSite=Lax"))
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    #[serde(rename = "userName")]
    pub user_name: String,
    pub email: String,
    pub password: String,
    #[serde(rename = "displayName")]
    pub display_name: Option<String>,
}

/// POST /auth/register - create a local-credential account and start a
/// session.
pub async fn register(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(resolver): Extension<Arc<CredentialResolver>>,
    Json(body): Json<RegisterRequest>,
) -> Response {
    let user_name = body.user_name.trim();
    let email = body.email.trim().to_lowercase();

    if user_name.is_empty() || body.password.is_empty() {
        return errors::json_error(
            StatusCode::BAD_REQUEST,
            "validation_error",
            "userName and password are required",
        );
    }
    if !email.contains('@') {
        return errors::json_error(
            StatusCode::BAD_REQUEST,
            "validation_error",
            "invalid email format",
        );
    }

    let password_hash = match password::hash_password(&body.password) {
        Ok(hash) => hash,
        Err(e) => {
            tracing::error!(error = %e, "password hashing failed");
            return errors::json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "registration failed",
            );
        }
    };

    let new_user = NewUser {
        external_id: None,
        user_name: user_name.to_string(),
        email,
        display_name: body
            .display_name
            .unwrap_or_else(|| user_name.to_string()),
        role: Role::User,
        password_hash: Some(password_hash),
    };

    let record = match services.users.insert(new_user).await {
        Ok(record) => record,
        Err(e) => return errors::store_error_to_response(e),
    };

    session_response(StatusCode::CREATED, &record, &resolver)
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(rename = "userName")]
    pub user_name: String,
    pub password: String,
}

/// POST /auth/login - local credential verification; issues the session
/// cookie on success.
pub async fn login(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(resolver): Extension<Arc<CredentialResolver>>,
    Json(body): Json<LoginRequest>,
) -> Response {
    let record = match services.users.find_by_user_name(body.user_name.trim()).await {
        Ok(Some(record)) => record,
        Ok(None) => return errors::auth_error_response(&AuthError::Unauthenticated),
        Err(e) => return errors::store_error_to_response(e),
    };

    let verified = record
        .password_hash
        .as_deref()
        .is_some_and(|hash| password::verify_password(hash, &body.password));
    if !verified {
        tracing::debug!(user_name = %record.user_name, "login rejected");
        return errors::auth_error_response(&AuthError::Unauthenticated);
    }

    session_response(StatusCode::OK, &record, &resolver)
}

/// POST /auth/logout - end the session: clear the cookie and invalidate the
/// session's anti-forgery secret so outstanding tokens stop verifying.
pub async fn logout(
    Extension(session_key): Extension<SessionKey>,
    Extension(csrf): Extension<CsrfState>,
) -> Response {
    csrf.secrets.invalidate(&session_key);

    let response = (
        StatusCode::OK,
        Json(serde_json::json!({ "success": true })),
    )
        .into_response();

    with_cookie(
        response,
        &format!("{SESSION_COOKIE}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0"),
    )
}

fn session_response(
    status: StatusCode,
    record: &UserRecord,
    resolver: &CredentialResolver,
) -> Response {
    let token = match resolver.session_codec().mint(
        record.id,
        record.role,
        &record.email,
        &record.user_name,
        Utc::now(),
    ) {
        Ok(token) => token,
        Err(e) => {
            tracing::error!(error = %e, "session token minting failed");
            return errors::json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "session could not be established",
            );
        }
    };

    let max_age = resolver.session_codec().ttl().num_seconds();
    let response = (
        status,
        Json(serde_json::json!({
            "success": true,
            "user": {
                "id": record.id.to_string(),
                "userName": record.user_name,
                "email": record.email,
                "role": record.role.as_str(),
            },
        })),
    )
        .into_response();

    with_cookie(
        response,
        &format!(
            "{SESSION_COOKIE}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age}"
        ),
    )
}

fn with_cookie(mut response: Response, cookie: &str) -> Response {
    match HeaderValue::from_str(cookie) {
        Ok(value) => {
            response.headers_mut().append(header::SET_COOKIE, value);
            response
        }
        Err(e) => {
            tracing::error!(error = %e, "set-cookie header construction failed");
            errors::json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "session could not be established",
            )
        }
    }
}

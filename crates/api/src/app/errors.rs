use axum::http::{header, HeaderValue, StatusCode};
use axum::response::IntoResponse;
use serde_json::json;

use storefront_auth::{AuthError, StoreError};

/// Map an auth failure to its terminal HTTP response.
///
/// Every variant carries a distinct status and machine-readable code; none
/// of them ever reaches business logic.
pub fn auth_error_response(err: &AuthError) -> axum::response::Response {
    let status = match err {
        AuthError::Unauthenticated => StatusCode::UNAUTHORIZED,
        AuthError::Forbidden => StatusCode::FORBIDDEN,
        AuthError::MissingToken => StatusCode::FORBIDDEN,
        AuthError::InvalidToken => StatusCode::FORBIDDEN,
        AuthError::ProfileFetchFailed(_) => StatusCode::BAD_GATEWAY,
        AuthError::TooManyRequests { .. } => StatusCode::TOO_MANY_REQUESTS,
        AuthError::Conflict(_) => StatusCode::CONFLICT,
        AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    let mut response = json_error(status, err.code(), err.to_string());

    if let AuthError::TooManyRequests { retry_after } = err {
        if let Ok(value) = HeaderValue::from_str(&retry_after.as_secs().to_string()) {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
    }

    response
}

pub fn store_error_to_response(err: StoreError) -> axum::response::Response {
    match err {
        StoreError::Conflict { constraint } => json_error(
            StatusCode::CONFLICT,
            "conflict",
            format!("uniqueness conflict on {constraint}"),
        ),
        StoreError::Unavailable(msg) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", msg)
        }
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

//! Request middleware: rate limiting, credential resolution, anti-forgery
//! verification, and role gating.
//!
//! Execution order per request:
//! rate limiter → credential resolver → anti-forgery check (mutating methods
//! only) → role gate (per-router) → handler.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderMap, Method},
    middleware::Next,
    response::Response,
};
use chrono::Utc;

use storefront_auth::{
    AntiForgeryService, AuthError, CredentialResolver, CsrfError, RateLimiter, Role, RouteClass,
    SecretStore, SessionKey,
};

use crate::app::errors;
use crate::context::CurrentUser;

/// Name of the session cookie carrying the local-scheme token.
pub const SESSION_COOKIE: &str = "token";

/// Header carrying the anti-forgery token.
pub const CSRF_HEADER: &str = "x-csrf-token";

/// Form field mirroring [`CSRF_HEADER`] for classic form posts.
pub const CSRF_FORM_FIELD: &str = "_csrf";

/// Routes that mutate state before a session can exist.
const CSRF_EXEMPT: &[&str] = &["/auth/login", "/auth/register"];

/// Upper bound when buffering a form body to read `_csrf`.
const MAX_FORM_BYTES: usize = 64 * 1024;

pub type SharedAntiForgery = AntiForgeryService<Arc<dyn SecretStore>>;

#[derive(Clone)]
pub struct RateLimitState {
    pub limiter: Arc<RateLimiter>,
}

#[derive(Clone)]
pub struct AuthState {
    pub resolver: Arc<CredentialResolver>,
}

#[derive(Clone)]
pub struct CsrfState {
    pub service: Arc<SharedAntiForgery>,
    pub secrets: Arc<dyn SecretStore>,
}

/// Short-circuits the request before the credential resolver once the
/// client exceeded its route-class threshold.
pub async fn rate_limit_middleware(
    State(state): State<RateLimitState>,
    req: Request,
    next: Next,
) -> Response {
    let class = route_class(req.uri().path());
    let addr = client_ip(&req);

    if let Err(e) = state.limiter.check(addr, class) {
        return errors::auth_error_response(&e);
    }

    next.run(req).await
}

/// Resolves the request's credentials and attaches the identity, the scheme
/// and the anti-forgery session key to the request extensions. Resolution
/// failures short-circuit here; the handler never runs.
pub async fn auth_middleware(
    State(state): State<AuthState>,
    mut req: Request,
    next: Next,
) -> Response {
    let authorization = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    let session_cookie = cookie_value(req.headers(), SESSION_COOKIE);

    let resolved = match state
        .resolver
        .resolve(authorization.as_deref(), session_cookie.as_deref(), Utc::now())
        .await
    {
        Ok(resolved) => resolved,
        Err(e) => {
            tracing::debug!(error = %e, path = req.uri().path(), "credential resolution failed");
            return errors::auth_error_response(&e);
        }
    };

    let session_key = match &session_cookie {
        Some(cookie) => SessionKey::from_session_token(cookie),
        None => SessionKey::from_client_addr(&client_ip(&req)),
    };

    if let Some((user_id, role)) = resolved.current_user() {
        req.extensions_mut().insert(CurrentUser::new(user_id, role));
    }
    req.extensions_mut().insert(session_key);
    req.extensions_mut().insert(resolved);

    next.run(req).await
}

/// Verifies the anti-forgery token on mutating requests.
///
/// Read-only methods bypass entirely; `MissingToken` and `InvalidToken` are
/// reported distinctly and both reject the request before business logic.
pub async fn csrf_middleware(
    State(state): State<CsrfState>,
    req: Request,
    next: Next,
) -> Response {
    if !is_mutating(req.method()) || CSRF_EXEMPT.contains(&req.uri().path()) {
        return next.run(req).await;
    }

    let session_key = req
        .extensions()
        .get::<SessionKey>()
        .cloned()
        .unwrap_or_else(|| SessionKey::from_client_addr(&client_ip(&req)));

    let mut token = req
        .headers()
        .get(CSRF_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    // Classic form posts carry the token in the body instead of the header.
    let mut req = req;
    if token.is_none() && is_form_request(req.headers()) {
        let (parts, body) = req.into_parts();
        let bytes = match axum::body::to_bytes(body, MAX_FORM_BYTES).await {
            Ok(bytes) => bytes,
            Err(_) => return errors::auth_error_response(&AuthError::MissingToken),
        };
        token = form_field(&bytes, CSRF_FORM_FIELD);
        req = Request::from_parts(parts, Body::from(bytes));
    }

    match state.service.verify(&session_key, token.as_deref()) {
        Ok(()) => next.run(req).await,
        Err(CsrfError::MissingToken) => errors::auth_error_response(&AuthError::MissingToken),
        Err(CsrfError::InvalidToken) => errors::auth_error_response(&AuthError::InvalidToken),
    }
}

/// Role gate for routers that require identity (any role).
pub async fn require_identity(req: Request, next: Next) -> Response {
    match req.extensions().get::<CurrentUser>() {
        Some(_) => next.run(req).await,
        None => errors::auth_error_response(&AuthError::Unauthenticated),
    }
}

/// Role gate for admin-only routers.
///
/// Absent identity is `Unauthenticated`, present-but-wrong role is
/// `Forbidden`; both are terminal and the wrapped handler never runs.
pub async fn require_admin(req: Request, next: Next) -> Response {
    require_role(Role::Admin, req, next).await
}

pub async fn require_role(role: Role, req: Request, next: Next) -> Response {
    match req.extensions().get::<CurrentUser>() {
        None => errors::auth_error_response(&AuthError::Unauthenticated),
        Some(user) if !user.role().satisfies(role) => {
            errors::auth_error_response(&AuthError::Forbidden)
        }
        Some(_) => next.run(req).await,
    }
}

/// Route-class classification for rate limiting.
pub fn route_class(path: &str) -> RouteClass {
    if path.starts_with("/auth/") || path == "/csrf-token" {
        RouteClass::Auth
    } else if path.starts_with("/uploads") {
        RouteClass::Upload
    } else if path.ends_with("/search") {
        RouteClass::Search
    } else {
        RouteClass::General
    }
}

fn is_mutating(method: &Method) -> bool {
    matches!(
        *method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    )
}

fn is_form_request(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"))
}

fn form_field(bytes: &[u8], name: &str) -> Option<String> {
    let fields: HashMap<String, String> = serde_urlencoded::from_bytes(bytes).ok()?;
    fields.get(name).cloned()
}

/// Client address, from the connect info attached by the server.
pub fn client_ip(req: &Request) -> IpAddr {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

/// Extract a cookie value from the `Cookie` header.
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let raw = headers.get(header::COOKIE)?.to_str().ok()?;
    for pair in raw.split(';') {
        if let Some((key, value)) = pair.trim().split_once('=') {
            if key == name {
                return Some(value.to_string());
            }
        }
    }
    None
}

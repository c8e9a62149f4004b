//! HTTP API application wiring (axum router + middleware stack).
//!
//! This folder is structured like:
//! - `services.rs`: user store + the thin storefront collaborators
//! - `routes/`: HTTP routes + handlers (one file per area)
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{routing::get, Extension, Router};
use tower::ServiceBuilder;

use storefront_auth::{
    AntiForgeryService, BearerValidator, CredentialResolver, InMemorySecretStore, ProfileFetcher,
    RateLimiter, Reconciler, SecretStore, SessionTokenCodec,
};
use storefront_infra::HttpProfileFetcher;

use crate::config::AppConfig;
use crate::middleware;

pub mod errors;
pub mod routes;
pub mod services;

pub use services::AppServices;

/// Build the full HTTP router (public entrypoint used by `main.rs`).
///
/// Request order through the stack: rate limiter → credential resolver →
/// anti-forgery check → per-router role gates → handler.
pub fn build_app(config: AppConfig, services: AppServices) -> Router {
    let fetcher: Arc<dyn ProfileFetcher> = Arc::new(HttpProfileFetcher::new(&config.issuer_url));
    build_app_with_fetcher(config, services, fetcher)
}

/// Same wiring with an injected profile fetcher (tests stub the authority).
pub fn build_app_with_fetcher(
    config: AppConfig,
    services: AppServices,
    fetcher: Arc<dyn ProfileFetcher>,
) -> Router {
    let secrets: Arc<dyn SecretStore> = Arc::new(InMemorySecretStore::new());
    let antiforgery = Arc::new(AntiForgeryService::new(secrets.clone()));

    let session_codec = SessionTokenCodec::new(config.session_signing_key.as_bytes());
    let bearer = BearerValidator::new(&config.issuer_url, &config.audience);
    let reconciler = Reconciler::new(services.users.clone(), fetcher);
    let resolver = Arc::new(CredentialResolver::new(session_codec, bearer, reconciler));

    let rate_limit_state = middleware::RateLimitState {
        limiter: Arc::new(RateLimiter::new(config.rate_limits.clone())),
    };
    let auth_state = middleware::AuthState {
        resolver: resolver.clone(),
    };
    let csrf_state = middleware::CsrfState {
        service: antiforgery,
        secrets,
    };

    // ServiceBuilder layers top-down: requests pass the rate limiter, then
    // the resolver, then the anti-forgery check, then per-router role gates.
    let protected = routes::router()
        .layer(Extension(Arc::new(services)))
        .layer(Extension(resolver))
        .layer(Extension(csrf_state.clone()))
        .layer(
            ServiceBuilder::new()
                .layer(axum::middleware::from_fn_with_state(
                    rate_limit_state,
                    middleware::rate_limit_middleware,
                ))
                .layer(axum::middleware::from_fn_with_state(
                    auth_state,
                    middleware::auth_middleware,
                ))
                .layer(axum::middleware::from_fn_with_state(
                    csrf_state,
                    middleware::csrf_middleware,
                )),
        );

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(protected)
}

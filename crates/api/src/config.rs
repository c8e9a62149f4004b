//! Process configuration from environment variables.

use storefront_auth::RateLimitConfig;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,

    /// HS256 key for the local session cookie scheme.
    pub session_signing_key: String,

    /// External authority base URL (`https://{issuer-domain}/`).
    pub issuer_url: String,

    /// Required `aud` value on external bearer tokens.
    pub audience: String,

    pub rate_limits: RateLimitConfig,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let session_signing_key = std::env::var("SESSION_SIGNING_KEY").unwrap_or_else(|_| {
            tracing::warn!("SESSION_SIGNING_KEY not set; using insecure dev default");
            "dev-secret".to_string()
        });

        Self {
            bind_addr: std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            session_signing_key,
            issuer_url: std::env::var("AUTH_ISSUER_URL")
                .unwrap_or_else(|_| "https://storefront.example-issuer.com/".to_string()),
            audience: std::env::var("AUTH_AUDIENCE")
                .unwrap_or_else(|_| "storefront-api".to_string()),
            rate_limits: RateLimitConfig::default(),
        }
    }
}

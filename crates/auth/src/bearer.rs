//! External bearer token validation (RS256 + issuer JWKS).
//!
//! Bearer tokens are validated against the issuing authority's published
//! signing keys. Keys are fetched from `{issuer}.well-known/jwks.json`,
//! cached with a TTL, and refreshed when an unknown `kid` shows up (key
//! rotation). Fetches have a bounded timeout and are retried at most once
//! with a short backoff; timeouts surface as `Unauthenticated`, they never
//! hang the request.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;

use crate::error::AuthError;

const FETCH_TIMEOUT: Duration = Duration::from_secs(3);
const RETRY_BACKOFF: Duration = Duration::from_millis(100);
const DEFAULT_JWKS_TTL: Duration = Duration::from_secs(300);

/// Claims read from an external bearer token.
///
/// `sub` is the external identity; the profile fields are best-effort hints
/// and the authority's profile endpoint stays authoritative for them.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BearerClaims {
    pub sub: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    pub exp: i64,
}

#[derive(Debug, Clone, Deserialize)]
struct Jwk {
    kty: String,
    #[serde(default)]
    kid: Option<String>,
    #[serde(default)]
    n: Option<String>,
    #[serde(default)]
    e: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct JwkSet {
    keys: Vec<Jwk>,
}

struct JwksSnapshot {
    keys: HashMap<String, DecodingKey>,
    fetched_at: Instant,
}

/// Validates external bearer tokens against the issuer's key set.
pub struct BearerValidator {
    issuer: String,
    audience: String,
    http: reqwest::Client,
    jwks_ttl: Duration,
    cache: RwLock<Option<JwksSnapshot>>,
    static_keys: Option<HashMap<String, DecodingKey>>,
}

impl BearerValidator {
    /// `issuer` is the authority base URL (normalized to a trailing slash);
    /// `audience` is the required `aud` value.
    pub fn new(issuer: impl Into<String>, audience: impl Into<String>) -> Self {
        let mut issuer = issuer.into();
        if !issuer.ends_with('/') {
            issuer.push('/');
        }
        Self {
            issuer,
            audience: audience.into(),
            http: reqwest::Client::builder()
                .timeout(FETCH_TIMEOUT)
                .build()
                .expect("http client construction"),
            jwks_ttl: DEFAULT_JWKS_TTL,
            cache: RwLock::new(None),
            static_keys: None,
        }
    }

    /// Use a fixed key set instead of fetching from the issuer. Intended for
    /// tests and air-gapped deployments where the key set is provisioned
    /// out-of-band.
    pub fn with_static_jwks(
        issuer: impl Into<String>,
        audience: impl Into<String>,
        keys: Vec<(String, DecodingKey)>,
    ) -> Self {
        let mut validator = Self::new(issuer, audience);
        validator.static_keys = Some(keys.into_iter().collect());
        validator
    }

    pub fn jwks_url(&self) -> String {
        format!("{}.well-known/jwks.json", self.issuer)
    }

    /// Validate a bearer token: RS256-pinned signature against the issuer's
    /// keys, plus issuer and audience constraints. Any failure is
    /// `Unauthenticated`; signature failures are never retried.
    pub async fn validate(&self, token: &str) -> Result<BearerClaims, AuthError> {
        let header = decode_header(token).map_err(|_| AuthError::Unauthenticated)?;
        if header.alg != Algorithm::RS256 {
            tracing::debug!(alg = ?header.alg, "bearer token with non-RS256 algorithm rejected");
            return Err(AuthError::Unauthenticated);
        }
        let kid = header.kid.ok_or(AuthError::Unauthenticated)?;

        let key = self.key_for(&kid).await?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[self.audience.as_str()]);
        validation.set_issuer(&[self.issuer.as_str()]);

        let data = decode::<BearerClaims>(token, &key, &validation).map_err(|e| {
            tracing::debug!(error = %e, "bearer token validation failed");
            AuthError::Unauthenticated
        })?;
        Ok(data.claims)
    }

    async fn key_for(&self, kid: &str) -> Result<DecodingKey, AuthError> {
        if let Some(keys) = &self.static_keys {
            return keys.get(kid).cloned().ok_or(AuthError::Unauthenticated);
        }

        if let Ok(cache) = self.cache.read() {
            if let Some(snapshot) = cache.as_ref() {
                if snapshot.fetched_at.elapsed() < self.jwks_ttl {
                    if let Some(key) = snapshot.keys.get(kid) {
                        return Ok(key.clone());
                    }
                    // Unknown kid under a fresh snapshot: fall through and
                    // refresh, the issuer may have rotated keys.
                }
            }
        }

        let keys = self.fetch_jwks().await?;
        let key = keys.get(kid).cloned();
        if let Ok(mut cache) = self.cache.write() {
            *cache = Some(JwksSnapshot {
                keys,
                fetched_at: Instant::now(),
            });
        }
        key.ok_or(AuthError::Unauthenticated)
    }

    async fn fetch_jwks(&self) -> Result<HashMap<String, DecodingKey>, AuthError> {
        let url = self.jwks_url();
        let mut last_error = String::new();

        for attempt in 0..2u8 {
            if attempt > 0 {
                tokio::time::sleep(RETRY_BACKOFF).await;
            }

            match self.fetch_jwks_once(&url).await {
                Ok(keys) => return Ok(keys),
                Err(e) => last_error = e,
            }
        }

        tracing::warn!(url = %url, error = %last_error, "issuer key fetch failed");
        Err(AuthError::Unauthenticated)
    }

    async fn fetch_jwks_once(&self, url: &str) -> Result<HashMap<String, DecodingKey>, String> {
        let set = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| e.to_string())?
            .error_for_status()
            .map_err(|e| e.to_string())?
            .json::<JwkSet>()
            .await
            .map_err(|e| e.to_string())?;

        let mut keys = HashMap::new();
        for jwk in set.keys {
            if jwk.kty != "RSA" {
                continue;
            }
            let (Some(kid), Some(n), Some(e)) = (jwk.kid, jwk.n, jwk.e) else {
                continue;
            };
            match DecodingKey::from_rsa_components(&n, &e) {
                Ok(key) => {
                    keys.insert(kid, key);
                }
                Err(err) => {
                    tracing::debug!(error = %err, "skipping unparseable JWK");
                }
            }
        }
        Ok(keys)
    }
}

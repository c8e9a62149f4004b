//! Local session token codec (HS256).
//!
//! The local scheme transports [`SessionClaims`] in a signed, time-limited
//! cookie. Signature verification is pinned to HS256 against the fixed local
//! signing key; claim timing is validated deterministically against an
//! injected `now` so tests never race the clock.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use thiserror::Error;

use storefront_core::UserId;

use crate::claims::{validate_claims, SessionClaims, TokenValidationError};
use crate::Role;

/// Default validity of a session cookie.
pub const SESSION_TTL_MINUTES: i64 = 60;

#[derive(Debug, Error)]
pub enum SessionTokenError {
    #[error("token could not be minted")]
    Mint(#[source] jsonwebtoken::errors::Error),

    #[error("token malformed or signature invalid")]
    Invalid,

    #[error(transparent)]
    Claims(#[from] TokenValidationError),
}

/// Mints and verifies local session tokens.
pub struct SessionTokenCodec {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl SessionTokenCodec {
    pub fn new(signing_key: &[u8]) -> Self {
        Self {
            encoding: EncodingKey::from_secret(signing_key),
            decoding: DecodingKey::from_secret(signing_key),
            ttl: Duration::minutes(SESSION_TTL_MINUTES),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Mint a signed session token for `user_id`.
    pub fn mint(
        &self,
        user_id: UserId,
        role: Role,
        email: &str,
        user_name: &str,
        now: DateTime<Utc>,
    ) -> Result<String, SessionTokenError> {
        let claims = SessionClaims::new(user_id, role, email, user_name, now, self.ttl);
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(SessionTokenError::Mint)
    }

    /// Verify signature and claim timing; returns the claims on success.
    pub fn verify(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<SessionClaims, SessionTokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        // Timing is checked via validate_claims with the injected `now`.
        validation.validate_exp = false;
        validation.validate_aud = false;

        let data = decode::<SessionClaims>(token, &self.decoding, &validation)
            .map_err(|_| SessionTokenError::Invalid)?;

        validate_claims(&data.claims, now)?;
        Ok(data.claims)
    }
}

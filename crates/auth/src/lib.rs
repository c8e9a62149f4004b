//! `storefront-auth` — request authentication and anti-forgery core.
//!
//! This crate is intentionally decoupled from HTTP and storage. It holds:
//! - the per-session secret store and the anti-forgery token service,
//! - the credential resolver (local session cookie / external bearer token),
//! - identity reconciliation against the user store,
//! - the role model and the per-route-class rate limiter.
//!
//! The API layer wires these behind axum middleware; storage and network
//! collaborators plug in through the `UserStore` and `ProfileFetcher` traits.

pub mod antiforgery;
pub mod bearer;
pub mod claims;
pub mod error;
pub mod identity;
pub mod ratelimit;
pub mod reconcile;
pub mod resolver;
pub mod roles;
pub mod secret;
pub mod token;

pub use antiforgery::{AntiForgeryService, CsrfError};
pub use bearer::{BearerClaims, BearerValidator};
pub use claims::{validate_claims, SessionClaims, TokenValidationError};
pub use error::AuthError;
pub use identity::{CanonicalIdentity, NewUser, StoreError, UniqueField, UserRecord, UserStore};
pub use ratelimit::{RateLimitConfig, RateLimitPolicy, RateLimiter, RouteClass};
pub use reconcile::{
    ExternalProfile, ProfileFetchError, ProfileFetcher, ReconcileOutcome, Reconciler,
};
pub use resolver::{CredentialResolver, ResolvedIdentity};
pub use roles::Role;
pub use secret::{InMemorySecretStore, SecretStore, SessionKey, SessionSecret};
pub use token::{SessionTokenCodec, SessionTokenError};

//! Credential resolution: one scheme per request, resolved once.
//!
//! Scheme selection is centralized here instead of being duck-typed on
//! header presence across handlers: a well-formed `Authorization: Bearer`
//! header routes to the external scheme, otherwise the session cookie (if
//! any) is attempted, otherwise the request is anonymous.

use chrono::{DateTime, Utc};

use storefront_core::UserId;

use crate::bearer::BearerValidator;
use crate::claims::SessionClaims;
use crate::error::AuthError;
use crate::identity::CanonicalIdentity;
use crate::reconcile::Reconciler;
use crate::token::SessionTokenCodec;
use crate::Role;

/// Which credential scheme authenticated the request.
#[derive(Debug, Clone)]
pub enum ResolvedIdentity {
    /// Local scheme: signed session cookie.
    Local(SessionClaims),
    /// External scheme: issuer bearer token, reconciled to a local record.
    External(CanonicalIdentity),
    /// No credentials presented. Allowed only on routes that do not require
    /// identity.
    Anonymous,
}

impl ResolvedIdentity {
    /// The authenticated `(user, role)` pair, if any.
    pub fn current_user(&self) -> Option<(UserId, Role)> {
        match self {
            ResolvedIdentity::Local(claims) => Some((claims.user_id, claims.role)),
            ResolvedIdentity::External(identity) => Some((identity.user_id, identity.role)),
            ResolvedIdentity::Anonymous => None,
        }
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self, ResolvedIdentity::Anonymous)
    }

    /// Scheme label for logs.
    pub fn scheme(&self) -> &'static str {
        match self {
            ResolvedIdentity::Local(_) => "local",
            ResolvedIdentity::External(_) => "external",
            ResolvedIdentity::Anonymous => "anonymous",
        }
    }
}

/// Resolves inbound credentials to a [`ResolvedIdentity`].
pub struct CredentialResolver {
    session: SessionTokenCodec,
    bearer: BearerValidator,
    reconciler: Reconciler,
}

impl CredentialResolver {
    pub fn new(
        session: SessionTokenCodec,
        bearer: BearerValidator,
        reconciler: Reconciler,
    ) -> Self {
        Self {
            session,
            bearer,
            reconciler,
        }
    }

    pub fn session_codec(&self) -> &SessionTokenCodec {
        &self.session
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    /// Resolve the request's credentials. Exactly one scheme applies; on
    /// failure the request must be short-circuited by the caller.
    pub async fn resolve(
        &self,
        authorization: Option<&str>,
        session_cookie: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<ResolvedIdentity, AuthError> {
        if let Some(token) = authorization.and_then(parse_bearer) {
            let claims = self.bearer.validate(token).await?;
            let identity = self.reconciler.reconcile(&claims.sub, token).await?;
            return Ok(ResolvedIdentity::External(identity));
        }

        if let Some(cookie) = session_cookie {
            let claims = self.session.verify(cookie, now).map_err(|e| {
                tracing::debug!(error = %e, "session cookie rejected");
                AuthError::Unauthenticated
            })?;
            return Ok(ResolvedIdentity::Local(claims));
        }

        Ok(ResolvedIdentity::Anonymous)
    }
}

/// Extract the token from a well-formed bearer header. A header that is not
/// well-formed does not select the external scheme.
fn parse_bearer(header: &str) -> Option<&str> {
    let token = header.strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

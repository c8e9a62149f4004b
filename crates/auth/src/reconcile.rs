//! Identity reconciliation for the external scheme.
//!
//! Maps an externally-authenticated identity onto a local user record,
//! creating or linking one if absent. The flow is an explicit state machine
//! with named transitions:
//!
//! - `Found → Update`: record exists for the external id; refresh mutable
//!   profile fields.
//! - `NotFound + EmailMatch → Link`: a local-credential record with the
//!   authority's email exists; attach the external id to it.
//! - `NotFound + NoMatch → Create`: new record, role defaults to `user`.
//! - `Create + Conflict → Retry-as-Find`: a concurrent first signup won the
//!   insert; re-look-up and reuse the winner's record.
//!
//! Reconciliation runs once per session establishment, not per request: a
//! process-local cache keyed by external id short-circuits repeat calls
//! within its TTL.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use thiserror::Error;

use crate::error::AuthError;
use crate::identity::{CanonicalIdentity, NewUser, StoreError, UniqueField, UserStore};
use crate::Role;

const RETRY_BACKOFF: Duration = Duration::from_millis(100);
const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

/// Profile as returned by the external authority's user-profile endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ExternalProfile {
    pub sub: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Error)]
pub enum ProfileFetchError {
    #[error("profile endpoint unreachable: {0}")]
    Unreachable(String),

    #[error("profile response invalid: {0}")]
    Invalid(String),
}

/// Fetches the authority's profile for the subject of a bearer token.
#[async_trait]
pub trait ProfileFetcher: Send + Sync {
    async fn fetch(&self, access_token: &str) -> Result<ExternalProfile, ProfileFetchError>;
}

/// Which transition established the identity (observability + tests).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Found,
    Linked,
    Created,
}

struct CachedIdentity {
    identity: CanonicalIdentity,
    cached_at: Instant,
}

/// Reconciles external identities against the user store.
pub struct Reconciler {
    store: Arc<dyn UserStore>,
    fetcher: Arc<dyn ProfileFetcher>,
    cache: RwLock<HashMap<String, CachedIdentity>>,
    cache_ttl: Duration,
}

impl Reconciler {
    pub fn new(store: Arc<dyn UserStore>, fetcher: Arc<dyn ProfileFetcher>) -> Self {
        Self {
            store,
            fetcher,
            cache: RwLock::new(HashMap::new()),
            cache_ttl: DEFAULT_CACHE_TTL,
        }
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Resolve `external_id` to a canonical identity, fetching the profile
    /// and touching the store only when the session is not already
    /// established in the cache.
    pub async fn reconcile(
        &self,
        external_id: &str,
        access_token: &str,
    ) -> Result<CanonicalIdentity, AuthError> {
        if let Some(identity) = self.cached(external_id) {
            return Ok(identity);
        }

        let profile = self.fetch_profile(access_token).await?;
        if profile.sub != external_id {
            // The authority must agree with the token on the subject.
            tracing::warn!(external_id, profile_sub = %profile.sub, "profile subject mismatch");
            return Err(AuthError::Unauthenticated);
        }

        let (identity, outcome) = self.establish(&profile).await?;
        tracing::info!(
            external_id,
            user_id = %identity.user_id,
            outcome = ?outcome,
            "external identity reconciled"
        );

        if let Ok(mut cache) = self.cache.write() {
            cache.insert(
                external_id.to_string(),
                CachedIdentity {
                    identity: identity.clone(),
                    cached_at: Instant::now(),
                },
            );
        }
        Ok(identity)
    }

    /// Drop the cached establishment for `external_id` (e.g. after a role
    /// change) so the next request reconciles afresh.
    pub fn forget(&self, external_id: &str) {
        if let Ok(mut cache) = self.cache.write() {
            cache.remove(external_id);
        }
    }

    fn cached(&self, external_id: &str) -> Option<CanonicalIdentity> {
        let cache = self.cache.read().ok()?;
        let entry = cache.get(external_id)?;
        if entry.cached_at.elapsed() >= self.cache_ttl {
            return None;
        }
        Some(entry.identity.clone())
    }

    async fn fetch_profile(&self, access_token: &str) -> Result<ExternalProfile, AuthError> {
        let mut last_error = String::new();
        for attempt in 0..2u8 {
            if attempt > 0 {
                tokio::time::sleep(RETRY_BACKOFF).await;
            }
            match self.fetcher.fetch(access_token).await {
                Ok(profile) => return Ok(profile),
                Err(ProfileFetchError::Invalid(e)) => {
                    // Incomplete/invalid payloads are not transient.
                    return Err(AuthError::ProfileFetchFailed(e));
                }
                Err(ProfileFetchError::Unreachable(e)) => last_error = e,
            }
        }
        Err(AuthError::ProfileFetchFailed(last_error))
    }

    async fn establish(
        &self,
        profile: &ExternalProfile,
    ) -> Result<(CanonicalIdentity, ReconcileOutcome), AuthError> {
        let display_name = effective_display_name(profile);

        // Found → Update
        if let Some(existing) = self
            .store
            .find_by_external_id(&profile.sub)
            .await
            .map_err(store_error)?
        {
            // A missing authority email never overwrites a real one.
            let email = profile
                .email
                .clone()
                .unwrap_or_else(|| existing.email.clone());
            if existing.email != email || existing.display_name != display_name {
                self.store
                    .update_profile(existing.id, &email, &display_name)
                    .await
                    .map_err(store_error)?;
            }
            return Ok((existing.identity(), ReconcileOutcome::Found));
        }

        // NotFound + EmailMatch → Link (migration path for local accounts)
        if let Some(authority_email) = &profile.email {
            if let Some(existing) = self
                .store
                .find_by_email(authority_email)
                .await
                .map_err(store_error)?
            {
                match self
                    .store
                    .link_external(existing.id, &profile.sub, &display_name)
                    .await
                {
                    Ok(()) => {
                        let mut identity = existing.identity();
                        identity.external_id = Some(profile.sub.clone());
                        return Ok((identity, ReconcileOutcome::Linked));
                    }
                    Err(StoreError::Conflict { .. }) => {
                        // Lost a race: the external id landed elsewhere
                        // meanwhile. Retry-as-Find below handles it.
                        return self.retry_as_find(profile).await;
                    }
                    Err(e) => return Err(store_error(e)),
                }
            }
        }

        // NotFound + NoMatch → Create
        self.create(profile, &effective_email(profile), &display_name)
            .await
    }

    async fn create(
        &self,
        profile: &ExternalProfile,
        email: &str,
        display_name: &str,
    ) -> Result<(CanonicalIdentity, ReconcileOutcome), AuthError> {
        let base = username_base(profile);
        let user_name = self.unique_user_name(&base).await?;

        let new_user = NewUser {
            external_id: Some(profile.sub.clone()),
            user_name,
            email: email.to_string(),
            display_name: display_name.to_string(),
            role: Role::User,
            password_hash: None,
        };

        match self.store.insert(new_user.clone()).await {
            Ok(record) => Ok((record.identity(), ReconcileOutcome::Created)),
            Err(StoreError::Conflict {
                constraint: UniqueField::ExternalId,
            }) => {
                // Create + Conflict → Retry-as-Find: a concurrent first
                // signup inserted the record; reuse it.
                self.retry_as_find(profile).await
            }
            Err(StoreError::Conflict { .. }) => {
                // Write conflict on user_name/email: one retry with a
                // timestamp-based suffix, then surface the conflict.
                let suffixed = NewUser {
                    user_name: format!("{base}-{}", Utc::now().timestamp_millis()),
                    ..new_user
                };
                match self.store.insert(suffixed).await {
                    Ok(record) => Ok((record.identity(), ReconcileOutcome::Created)),
                    Err(StoreError::Conflict {
                        constraint: UniqueField::ExternalId,
                    }) => self.retry_as_find(profile).await,
                    Err(e) => Err(store_error(e)),
                }
            }
            Err(e) => Err(store_error(e)),
        }
    }

    async fn retry_as_find(
        &self,
        profile: &ExternalProfile,
    ) -> Result<(CanonicalIdentity, ReconcileOutcome), AuthError> {
        match self
            .store
            .find_by_external_id(&profile.sub)
            .await
            .map_err(store_error)?
        {
            Some(record) => Ok((record.identity(), ReconcileOutcome::Found)),
            None => Err(AuthError::Conflict(format!(
                "external id {} conflicted but has no record",
                profile.sub
            ))),
        }
    }

    async fn unique_user_name(&self, base: &str) -> Result<String, AuthError> {
        let mut candidate = base.to_string();
        let mut suffix = 2u32;
        while self
            .store
            .find_by_user_name(&candidate)
            .await
            .map_err(store_error)?
            .is_some()
        {
            if suffix > 50 {
                // Pathological collision chain; fall back to a timestamp.
                return Ok(format!("{base}-{}", Utc::now().timestamp_millis()));
            }
            candidate = format!("{base}-{suffix}");
            suffix += 1;
        }
        Ok(candidate)
    }
}

fn store_error(e: StoreError) -> AuthError {
    match e {
        StoreError::Conflict { constraint } => {
            AuthError::Conflict(format!("uniqueness conflict on {constraint}"))
        }
        StoreError::Unavailable(msg) => AuthError::Internal(msg),
    }
}

/// Email used for the local record. When the authority supplies none, a
/// placeholder is synthesized from the external id; see DESIGN.md for the
/// policy rationale.
fn effective_email(profile: &ExternalProfile) -> String {
    match &profile.email {
        Some(email) => email.clone(),
        None => format!("{}@users.noreply.invalid", slug(&profile.sub)),
    }
}

fn effective_display_name(profile: &ExternalProfile) -> String {
    profile
        .name
        .clone()
        .or_else(|| profile.nickname.clone())
        .unwrap_or_else(|| profile.sub.clone())
}

/// Base username candidate: nickname, else email local-part, else a slug of
/// the external id.
fn username_base(profile: &ExternalProfile) -> String {
    if let Some(nickname) = &profile.nickname {
        let s = slug(nickname);
        if !s.is_empty() {
            return s;
        }
    }
    if let Some(email) = &profile.email {
        if let Some((local, _)) = email.split_once('@') {
            let s = slug(local);
            if !s.is_empty() {
                return s;
            }
        }
    }
    let s = slug(&profile.sub);
    if s.is_empty() {
        "user".to_string()
    } else {
        s
    }
}

fn slug(input: &str) -> String {
    input
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect::<String>()
        .trim_matches('-')
        .to_string()
}

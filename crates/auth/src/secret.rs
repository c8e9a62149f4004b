//! Per-session anti-forgery secrets.
//!
//! One secret per session key, created lazily on first use and never
//! persisted. The store is injected behind [`SecretStore`] so call sites do
//! not change when the in-memory map is swapped for a distributed cache.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Length of a session secret in bytes.
pub const SECRET_LEN: usize = 32;

/// Sweep cadence: every this many creates, stale entries are evicted.
const SWEEP_EVERY: u64 = 512;

/// Cryptographically random per-session secret.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionSecret([u8; SECRET_LEN]);

impl SessionSecret {
    fn generate() -> Self {
        let mut bytes = [0u8; SECRET_LEN];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

// Secret material must never end up in logs.
impl core::fmt::Debug for SessionSecret {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("SessionSecret(..)")
    }
}

/// Opaque identifier for the requesting client.
///
/// Derived from the transport-level session token when one is present,
/// otherwise from the client address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey(String);

impl SessionKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Key a session by its (opaque) session token. The token is hashed so
    /// the key itself carries no credential material.
    pub fn from_session_token(token: &str) -> Self {
        let digest = Sha256::digest(token.as_bytes());
        Self(format!("tok:{}", URL_SAFE_NO_PAD.encode(digest)))
    }

    /// Fallback key for clients without a session token.
    pub fn from_client_addr(addr: &std::net::IpAddr) -> Self {
        Self(format!("addr:{addr}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Session secret lifecycle manager.
///
/// `get_or_create` is deterministic per key for the lifetime of the key: two
/// concurrent callers racing on a missing key must observe the same secret
/// (first writer wins). A missing key is not an error, it triggers creation.
pub trait SecretStore: Send + Sync {
    /// Return the secret for `key`, creating one if absent.
    fn get_or_create(&self, key: &SessionKey) -> SessionSecret;

    /// Return the secret for `key` without creating one.
    fn peek(&self, key: &SessionKey) -> Option<SessionSecret>;

    /// Remove the entry; all previously issued tokens for `key` fail from
    /// here on.
    fn invalidate(&self, key: &SessionKey);
}

impl<S> SecretStore for Arc<S>
where
    S: SecretStore + ?Sized,
{
    fn get_or_create(&self, key: &SessionKey) -> SessionSecret {
        (**self).get_or_create(key)
    }

    fn peek(&self, key: &SessionKey) -> Option<SessionSecret> {
        (**self).peek(key)
    }

    fn invalidate(&self, key: &SessionKey) {
        (**self).invalidate(key)
    }
}

#[derive(Debug)]
struct SecretEntry {
    secret: SessionSecret,
    created_at: Instant,
}

/// In-memory secret store.
///
/// Eviction is probabilistic: every [`SWEEP_EVERY`] creates, entries older
/// than `max_age` are dropped while the write lock is already held. There is
/// no dedicated background task.
#[derive(Debug)]
pub struct InMemorySecretStore {
    inner: RwLock<HashMap<SessionKey, SecretEntry>>,
    max_age: Duration,
    creates: AtomicU64,
}

impl InMemorySecretStore {
    pub fn new() -> Self {
        Self::with_max_age(Duration::from_secs(12 * 60 * 60))
    }

    pub fn with_max_age(max_age: Duration) -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
            max_age,
            creates: AtomicU64::new(0),
        }
    }

    /// Evict entries older than `max_age`. Exposed for tests; normally runs
    /// inline on the sweep cadence.
    pub fn sweep(&self) {
        let max_age = self.max_age;
        if let Ok(mut map) = self.inner.write() {
            map.retain(|_, entry| entry.created_at.elapsed() < max_age);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.read().map(|m| m.len()).unwrap_or(0)
    }
}

impl Default for InMemorySecretStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SecretStore for InMemorySecretStore {
    fn get_or_create(&self, key: &SessionKey) -> SessionSecret {
        // Fast path: existing entry under the read lock.
        if let Ok(map) = self.inner.read() {
            if let Some(entry) = map.get(key) {
                return entry.secret.clone();
            }
        }

        let mut map = self.inner.write().unwrap();
        // Re-check under the write lock: the first writer wins and later
        // callers observe its value.
        let entry = map.entry(key.clone()).or_insert_with(|| {
            self.creates.fetch_add(1, Ordering::Relaxed);
            SecretEntry {
                secret: SessionSecret::generate(),
                created_at: Instant::now(),
            }
        });
        let secret = entry.secret.clone();

        if self.creates.load(Ordering::Relaxed) % SWEEP_EVERY == 0 {
            let max_age = self.max_age;
            map.retain(|_, entry| entry.created_at.elapsed() < max_age);
        }

        secret
    }

    fn peek(&self, key: &SessionKey) -> Option<SessionSecret> {
        let map = self.inner.read().ok()?;
        let entry = map.get(key)?;
        if entry.created_at.elapsed() >= self.max_age {
            return None;
        }
        Some(entry.secret.clone())
    }

    fn invalidate(&self, key: &SessionKey) {
        if let Ok(mut map) = self.inner.write() {
            map.remove(key);
        }
    }
}

//! Per-client, per-route-class rate limiting.
//!
//! Sliding-window counters keyed by `(client address, route class)`. Each
//! class carries its own window length and threshold, so credential-stuffing
//! against auth endpoints is throttled independently of catalog browsing.
//! Counters are process-local and reset on restart.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::error::AuthError;

/// Named bucket of endpoints sharing one rate-limit policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteClass {
    Auth,
    Upload,
    Search,
    General,
}

impl RouteClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteClass::Auth => "auth",
            RouteClass::Upload => "upload",
            RouteClass::Search => "search",
            RouteClass::General => "general",
        }
    }
}

impl core::fmt::Display for RouteClass {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Threshold for one route class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub max_requests: u32,
    pub window: Duration,
}

impl RateLimitPolicy {
    pub const fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
        }
    }
}

/// Per-class policies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub auth: RateLimitPolicy,
    pub upload: RateLimitPolicy,
    pub search: RateLimitPolicy,
    pub general: RateLimitPolicy,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            auth: RateLimitPolicy::new(10, Duration::from_secs(60)),
            upload: RateLimitPolicy::new(20, Duration::from_secs(60)),
            search: RateLimitPolicy::new(60, Duration::from_secs(60)),
            general: RateLimitPolicy::new(300, Duration::from_secs(60)),
        }
    }
}

impl RateLimitConfig {
    pub fn policy(&self, class: RouteClass) -> RateLimitPolicy {
        match class {
            RouteClass::Auth => self.auth,
            RouteClass::Upload => self.upload,
            RouteClass::Search => self.search,
            RouteClass::General => self.general,
        }
    }

    pub fn with_policy(mut self, class: RouteClass, policy: RateLimitPolicy) -> Self {
        match class {
            RouteClass::Auth => self.auth = policy,
            RouteClass::Upload => self.upload = policy,
            RouteClass::Search => self.search = policy,
            RouteClass::General => self.general = policy,
        }
        self
    }
}

/// Keep the key map from growing without bound under address churn.
const MAX_TRACKED_KEYS: usize = 10_000;

/// Sliding-window rate limiter.
pub struct RateLimiter {
    config: RateLimitConfig,
    windows: Mutex<HashMap<(IpAddr, RouteClass), Vec<Instant>>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Record a request for `(addr, class)`; returns `TooManyRequests` once
    /// the class threshold is exceeded within the window.
    pub fn check(&self, addr: IpAddr, class: RouteClass) -> Result<(), AuthError> {
        let policy = self.config.policy(class);
        let now = Instant::now();

        let mut windows = self.windows.lock().unwrap();

        if windows.len() > MAX_TRACKED_KEYS {
            windows.retain(|_, hits| {
                hits.last()
                    .is_some_and(|t| now.duration_since(*t) < policy.window)
            });
        }

        let hits = windows.entry((addr, class)).or_default();
        hits.retain(|t| now.duration_since(*t) < policy.window);

        if hits.len() as u32 >= policy.max_requests {
            tracing::debug!(%addr, class = %class, "rate limit exceeded");
            return Err(AuthError::TooManyRequests {
                retry_after: policy.window,
            });
        }

        hits.push(now);
        Ok(())
    }
}

//! External authority profile endpoint client.

use std::time::Duration;

use async_trait::async_trait;

use storefront_auth::{ExternalProfile, ProfileFetchError, ProfileFetcher};

const FETCH_TIMEOUT: Duration = Duration::from_secs(3);

/// Fetches user profiles from the issuer's `userinfo` endpoint, authorized
/// by the caller's bearer token.
pub struct HttpProfileFetcher {
    endpoint: String,
    http: reqwest::Client,
}

impl HttpProfileFetcher {
    /// `issuer` is the authority base URL; the profile endpoint is
    /// `{issuer}userinfo`.
    pub fn new(issuer: impl Into<String>) -> Self {
        let mut issuer = issuer.into();
        if !issuer.ends_with('/') {
            issuer.push('/');
        }
        Self::from_endpoint(format!("{issuer}userinfo"))
    }

    /// Use an explicit profile endpoint URL.
    pub fn from_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            http: reqwest::Client::builder()
                .timeout(FETCH_TIMEOUT)
                .build()
                .expect("http client construction"),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ProfileFetcher for HttpProfileFetcher {
    async fn fetch(&self, access_token: &str) -> Result<ExternalProfile, ProfileFetchError> {
        let response = self
            .http
            .get(&self.endpoint)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| ProfileFetchError::Unreachable(e.to_string()))?;

        let status = response.status();
        if status.is_client_error() {
            // 4xx is not transient; do not trigger the caller's retry.
            return Err(ProfileFetchError::Invalid(format!(
                "profile endpoint returned {status}"
            )));
        }
        if !status.is_success() {
            return Err(ProfileFetchError::Unreachable(format!(
                "profile endpoint returned {status}"
            )));
        }

        response
            .json::<ExternalProfile>()
            .await
            .map_err(|e| ProfileFetchError::Invalid(e.to_string()))
    }
}

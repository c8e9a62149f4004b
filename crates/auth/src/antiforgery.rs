//! Anti-forgery (CSRF) token service.
//!
//! A token is `base64url(salt) "." base64url(HMAC-SHA256(secret, salt))`,
//! derived from the session's secret plus fresh randomness. Nothing beyond
//! the secret is stored server-side; a token is valid iff it verifies
//! against the secret held for the same session key, so expiry follows the
//! secret's lifecycle.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::secret::{SecretStore, SessionKey};

type HmacSha256 = Hmac<Sha256>;

/// Length of the per-token salt in bytes.
const SALT_LEN: usize = 16;

/// Anti-forgery verification failure.
///
/// `MissingToken` and `InvalidToken` are distinct on purpose: both reject the
/// request before business logic, but they are reported under different codes.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CsrfError {
    #[error("anti-forgery token missing")]
    MissingToken,

    #[error("anti-forgery token invalid")]
    InvalidToken,
}

/// Issues and verifies per-session anti-forgery tokens.
pub struct AntiForgeryService<S> {
    secrets: S,
}

impl<S> AntiForgeryService<S>
where
    S: SecretStore,
{
    pub fn new(secrets: S) -> Self {
        Self { secrets }
    }

    /// Derive a fresh token for `key`, creating the session secret if this is
    /// the session's first token request.
    pub fn issue(&self, key: &SessionKey) -> String {
        let secret = self.secrets.get_or_create(key);

        let mut salt = [0u8; SALT_LEN];
        rand::rngs::OsRng.fill_bytes(&mut salt);
        let mac = hmac_sha256(secret.as_bytes(), &salt);

        format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(salt),
            URL_SAFE_NO_PAD.encode(mac)
        )
    }

    /// Verify `token` against the secret for `key`.
    ///
    /// A session with no secret yet fails verification rather than passing
    /// vacuously, and the secret is never created here.
    pub fn verify(&self, key: &SessionKey, token: Option<&str>) -> Result<(), CsrfError> {
        let token = match token {
            Some(t) if !t.is_empty() => t,
            _ => return Err(CsrfError::MissingToken),
        };

        let secret = self.secrets.peek(key).ok_or(CsrfError::InvalidToken)?;

        let (salt_b64, mac_b64) = token.split_once('.').ok_or(CsrfError::InvalidToken)?;
        let salt = URL_SAFE_NO_PAD
            .decode(salt_b64)
            .map_err(|_| CsrfError::InvalidToken)?;
        let mac = URL_SAFE_NO_PAD
            .decode(mac_b64)
            .map_err(|_| CsrfError::InvalidToken)?;

        let expected = hmac_sha256(secret.as_bytes(), &salt);
        if bool::from(expected.as_slice().ct_eq(mac.as_slice())) {
            Ok(())
        } else {
            Err(CsrfError::InvalidToken)
        }
    }
}

fn hmac_sha256(key: &[u8], message: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(message);
    mac.finalize().into_bytes().to_vec()
}

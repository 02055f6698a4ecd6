//! Session tokens for logged-in users
//!
//! A successful login produces a signed JWT holding the identity id and
//! username. The token lives in a cookie; on every request it is
//! verified with the persisted secret and the user controller is asked
//! whether the identity is still valid.

use std::time::{SystemTime, UNIX_EPOCH};

use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::users::Identity;

/// Claims embedded in a session token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Subject (identity id)
    pub sub: String,
    /// Username at login time
    pub name: String,
    /// Expiration time (Unix timestamp)
    pub exp: u64,
    /// Issued at (Unix timestamp)
    pub iat: u64,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Token encoding failed: {0}")]
    EncodingError(#[from] jsonwebtoken::errors::Error),

    #[error("Token has expired")]
    TokenExpired,

    #[error("Identity is not authenticated")]
    NotAuthenticated,
}

/// Signs and verifies session tokens
pub struct SessionKeys {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    ttl: u64, // seconds
}

impl SessionKeys {
    /// # Arguments
    /// * `secret` - HMAC secret, normally the persisted session secret
    /// * `ttl` - Session lifetime in seconds
    pub fn new(secret: &[u8], ttl: u64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            ttl,
        }
    }

    /// Issue a token for an authenticated identity
    pub fn issue(&self, identity: &Identity) -> Result<String, AuthError> {
        if !identity.is_authenticated() {
            return Err(AuthError::NotAuthenticated);
        }

        let now = now();
        let claims = SessionClaims {
            sub: identity.id().to_string(),
            name: identity.username().to_string(),
            exp: now + self.ttl,
            iat: now,
        };
        Ok(encode(&Header::default(), &claims, &self.encoding_key)?)
    }

    /// Verify a token and return its claims
    pub fn verify(&self, token: &str) -> Result<SessionClaims, AuthError> {
        let mut validation = Validation::default();
        validation.leeway = 0;
        let data = decode::<SessionClaims>(token, &self.decoding_key, &validation)?;

        if data.claims.exp < now() {
            return Err(AuthError::TokenExpired);
        }
        Ok(data.claims)
    }

    pub fn ttl(&self) -> u64 {
        self.ttl
    }
}

fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secret::generate_secret;

    fn admin() -> Identity {
        Identity::new("admin", "admin", true, true)
    }

    #[test]
    fn test_issue_and_verify() {
        let keys = SessionKeys::new(&generate_secret(), 60);
        let token = keys.issue(&admin()).unwrap();

        let claims = keys.verify(&token).unwrap();
        assert_eq!(claims.sub, "admin");
        assert_eq!(claims.name, "admin");
        assert_eq!(claims.exp, claims.iat + 60);
    }

    #[test]
    fn test_other_secret_rejects() {
        let keys = SessionKeys::new(&generate_secret(), 60);
        let other = SessionKeys::new(&generate_secret(), 60);
        let token = keys.issue(&admin()).unwrap();
        assert!(matches!(other.verify(&token), Err(AuthError::EncodingError(_))));
    }

    #[test]
    fn test_unauthenticated_identity_gets_no_token() {
        let keys = SessionKeys::new(&generate_secret(), 60);
        let guest = Identity::new("bob", "bob", false, false);
        assert!(matches!(keys.issue(&guest), Err(AuthError::NotAuthenticated)));
    }

    #[test]
    fn test_garbage_token() {
        let keys = SessionKeys::new(&generate_secret(), 60);
        assert!(keys.verify("not.a.token").is_err());
    }
}

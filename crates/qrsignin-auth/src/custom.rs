//! Custom sign-in tokens handed to authenticated web clients
//!
//! A custom token is `<claims>.<signature>`, both parts URL-safe base64. The
//! signature is SHA-256 over the service secret followed by the encoded
//! claims.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// How long a custom token can be exchanged for a session, in seconds
pub const CUSTOM_TOKEN_TTL_SECONDS: i64 = 3600;

/// Claims carried by a custom token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomTokenClaims {
    /// User the web session signs in as
    pub uid: String,
    pub iat: i64,
    pub exp: i64,
    pub jti: Uuid,
}

/// Mints and verifies custom tokens with a service secret
#[derive(Clone)]
pub struct CustomTokenIssuer {
    secret: [u8; 32],
}

impl std::fmt::Debug for CustomTokenIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CustomTokenIssuer").finish_non_exhaustive()
    }
}

impl Default for CustomTokenIssuer {
    fn default() -> Self {
        Self::new()
    }
}

impl CustomTokenIssuer {
    /// Create an issuer with a fresh random secret
    pub fn new() -> Self {
        Self {
            secret: rand::thread_rng().gen(),
        }
    }

    pub fn with_secret(secret: [u8; 32]) -> Self {
        Self { secret }
    }

    /// Mint a custom token for `uid`
    pub fn mint(&self, uid: &str) -> Result<String, serde_json::Error> {
        let now = Utc::now().timestamp();
        let claims = CustomTokenClaims {
            uid: uid.to_string(),
            iat: now,
            exp: now + CUSTOM_TOKEN_TTL_SECONDS,
            jti: Uuid::new_v4(),
        };
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims)?);
        let signature = self.sign(&payload);
        Ok(format!("{}.{}", payload, signature))
    }

    /// Check the signature and expiry of a custom token
    pub fn verify(&self, token: &str) -> Option<CustomTokenClaims> {
        let (payload, signature) = token.split_once('.')?;
        if self.sign(payload) != signature {
            return None;
        }

        let bytes = URL_SAFE_NO_PAD.decode(payload).ok()?;
        let claims: CustomTokenClaims = serde_json::from_slice(&bytes).ok()?;
        if claims.exp <= Utc::now().timestamp() {
            return None;
        }
        Some(claims)
    }

    fn sign(&self, payload: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.secret);
        hasher.update(payload.as_bytes());
        URL_SAFE_NO_PAD.encode(hasher.finalize())
    }
}

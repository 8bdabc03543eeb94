//! QR code tokens and their stored state

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::RngCore;
use serde::{Deserialize, Serialize};

/// Number of random bytes behind a token
const TOKEN_BYTES: usize = 96;

/// Length of an encoded token
pub const QR_TOKEN_LEN: usize = 128;

/// Shortest string accepted as a token by the authentication call
pub const MIN_TOKEN_LEN: usize = 100;

/// State kept for one issued QR code token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QrTokenRecord {
    /// Issue time, milliseconds since the Unix epoch
    pub ts: i64,
    /// Address of the client the token was issued to
    pub ip: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub used: bool,
    /// Custom sign-in token, set once authenticated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ct: Option<String>,
}

impl QrTokenRecord {
    pub fn new(ts: i64, ip: impl Into<String>) -> Self {
        Self {
            ts,
            ip: ip.into(),
            used: false,
            ct: None,
        }
    }

    /// Whether the token can still be authenticated at `now`
    pub fn is_valid_at(&self, now: i64, expiration_ms: i64) -> bool {
        !self.used && self.ts + expiration_ms > now
    }

    /// Whether a cleanup run at `now` should drop the token.
    ///
    /// Used tokens are kept for twice the expiration so the web client has
    /// time to pick up its custom token.
    pub fn is_stale_at(&self, now: i64, expiration_ms: i64) -> bool {
        let lifetime = if self.used {
            expiration_ms * 2
        } else {
            expiration_ms
        };
        self.ts + lifetime <= now
    }
}

/// Generate a new random QR code token.
///
/// Standard base64 with `/` swapped for `-` so the token can be used as a
/// path segment.
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    BASE64.encode(bytes).replace('/', "-")
}

/// Whether `value` has the exact shape of an issued token
pub fn is_token_shaped(value: &str) -> bool {
    value.len() == QR_TOKEN_LEN
}

//! QR code token lifecycle
//!
//! Tokens are issued to web clients, authenticated once by a signed-in
//! device, cancelled by the web client when it no longer needs them and swept
//! by cleanup runs once expired.

use crate::custom::CustomTokenIssuer;
use crate::qr::{render_png, PngDataUrl, QrImageOptions};
use crate::storage::{StorageError, TokenStorage};
use crate::token::{generate_token, is_token_shaped, QrTokenRecord, MIN_TOKEN_LEN};
use chrono::Utc;
use qrsignin_core::protocol::{CallableError, CallableStatus, QrCodeResponse};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Token service errors, worded as shown to callers
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("Missing or invalid authentication.")]
    Unauthenticated,
    #[error("Missing or malformed QR code token.")]
    MalformedToken,
    #[error("Invalid or expired QR code token.")]
    InvalidToken,
    #[error("Invalid QR code token.")]
    UnknownToken,
    /// Details are logged, never returned
    #[error("Internal error.")]
    Internal(String),
}

impl From<StorageError> for TokenError {
    fn from(err: StorageError) -> Self {
        TokenError::Internal(err.to_string())
    }
}

impl TokenError {
    pub fn status(&self) -> CallableStatus {
        match self {
            TokenError::Unauthenticated => CallableStatus::Unauthenticated,
            TokenError::MalformedToken | TokenError::InvalidToken | TokenError::UnknownToken => {
                CallableStatus::InvalidArgument
            }
            TokenError::Internal(_) => CallableStatus::Internal,
        }
    }

    pub fn to_callable(&self) -> CallableError {
        CallableError::new(self.status(), self.to_string())
    }
}

/// Result type for token operations
pub type TokenResult<T> = Result<T, TokenError>;

/// Token service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenServiceConfig {
    /// How long an issued token can be authenticated, in milliseconds
    pub expiration_ms: i64,
    /// Prepended to the token in the QR code
    pub qr_prefix: String,
    pub image: QrImageOptions,
    /// Token file; the user config directory when unset
    pub storage_path: Option<PathBuf>,
    /// Seconds between periodic cleanup runs
    pub cleanup_interval_secs: u64,
}

impl Default for TokenServiceConfig {
    fn default() -> Self {
        Self {
            expiration_ms: 10_000,
            qr_prefix: String::new(),
            image: QrImageOptions::default(),
            storage_path: None,
            cleanup_interval_secs: 60,
        }
    }
}

impl TokenServiceConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder pattern: set QR code prefix
    pub fn with_qr_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.qr_prefix = prefix.into();
        self
    }

    /// Builder pattern: set token expiration
    pub fn with_expiration(mut self, expiration: Duration) -> Self {
        self.expiration_ms = expiration.as_millis() as i64;
        self
    }

    /// Builder pattern: set storage path
    pub fn with_storage_path(mut self, path: PathBuf) -> Self {
        self.storage_path = Some(path);
        self
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs.max(1))
    }
}

/// A freshly issued token and its QR code
#[derive(Debug, Clone)]
pub struct IssuedQrCode {
    pub token: String,
    /// PNG image of the QR code
    pub png: Vec<u8>,
}

impl IssuedQrCode {
    pub fn data_url(&self) -> String {
        PngDataUrl(&self.png).to_string()
    }

    pub fn to_response(&self) -> QrCodeResponse {
        QrCodeResponse {
            qr: self.data_url(),
            token: self.token.clone(),
        }
    }
}

/// Issues and authenticates QR code tokens
pub struct QrTokenService {
    storage: Arc<TokenStorage>,
    issuer: CustomTokenIssuer,
    config: TokenServiceConfig,
    /// Serializes the check-and-mark of authentication
    auth_lock: Mutex<()>,
}

impl QrTokenService {
    pub fn new(storage: Arc<TokenStorage>, config: TokenServiceConfig) -> Self {
        Self::with_issuer(storage, config, CustomTokenIssuer::new())
    }

    pub fn with_issuer(
        storage: Arc<TokenStorage>,
        config: TokenServiceConfig,
        issuer: CustomTokenIssuer,
    ) -> Self {
        Self {
            storage,
            issuer,
            config,
            auth_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &TokenServiceConfig {
        &self.config
    }

    /// Issuer of the custom tokens handed to web clients
    pub fn issuer(&self) -> &CustomTokenIssuer {
        &self.issuer
    }

    /// Issue a new token to the client at `ip`.
    ///
    /// `prev` is the client's previous token, dropped when it has the shape
    /// of an issued token.
    pub async fn issue(&self, ip: &str, prev: Option<&str>) -> TokenResult<IssuedQrCode> {
        let token = generate_token();
        self.storage
            .insert(&token, QrTokenRecord::new(now_ms(), ip))
            .await
            .map_err(|e| {
                error!("Failed to store QR code token: {}", e);
                TokenError::from(e)
            })?;

        if let Some(prev) = prev.filter(|p| is_token_shaped(p)) {
            if let Err(e) = self.storage.remove(prev).await {
                warn!("Failed to remove previous QR code token: {}", e);
            }
        }

        let data = format!("{}{}", self.config.qr_prefix, token);
        let png = render_png(&data, self.config.image).map_err(|e| {
            error!("Failed to generate QR code: {}", e);
            TokenError::Internal(e)
        })?;

        debug!("Issued QR code token to {}", ip);
        Ok(IssuedQrCode { token, png })
    }

    /// Authenticate the web session behind `token` as the user `uid`
    pub async fn authenticate(&self, uid: Option<&str>, token: &str) -> TokenResult<()> {
        let uid = uid.ok_or(TokenError::Unauthenticated)?;

        let token = token
            .strip_prefix(self.config.qr_prefix.as_str())
            .unwrap_or(token);
        if token.len() < MIN_TOKEN_LEN {
            return Err(TokenError::MalformedToken);
        }

        let _guard = self.auth_lock.lock().await;

        let valid = self
            .storage
            .get(token)
            .await
            .map(|record| record.is_valid_at(now_ms(), self.config.expiration_ms))
            .unwrap_or(false);
        if !valid {
            info!("Called with invalid or expired token");
            return Err(TokenError::InvalidToken);
        }

        let stored = match self.issuer.mint(uid) {
            Ok(ct) => self.storage.mark_used(token, ct).await.map_err(TokenError::from),
            Err(e) => {
                error!("Failed to generate custom token: {}", e);
                Err(TokenError::Internal(e.to_string()))
            }
        };

        if let Err(e) = stored {
            error!("Failed to complete QR code authentication: {}", e);
            if let Err(e) = self.storage.remove(token).await {
                warn!("Failed to remove QR code token: {}", e);
            }
            return Err(e);
        }

        info!("QR code token authenticated for {}", uid);
        Ok(())
    }

    /// Drop a token the web client no longer needs, used or not
    pub async fn cancel(&self, token: &str) -> TokenResult<()> {
        match self.storage.remove(token).await? {
            Some(_) => {
                debug!("Cancelled QR code token");
                Ok(())
            }
            None => Err(TokenError::UnknownToken),
        }
    }

    /// Custom token of an authenticated token, if any yet
    pub async fn custom_token(&self, token: &str) -> Option<String> {
        self.storage.get(token).await.and_then(|record| record.ct)
    }

    /// Whether `token` is still stored
    pub async fn contains(&self, token: &str) -> bool {
        self.storage.get(token).await.is_some()
    }

    /// Remove expired tokens, returning how many were removed
    pub async fn cleanup(&self) -> TokenResult<usize> {
        self.cleanup_at(now_ms()).await
    }

    async fn cleanup_at(&self, now: i64) -> TokenResult<usize> {
        let expiration = self.config.expiration_ms;
        let removed = self
            .storage
            .remove_where(|record| record.is_stale_at(now, expiration))
            .await?;
        if removed > 0 {
            info!("Cleaned up {} QR code tokens", removed);
        }
        Ok(removed)
    }

    /// Run cleanup periodically until the returned task is aborted
    pub fn spawn_cleanup(self: &Arc<Self>) -> JoinHandle<()> {
        let service = Arc::clone(self);
        let period = self.config.cleanup_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                if let Err(e) = service.cleanup().await {
                    warn!("QR code token cleanup failed: {}", e);
                }
            }
        })
    }

    #[cfg(test)]
    pub(crate) fn storage(&self) -> &TokenStorage {
        &self.storage
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

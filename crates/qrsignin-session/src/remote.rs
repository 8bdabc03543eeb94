//! Remote authentication of scanned tokens
//!
//! A scanned token is sent once to the `authenticateQRCode` callable function.
//! The call is bounded by the configured timeout and never retried; the user
//! re-scans to try again.

use crate::error::RemoteCallError;
use crate::haptics::Haptics;
use async_trait::async_trait;
use qrsignin_core::protocol::{AuthenticateRequest, CallableRequest, CallableResponse};
use qrsignin_core::AuthConfig;
use qrsignin_scanner::RequestId;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// A remotely hosted function taking and returning JSON
#[async_trait]
pub trait RemoteFunction: Send + Sync {
    async fn call(
        &self,
        name: &str,
        data: Value,
        id_token: Option<&str>,
    ) -> Result<Value, RemoteCallError>;
}

/// Client for callable functions served over HTTPS
#[derive(Debug, Clone)]
pub struct HttpsCallable {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl HttpsCallable {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, RemoteCallError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteCallError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            timeout,
        })
    }

    pub fn from_config(config: &AuthConfig) -> Result<Self, RemoteCallError> {
        Self::new(config.endpoint.clone(), config.timeout())
    }

    fn url(&self, name: &str) -> String {
        format!("{}/{}", self.endpoint.trim_end_matches('/'), name)
    }
}

#[async_trait]
impl RemoteFunction for HttpsCallable {
    async fn call(
        &self,
        name: &str,
        data: Value,
        id_token: Option<&str>,
    ) -> Result<Value, RemoteCallError> {
        let url = self.url(name);
        debug!("POST {}", url);

        let mut request = self.client.post(&url).json(&CallableRequest { data });
        if let Some(token) = id_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| RemoteCallError::from_reqwest(e, self.timeout))?;
        let status = response.status();
        let body = response
            .json::<CallableResponse>()
            .await
            .map_err(|e| RemoteCallError::InvalidResponse(format!("HTTP {}: {}", status, e)))?;

        match body {
            CallableResponse::Result { result } => Ok(result),
            CallableResponse::Error { error } => Err(RemoteCallError::Function {
                status: error.status,
                message: error.message,
            }),
        }
    }
}

/// One authentication attempt for one scanned token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthRequest {
    pub request_id: RequestId,
    pub token: String,
}

/// Terminal result of an [`AuthRequest`]
#[derive(Debug, Clone)]
pub enum AuthOutcome {
    Authenticated { request_id: RequestId, result: String },
    Failed { request_id: RequestId, error: RemoteCallError },
}

impl AuthOutcome {
    pub fn request_id(&self) -> RequestId {
        match self {
            AuthOutcome::Authenticated { request_id, .. } | AuthOutcome::Failed { request_id, .. } => {
                *request_id
            }
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, AuthOutcome::Authenticated { .. })
    }
}

/// Forwards scanned tokens to the remote authentication function
#[derive(Clone)]
pub struct RemoteAuthenticator {
    remote: Arc<dyn RemoteFunction>,
    haptics: Arc<dyn Haptics>,
    config: AuthConfig,
}

impl RemoteAuthenticator {
    pub fn new(remote: Arc<dyn RemoteFunction>, haptics: Arc<dyn Haptics>, config: AuthConfig) -> Self {
        Self {
            remote,
            haptics,
            config,
        }
    }

    /// Authenticate the web session behind a scanned token.
    ///
    /// Pulses the vibrator before the call goes out. Resolves exactly once.
    pub async fn authenticate(&self, request: AuthRequest, id_token: Option<&str>) -> AuthOutcome {
        self.haptics.vibrate(self.config.haptic_duration());

        let data = match serde_json::to_value(AuthenticateRequest {
            token: request.token,
        }) {
            Ok(data) => data,
            Err(e) => {
                return AuthOutcome::Failed {
                    request_id: request.request_id,
                    error: RemoteCallError::InvalidResponse(e.to_string()),
                }
            }
        };

        let timeout = self.config.timeout();
        let call = self.remote.call(&self.config.function_name, data, id_token);
        let result = match tokio::time::timeout(timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(RemoteCallError::Timeout(timeout)),
        };

        match result {
            Ok(value) => {
                let result = match value {
                    Value::String(s) => s,
                    Value::Null => String::new(),
                    other => other.to_string(),
                };
                info!("Web client authenticated correctly: {}", result);
                AuthOutcome::Authenticated {
                    request_id: request.request_id,
                    result,
                }
            }
            Err(error) => {
                warn!("Failed to authenticate web client: {}", error);
                AuthOutcome::Failed {
                    request_id: request.request_id,
                    error,
                }
            }
        }
    }
}

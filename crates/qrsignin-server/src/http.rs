//! HTTP request handlers
//!
//! Errors are answered with the callable error body
//! `{"error": {"status": ..., "message": ...}}` on every endpoint.

use axum::{
    extract::{ConnectInfo, Path as AxumPath, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use qrsignin_auth::TokenError;
use qrsignin_core::protocol::{
    CallableError, CallableResponse, CallableStatus, CleanupResponse, CustomTokenResponse,
};
use serde::Deserialize;
use serde_json::Value;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::{debug, info};

use crate::state::AppState;

/// Create the main application router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/getQRCode", get(get_qr_code_handler).fallback(only_get))
        .route(
            "/authenticateQRCode",
            post(authenticate_handler).fallback(only_post),
        )
        .route("/cancelQRToken", post(cancel_handler).fallback(only_post))
        .route("/cleanupQRTokens", get(cleanup_handler).post(cleanup_handler))
        .route("/qrTokens/:token/ct", get(custom_token_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve the token service on `listener` until `shutdown` resolves
pub async fn serve<F>(listener: TcpListener, state: Arc<AppState>, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!("Token service listening on http://{}", addr);
    }

    let router = create_router(state);
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
}

fn callable_error(error: CallableError) -> Response {
    let status = StatusCode::from_u16(error.status.http_status())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(CallableResponse::Error { error })).into_response()
}

fn token_error(err: TokenError) -> Response {
    callable_error(err.to_callable())
}

async fn only_get() -> Response {
    callable_error(CallableError::new(
        CallableStatus::FailedPrecondition,
        "Invalid method, only GET requests are allowed.",
    ))
}

async fn only_post() -> Response {
    callable_error(CallableError::new(
        CallableStatus::FailedPrecondition,
        "Invalid method, only POST requests are allowed.",
    ))
}

// ============================================================================
// Web client endpoints
// ============================================================================

/// Query parameters for QR code issuing
#[derive(Debug, Deserialize)]
pub struct QrCodeQuery {
    /// Token the client was previously issued
    prev: Option<String>,
    /// `image` to get the raw PNG instead of JSON
    format: Option<String>,
}

/// Issue a new QR code token
async fn get_qr_code_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<QrCodeQuery>,
    client: Option<ConnectInfo<SocketAddr>>,
) -> Response {
    let ip = client
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let issued = match state.service.issue(&ip, query.prev.as_deref()).await {
        Ok(issued) => issued,
        Err(e) => return token_error(e),
    };

    if query.format.as_deref() == Some("image") {
        (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "image/png")],
            issued.png,
        )
            .into_response()
    } else {
        Json(issued.to_response()).into_response()
    }
}

/// Drop a token the web client no longer displays
async fn cancel_handler(State(state): State<Arc<AppState>>, Json(body): Json<Value>) -> Response {
    let token = body.get("token").and_then(Value::as_str).unwrap_or_default();
    match state.service.cancel(token).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => {
            debug!("Cancel called with invalid token");
            token_error(e)
        }
    }
}

/// Custom token of an authenticated QR code token
async fn custom_token_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(token): AxumPath<String>,
) -> Response {
    if !state.service.contains(&token).await {
        return callable_error(CallableError::new(
            CallableStatus::NotFound,
            "QR code token not found.",
        ));
    }

    let ct = state.service.custom_token(&token).await;
    Json(CustomTokenResponse { ct }).into_response()
}

/// Remove expired tokens now
async fn cleanup_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.service.cleanup().await {
        Ok(removed) => Json(CleanupResponse { removed }).into_response(),
        Err(e) => token_error(e),
    }
}

// ============================================================================
// Callable functions
// ============================================================================

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

/// Authenticate a web session on behalf of the calling device
///
/// Body is `{"data": {"token": ...}}`.
async fn authenticate_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let uid = state.verifier.verify(bearer_token(&headers)).await;
    let token = body
        .get("data")
        .and_then(|data| data.get("token"))
        .and_then(Value::as_str)
        .unwrap_or_default();

    match state.service.authenticate(uid.as_deref(), token).await {
        Ok(()) => Json(CallableResponse::Result {
            result: Value::Null,
        })
        .into_response(),
        Err(e) => token_error(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{DevIdentity, IdentityVerifier, StaticTokens, DEV_UID};
    use qrsignin_auth::{QrTokenService, TokenServiceConfig, TokenStorage};
    use qrsignin_core::protocol::QrCodeResponse;
    use qrsignin_core::AuthConfig;
    use qrsignin_scanner::RequestId;
    use qrsignin_session::{AuthOutcome, AuthRequest, HttpsCallable, LogHaptics, RemoteAuthenticator};
    use serde_json::json;
    use tempfile::{tempdir, TempDir};

    struct TestServer {
        url: String,
        service: Arc<QrTokenService>,
        client: reqwest::Client,
        _dir: TempDir,
    }

    async fn start(verifier: Arc<dyn IdentityVerifier>) -> TestServer {
        let dir = tempdir().unwrap();
        let storage = Arc::new(
            TokenStorage::with_path(dir.path().join("tokens.json"))
                .await
                .unwrap(),
        );
        let service = Arc::new(QrTokenService::new(storage, TokenServiceConfig::default()));
        let state = Arc::new(AppState::new(service.clone(), verifier));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(serve(listener, state, std::future::pending()));

        TestServer {
            url,
            service,
            client: reqwest::Client::new(),
            _dir: dir,
        }
    }

    impl TestServer {
        async fn issue(&self) -> QrCodeResponse {
            self.client
                .get(format!("{}/getQRCode", self.url))
                .send()
                .await
                .unwrap()
                .json()
                .await
                .unwrap()
        }

        async fn authenticate(&self, bearer: Option<&str>, data: Value) -> reqwest::Response {
            let mut request = self
                .client
                .post(format!("{}/authenticateQRCode", self.url))
                .json(&json!({ "data": data }));
            if let Some(bearer) = bearer {
                request = request.bearer_auth(bearer);
            }
            request.send().await.unwrap()
        }
    }

    #[tokio::test]
    async fn test_get_qr_code() {
        let server = start(Arc::new(DevIdentity)).await;

        let first = server.issue().await;
        assert_eq!(first.token.len(), 128);
        assert!(first.qr.starts_with("data:image/png;base64,"));
        assert!(server.service.contains(&first.token).await);

        let response = server
            .client
            .get(format!("{}/getQRCode", server.url))
            .query(&[("prev", first.token.as_str()), ("format", "image")])
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(response.headers()["content-type"], "image/png");
        let png = response.bytes().await.unwrap();
        assert_eq!(&png[1..4], b"PNG");
        assert!(!server.service.contains(&first.token).await);
    }

    #[tokio::test]
    async fn test_wrong_method_rejected() {
        let server = start(Arc::new(DevIdentity)).await;

        let response = server
            .client
            .post(format!("{}/getQRCode", server.url))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 400);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["error"]["status"], "FAILED_PRECONDITION");
        assert_eq!(
            body["error"]["message"],
            "Invalid method, only GET requests are allowed."
        );

        let response = server
            .client
            .get(format!("{}/cancelQRToken", server.url))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 400);
    }

    #[tokio::test]
    async fn test_authenticate_and_poll_custom_token() {
        let server = start(Arc::new(StaticTokens::default().with_user("id-token", "uid-1"))).await;
        let issued = server.issue().await;

        let ct_url = format!("{}/qrTokens/{}/ct", server.url, issued.token);
        let pending: Value = server.client.get(&ct_url).send().await.unwrap().json().await.unwrap();
        assert_eq!(pending, json!({}));

        let response = server
            .authenticate(Some("id-token"), json!({ "token": issued.token }))
            .await;
        assert_eq!(response.status(), 200);
        assert_eq!(response.json::<Value>().await.unwrap(), json!({ "result": null }));

        let done: CustomTokenResponse =
            server.client.get(&ct_url).send().await.unwrap().json().await.unwrap();
        let ct = done.ct.unwrap();
        assert_eq!(server.service.issuer().verify(&ct).unwrap().uid, "uid-1");
    }

    #[tokio::test]
    async fn test_authenticate_errors() {
        let server = start(Arc::new(StaticTokens::default().with_user("id-token", "uid-1"))).await;
        let issued = server.issue().await;

        let response = server
            .authenticate(Some("stranger"), json!({ "token": issued.token }))
            .await;
        assert_eq!(response.status(), 401);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["error"]["status"], "UNAUTHENTICATED");

        let response = server.authenticate(Some("id-token"), json!({ "token": 42 })).await;
        assert_eq!(response.status(), 400);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["error"]["message"], "Missing or malformed QR code token.");

        let response = server
            .authenticate(Some("id-token"), json!({ "token": "x".repeat(128) }))
            .await;
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["error"]["message"], "Invalid or expired QR code token.");
    }

    #[tokio::test]
    async fn test_cancel_and_cleanup() {
        let server = start(Arc::new(DevIdentity)).await;
        let issued = server.issue().await;

        let cancel = |token: String| {
            server
                .client
                .post(format!("{}/cancelQRToken", server.url))
                .json(&json!({ "token": token }))
                .send()
        };
        assert_eq!(cancel(issued.token.clone()).await.unwrap().status(), 200);
        let response = cancel(issued.token.clone()).await.unwrap();
        assert_eq!(response.status(), 400);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["error"]["message"], "Invalid QR code token.");

        let response = server
            .client
            .get(format!("{}/qrTokens/{}/ct", server.url, issued.token))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 404);

        let cleanup: CleanupResponse = server
            .client
            .post(format!("{}/cleanupQRTokens", server.url))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(cleanup.removed, 0);
    }

    #[tokio::test]
    async fn test_remote_authenticator_against_service() {
        let server = start(Arc::new(DevIdentity)).await;
        let issued = server.issue().await;

        let config = AuthConfig::default().with_endpoint(server.url.clone());
        let callable = HttpsCallable::from_config(&config).unwrap();
        let authenticator =
            RemoteAuthenticator::new(Arc::new(callable), Arc::new(LogHaptics), config);

        let outcome = authenticator
            .authenticate(
                AuthRequest {
                    request_id: RequestId(9002),
                    token: issued.token.clone(),
                },
                Some("any"),
            )
            .await;
        assert!(outcome.is_success());

        let ct = server.service.custom_token(&issued.token).await.unwrap();
        assert_eq!(server.service.issuer().verify(&ct).unwrap().uid, DEV_UID);

        // Second scan of the same code is refused
        let outcome = authenticator
            .authenticate(
                AuthRequest {
                    request_id: RequestId(9003),
                    token: issued.token,
                },
                Some("any"),
            )
            .await;
        assert!(matches!(outcome, AuthOutcome::Failed { .. }));
    }
}

//! QR Sign-In - Sign a web session in from an already signed-in device
//!
//! `serve` runs the QR code token service web clients sign in through.
//! `scan` runs a headless scanning device: it reads QR codes from an image
//! directory standing in for the camera and authenticates the scanned token.

use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use qrsignin_auth::{QrTokenService, TokenServiceConfig, TokenStorage};
use qrsignin_capture::ImageDirectoryProvider;
use qrsignin_core::{AuthConfig, ScannerConfig, TieBreak};
use qrsignin_scanner::{AcceptAll, PrefixLengthPolicy, QrDetector, ScreenLauncher, ValidationPolicy};
use qrsignin_server::{AppState, DevIdentity, IdentityVerifier, StaticTokens};
use qrsignin_session::{
    create_bridge, HttpsCallable, LogHaptics, Notice, RemoteAuthenticator, SessionController,
    SignedInUser, StaticIdentity, UiCommand,
};
use serde::Deserialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn, Level};
use tracing_subscriber::EnvFilter;

/// QR Sign-In - scan a QR code to sign a web session in
#[derive(Parser, Debug)]
#[command(name = "qrsignin")]
#[command(version, about, long_about = None)]
struct Args {
    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the QR code token service
    Serve(ServeArgs),
    /// Scan a QR code and authenticate its web session
    Scan(ScanArgs),
}

#[derive(ClapArgs, Debug)]
struct ServeArgs {
    /// Server port
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Address to bind
    #[arg(long, default_value = "0.0.0.0")]
    bind: String,

    /// Development mode: every authentication call is accepted as a fixed user
    #[arg(long)]
    dev: bool,

    /// Token file (default: ~/.config/qrsignin/qr_tokens.json)
    #[arg(long)]
    storage: Option<PathBuf>,

    /// Prefix encoded in front of the token
    #[arg(long)]
    qr_prefix: Option<String>,

    /// Accepted ID token, as TOKEN=UID (repeatable)
    #[arg(long = "id-token", value_parser = parse_id_token)]
    id_tokens: Vec<(String, String)>,
}

#[derive(ClapArgs, Debug)]
struct ScanArgs {
    /// Directory of png/jpeg images replayed as camera frames
    images: PathBuf,

    /// Base URL of the token service
    #[arg(short, long)]
    endpoint: Option<String>,

    /// User id the device is signed in as
    #[arg(long, default_value = "scanner")]
    uid: String,

    /// ID token presented with the authentication call
    #[arg(long, default_value = "")]
    id_token: String,

    /// Camera frame rate
    #[arg(short, long)]
    fps: Option<u32>,

    /// Payload picked when a frame holds several codes (first, last)
    #[arg(long)]
    tie_break: Option<TieBreak>,

    /// Only accept codes made of this prefix and a 128 character token
    #[arg(long)]
    require_prefix: Option<String>,

    /// Authentication call timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Replay the images until a code is found
    #[arg(long)]
    looping: bool,
}

/// Settings read from `--config`
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    scanner: ScannerConfig,
    auth: AuthConfig,
    service: TokenServiceConfig,
    /// ID tokens accepted by the service, mapped to user ids
    id_tokens: HashMap<String, String>,
}

impl FileConfig {
    fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config {}", path.display()))
    }
}

fn parse_id_token(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .filter(|(token, uid)| !token.is_empty() && !uid.is_empty())
        .map(|(token, uid)| (token.to_string(), uid.to_string()))
        .ok_or_else(|| format!("Invalid ID token: {}. Use: TOKEN=UID", s))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .with_env_filter(EnvFilter::from_default_env().add_directive(log_level.into()))
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();

    info!("QR Sign-In v{}", env!("CARGO_PKG_VERSION"));

    let file_config = FileConfig::load(args.config.as_deref())?;

    match args.command {
        Command::Serve(serve_args) => serve(serve_args, file_config).await,
        Command::Scan(scan_args) => scan(scan_args, file_config).await,
    }
}

async fn serve(args: ServeArgs, file_config: FileConfig) -> Result<()> {
    let mut config = file_config.service;
    if let Some(prefix) = args.qr_prefix {
        config = config.with_qr_prefix(prefix);
    }
    if let Some(path) = args.storage {
        config = config.with_storage_path(path);
    }

    info!("Initializing token storage...");
    let storage = match &config.storage_path {
        Some(path) => TokenStorage::with_path(path.clone()).await,
        None => TokenStorage::new().await,
    }
    .map_err(|e| anyhow::anyhow!("Failed to initialize token storage: {}", e))?;
    info!("Token storage: {:?}", storage.path());

    let service = Arc::new(QrTokenService::new(Arc::new(storage), config));
    let cleanup_handle = service.spawn_cleanup();

    let verifier: Arc<dyn IdentityVerifier> = if args.dev {
        warn!("Development mode: authentication calls are not verified");
        Arc::new(DevIdentity)
    } else {
        let mut users = file_config.id_tokens;
        users.extend(args.id_tokens);
        info!("Authentication: {} accepted ID tokens", users.len());
        Arc::new(StaticTokens::new(users))
    };

    let state = Arc::new(AppState::new(service, verifier));
    let addr: SocketAddr = format!("{}:{}", args.bind, args.port)
        .parse()
        .context("Invalid bind address")?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    let shutdown = async {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutting down...");
    };
    qrsignin_server::serve(listener, state, shutdown).await?;

    cleanup_handle.abort();
    Ok(())
}

async fn scan(args: ScanArgs, file_config: FileConfig) -> Result<()> {
    let mut scanner_config = file_config.scanner;
    if let Some(fps) = args.fps {
        scanner_config = scanner_config.with_fps(fps);
    }
    if let Some(tie_break) = args.tie_break {
        scanner_config = scanner_config.with_tie_break(tie_break);
    }

    let mut auth_config = file_config.auth;
    if let Some(endpoint) = args.endpoint {
        auth_config = auth_config.with_endpoint(endpoint);
    }
    if let Some(timeout_ms) = args.timeout_ms {
        auth_config = auth_config.with_timeout(Duration::from_millis(timeout_ms));
    }

    let provider = ImageDirectoryProvider::new(&args.images)
        .with_fps(scanner_config.fps)
        .with_looping(args.looping);
    let policy: Arc<dyn ValidationPolicy> = match args.require_prefix {
        Some(prefix) => Arc::new(PrefixLengthPolicy::new(prefix, PrefixLengthPolicy::TOKEN_LEN)),
        None => Arc::new(AcceptAll),
    };
    let launcher = ScreenLauncher::new(
        scanner_config,
        Arc::new(provider),
        Arc::new(QrDetector::new()),
        policy,
    );

    let callable = HttpsCallable::from_config(&auth_config)
        .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;
    info!("Authenticating against {}", auth_config.function_url());
    let authenticator =
        RemoteAuthenticator::new(Arc::new(callable), Arc::new(LogHaptics), auth_config);

    let identity = StaticIdentity::new(SignedInUser {
        uid: args.uid,
        email: None,
        id_token: args.id_token,
    });

    let (mut ui, bridge) = create_bridge();
    let controller = SessionController::new(
        bridge,
        Arc::new(identity),
        Arc::new(launcher),
        authenticator,
    );
    let controller_handle = tokio::spawn(controller.run());

    ui.send(UiCommand::SignIn).await;
    ui.status
        .wait_for(|status| status.signed_in())
        .await
        .context("Session controller stopped")?;

    info!("Scanning images in {:?}", args.images);
    ui.send(UiCommand::Scan).await;

    let result = loop {
        tokio::select! {
            notice = ui.notices.recv() => match notice {
                Ok(notice) => {
                    if let Some(result) = scan_result(notice) {
                        break result;
                    }
                }
                Err(RecvError::Lagged(_)) => continue,
                Err(e) => break Err(anyhow::anyhow!("Session controller stopped: {}", e)),
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Scan cancelled");
                break Ok(());
            }
        }
    };

    ui.send(UiCommand::Shutdown).await;
    controller_handle.await.ok();
    result
}

/// How a notice ends the `scan` command, if it does
fn scan_result(notice: Notice) -> Option<Result<()>> {
    match notice {
        Notice::Authenticated { .. } => {
            println!("Web session authenticated");
            Some(Ok(()))
        }
        Notice::AuthenticationFailed { reason } => {
            Some(Err(anyhow::anyhow!("Authentication failed: {}", reason)))
        }
        Notice::ScanFailed { kind } => Some(Err(anyhow::anyhow!("Scan failed: {:?}", kind))),
        Notice::ScanCancelled => Some(Err(anyhow::anyhow!("Scan ended without a QR code"))),
        other => {
            warn!("{:?}", other);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qrsignin_core::ErrorKind;

    #[test]
    fn test_scan_ends_on_terminal_notices() {
        assert!(scan_result(Notice::Authenticated {
            result: String::new()
        })
        .unwrap()
        .is_ok());

        let err = scan_result(Notice::ScanCancelled).unwrap().unwrap_err();
        assert!(err.to_string().contains("without a QR code"));

        let err = scan_result(Notice::ScanFailed {
            kind: ErrorKind::ResourceUnavailable,
        })
        .unwrap()
        .unwrap_err();
        assert!(err.to_string().contains("ResourceUnavailable"));

        assert!(scan_result(Notice::AuthenticationFailed {
            reason: "expired".to_string()
        })
        .unwrap()
        .is_err());
    }

    #[test]
    fn test_scan_keeps_waiting_on_other_notices() {
        assert!(scan_result(Notice::ScanBusy).is_none());
        assert!(scan_result(Notice::NotSignedIn).is_none());
    }

    #[test]
    fn test_parse_id_token() {
        assert_eq!(
            parse_id_token("tok=uid").unwrap(),
            ("tok".to_string(), "uid".to_string())
        );
        assert!(parse_id_token("tok").is_err());
        assert!(parse_id_token("=uid").is_err());
    }
}

//! Session Controller
//!
//! Owns the sign-in state and the scan/authentication flow, and talks to the
//! UI via the bridge. Every state change happens on the controller's task in
//! response to an inbox message.

use crate::bridge::{ControllerBridge, Notice, SessionEvent, SessionStatus, UiCommand};
use crate::identity::{IdentityProvider, SignedInUser};
use crate::remote::{AuthOutcome, AuthRequest, RemoteAuthenticator};
use qrsignin_scanner::{RequestId, ScanCanceller, ScanLauncher, ScanOutcome};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// First request id handed to the scanner
const FIRST_SCAN_REQUEST: u32 = 9002;

struct ActiveScan {
    request_id: RequestId,
    canceller: ScanCanceller,
}

struct PendingAuth {
    request_id: RequestId,
    task: JoinHandle<()>,
}

pub struct SessionController {
    bridge: ControllerBridge,
    identity: Arc<dyn IdentityProvider>,
    launcher: Arc<dyn ScanLauncher>,
    authenticator: RemoteAuthenticator,
    user: Option<SignedInUser>,
    scan: Option<ActiveScan>,
    auth: Option<PendingAuth>,
    next_request: u32,
}

impl SessionController {
    pub fn new(
        bridge: ControllerBridge,
        identity: Arc<dyn IdentityProvider>,
        launcher: Arc<dyn ScanLauncher>,
        authenticator: RemoteAuthenticator,
    ) -> Self {
        Self {
            bridge,
            identity,
            launcher,
            authenticator,
            user: None,
            scan: None,
            auth: None,
            next_request: FIRST_SCAN_REQUEST,
        }
    }

    /// Run the controller until a shutdown command arrives
    pub async fn run(mut self) {
        info!("Session controller started");
        self.user = self.identity.current_user();
        self.publish();

        while let Some(event) = self.bridge.inbox_rx.recv().await {
            match event {
                SessionEvent::Command(UiCommand::SignIn) => self.sign_in(),
                SessionEvent::Command(UiCommand::SignOut) => self.sign_out(),
                SessionEvent::Command(UiCommand::Scan) => self.start_scan(),
                SessionEvent::Command(UiCommand::Shutdown) => {
                    info!("Shutdown requested");
                    break;
                }
                SessionEvent::SignInCompleted(result) => match result {
                    Ok(user) => {
                        info!("Signed in as {}", user.uid);
                        self.user = Some(user);
                    }
                    Err(e) => {
                        warn!("{}", e);
                        self.user = None;
                        self.notify(Notice::SignInFailed {
                            reason: e.to_string(),
                        });
                    }
                },
                SessionEvent::ScanCompleted(outcome) => self.scan_completed(outcome),
                SessionEvent::AuthCompleted(outcome) => self.auth_completed(outcome),
            }
            self.publish();
        }

        self.teardown();
        info!("Session controller stopped");
    }

    fn sign_in(&mut self) {
        if self.user.is_some() {
            return;
        }
        let identity = self.identity.clone();
        let inbox = self.bridge.inbox_tx.clone();
        tokio::spawn(async move {
            let result = identity.sign_in().await;
            let _ = inbox.send(SessionEvent::SignInCompleted(result)).await;
        });
    }

    fn sign_out(&mut self) {
        self.identity.sign_out();
        self.user = None;
        info!("Signed out");
    }

    fn start_scan(&mut self) {
        if self.user.is_none() {
            self.notify(Notice::NotSignedIn);
            return;
        }
        // One scan and one authentication at a time
        if self.scan.is_some() || self.auth.is_some() {
            debug!("Scan requested while busy");
            self.notify(Notice::ScanBusy);
            return;
        }

        let request_id = RequestId(self.next_request);
        self.next_request = self.next_request.wrapping_add(1);

        let handle = self.launcher.launch(request_id);
        self.scan = Some(ActiveScan {
            request_id,
            canceller: handle.canceller(),
        });
        info!("{} launched", request_id);

        let inbox = self.bridge.inbox_tx.clone();
        tokio::spawn(async move {
            let outcome = handle.outcome().await;
            let _ = inbox.send(SessionEvent::ScanCompleted(outcome)).await;
        });
    }

    fn scan_completed(&mut self, outcome: ScanOutcome) {
        match &self.scan {
            Some(scan) if scan.request_id == outcome.request_id() => {}
            _ => {
                debug!("Ignoring outcome of {}", outcome.request_id());
                return;
            }
        }
        self.scan = None;

        match outcome {
            ScanOutcome::Scanned { request_id, token } => {
                self.start_auth(AuthRequest { request_id, token });
            }
            ScanOutcome::Cancelled { request_id } => {
                info!("{} ended without a code", request_id);
                self.notify(Notice::ScanCancelled);
            }
            ScanOutcome::Failed { request_id, kind } => {
                warn!("{} failed: {:?}", request_id, kind);
                self.notify(Notice::ScanFailed { kind });
            }
        }
    }

    fn start_auth(&mut self, request: AuthRequest) {
        let request_id = request.request_id;
        let authenticator = self.authenticator.clone();
        let id_token = self.user.as_ref().map(|u| u.id_token.clone());
        let inbox = self.bridge.inbox_tx.clone();

        let task = tokio::spawn(async move {
            let outcome = authenticator.authenticate(request, id_token.as_deref()).await;
            let _ = inbox.send(SessionEvent::AuthCompleted(outcome)).await;
        });
        self.auth = Some(PendingAuth { request_id, task });
    }

    fn auth_completed(&mut self, outcome: AuthOutcome) {
        match &self.auth {
            Some(auth) if auth.request_id == outcome.request_id() => {}
            _ => {
                debug!("Ignoring authentication result of {}", outcome.request_id());
                return;
            }
        }
        self.auth = None;

        let notice = match outcome {
            AuthOutcome::Authenticated { result, .. } => Notice::Authenticated { result },
            AuthOutcome::Failed { error, .. } => Notice::AuthenticationFailed {
                reason: error.to_string(),
            },
        };
        self.notify(notice);
    }

    /// Cancel whatever is in flight; late completions go nowhere
    fn teardown(&mut self) {
        if let Some(scan) = self.scan.take() {
            debug!("Cancelling {}", scan.request_id);
            scan.canceller.cancel();
        }
        if let Some(auth) = self.auth.take() {
            debug!("Abandoning authentication of {}", auth.request_id);
            auth.task.abort();
        }
        self.publish();
    }

    fn publish(&self) {
        let status = SessionStatus {
            user: self.user.clone(),
            scanning: self.scan.is_some(),
            authenticating: self.auth.is_some(),
        };
        self.bridge.status_tx.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            *current = status;
            true
        });
    }

    fn notify(&self, notice: Notice) {
        if self.bridge.notice_tx.send(notice).is_err() {
            debug!("No receivers for notice");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{create_bridge, SessionUi};
    use crate::identity::StaticIdentity;
    use crate::remote::tests::{CountingHaptics, FakeRemote};
    use qrsignin_core::{AuthConfig, ErrorKind};
    use qrsignin_scanner::ScreenHandle;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::{broadcast, oneshot};

    /// Launcher that answers every scan with a scripted outcome
    #[derive(Default)]
    struct ScriptedLauncher {
        outcomes: Mutex<Vec<ScriptedScan>>,
        launched: Mutex<Vec<RequestId>>,
        cancelled: Arc<Mutex<Vec<RequestId>>>,
    }

    enum ScriptedScan {
        Token(&'static str),
        Fail(ErrorKind),
        /// Ends at once without a code
        Cancel,
        /// Stays open until cancelled
        Hang,
    }

    impl ScanLauncher for ScriptedLauncher {
        fn launch(&self, request_id: RequestId) -> ScreenHandle {
            self.launched.lock().unwrap().push(request_id);
            let (tx, rx) = oneshot::channel();
            let handle = ScreenHandle::new(request_id, rx);

            let script = {
                let mut outcomes = self.outcomes.lock().unwrap();
                if outcomes.is_empty() {
                    ScriptedScan::Hang
                } else {
                    outcomes.remove(0)
                }
            };
            match script {
                ScriptedScan::Token(token) => {
                    let _ = tx.send(ScanOutcome::Scanned {
                        request_id,
                        token: token.to_string(),
                    });
                }
                ScriptedScan::Fail(kind) => {
                    let _ = tx.send(ScanOutcome::Failed { request_id, kind });
                }
                ScriptedScan::Cancel => {
                    let _ = tx.send(ScanOutcome::Cancelled { request_id });
                }
                ScriptedScan::Hang => {
                    let canceller = handle.canceller();
                    let cancelled = self.cancelled.clone();
                    tokio::spawn(async move {
                        canceller.cancelled().await;
                        cancelled.lock().unwrap().push(request_id);
                        let _ = tx.send(ScanOutcome::Cancelled { request_id });
                    });
                }
            }
            handle
        }
    }

    fn account() -> SignedInUser {
        SignedInUser {
            uid: "u1".to_string(),
            email: None,
            id_token: "id-token".to_string(),
        }
    }

    fn start(
        launcher: Arc<ScriptedLauncher>,
        remote: Arc<FakeRemote>,
        signed_in: bool,
    ) -> (SessionUi, JoinHandle<()>) {
        let (ui, bridge) = create_bridge();
        let identity = StaticIdentity::new(account());
        let identity = if signed_in { identity.signed_in() } else { identity };
        let authenticator =
            RemoteAuthenticator::new(remote, Arc::new(CountingHaptics::default()), AuthConfig::default());
        let controller =
            SessionController::new(bridge, Arc::new(identity), launcher, authenticator);
        (ui, tokio::spawn(controller.run()))
    }

    async fn next_notice(notices: &mut broadcast::Receiver<Notice>) -> Notice {
        tokio::time::timeout(Duration::from_secs(2), notices.recv())
            .await
            .expect("no notice")
            .expect("notice channel closed")
    }

    #[tokio::test]
    async fn test_scan_authenticates_once() {
        let launcher = Arc::new(ScriptedLauncher::default());
        launcher.outcomes.lock().unwrap().push(ScriptedScan::Token("T1"));
        let remote = Arc::new(FakeRemote::ok("ok"));
        let (mut ui, controller) = start(launcher.clone(), remote.clone(), true);

        assert!(ui.send(UiCommand::Scan).await);
        assert_eq!(
            next_notice(&mut ui.notices).await,
            Notice::Authenticated {
                result: "ok".to_string()
            }
        );

        {
            let calls = remote.calls.lock().unwrap();
            assert_eq!(calls.len(), 1);
            assert_eq!(calls[0].1, serde_json::json!({"token": "T1"}));
            assert_eq!(calls[0].2.as_deref(), Some("id-token"));
        }
        assert_eq!(*launcher.launched.lock().unwrap(), vec![RequestId(9002)]);

        ui.send(UiCommand::Shutdown).await;
        controller.await.unwrap();
        assert_eq!(remote.call_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_call_is_not_retried() {
        let launcher = Arc::new(ScriptedLauncher::default());
        launcher.outcomes.lock().unwrap().push(ScriptedScan::Token("T1"));
        let remote = Arc::new(FakeRemote::failing("Invalid or expired QR code token."));
        let (mut ui, controller) = start(launcher, remote.clone(), true);

        ui.send(UiCommand::Scan).await;
        match next_notice(&mut ui.notices).await {
            Notice::AuthenticationFailed { reason } => {
                assert!(reason.contains("Invalid or expired QR code token."))
            }
            other => panic!("unexpected notice: {:?}", other),
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(remote.call_count(), 1);
        assert!(ui.status.borrow().can_scan());

        ui.send(UiCommand::Shutdown).await;
        controller.await.unwrap();
    }

    #[tokio::test]
    async fn test_resource_unavailable_is_reported() {
        let launcher = Arc::new(ScriptedLauncher::default());
        launcher
            .outcomes
            .lock()
            .unwrap()
            .push(ScriptedScan::Fail(ErrorKind::ResourceUnavailable));
        let remote = Arc::new(FakeRemote::ok("ok"));
        let (mut ui, controller) = start(launcher, remote.clone(), true);

        ui.send(UiCommand::Scan).await;
        assert_eq!(
            next_notice(&mut ui.notices).await,
            Notice::ScanFailed {
                kind: ErrorKind::ResourceUnavailable
            }
        );
        assert_eq!(remote.call_count(), 0);

        ui.send(UiCommand::Shutdown).await;
        controller.await.unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_scan_is_reported() {
        let launcher = Arc::new(ScriptedLauncher::default());
        launcher.outcomes.lock().unwrap().push(ScriptedScan::Cancel);
        let remote = Arc::new(FakeRemote::ok("ok"));
        let (mut ui, controller) = start(launcher, remote.clone(), true);

        ui.send(UiCommand::Scan).await;
        assert_eq!(next_notice(&mut ui.notices).await, Notice::ScanCancelled);
        ui.status.wait_for(|s| s.can_scan()).await.unwrap();
        assert_eq!(remote.call_count(), 0);

        ui.send(UiCommand::Shutdown).await;
        controller.await.unwrap();
    }

    #[tokio::test]
    async fn test_scan_requires_sign_in() {
        let launcher = Arc::new(ScriptedLauncher::default());
        let (mut ui, controller) = start(launcher.clone(), Arc::new(FakeRemote::ok("ok")), false);

        ui.send(UiCommand::Scan).await;
        assert_eq!(next_notice(&mut ui.notices).await, Notice::NotSignedIn);
        assert!(launcher.launched.lock().unwrap().is_empty());

        ui.send(UiCommand::SignIn).await;
        ui.status.wait_for(|s| s.signed_in()).await.unwrap();

        ui.send(UiCommand::SignOut).await;
        ui.status.wait_for(|s| !s.signed_in()).await.unwrap();

        ui.send(UiCommand::Shutdown).await;
        controller.await.unwrap();
    }

    #[tokio::test]
    async fn test_second_scan_rejected_while_busy() {
        let launcher = Arc::new(ScriptedLauncher::default());
        let (mut ui, controller) = start(launcher.clone(), Arc::new(FakeRemote::ok("ok")), true);

        ui.send(UiCommand::Scan).await;
        ui.status.wait_for(|s| s.scanning).await.unwrap();
        ui.send(UiCommand::Scan).await;
        assert_eq!(next_notice(&mut ui.notices).await, Notice::ScanBusy);
        assert_eq!(launcher.launched.lock().unwrap().len(), 1);

        ui.send(UiCommand::Shutdown).await;
        controller.await.unwrap();
    }

    #[tokio::test]
    async fn test_teardown_mid_scan_never_authenticates() {
        let launcher = Arc::new(ScriptedLauncher::default());
        let remote = Arc::new(FakeRemote::ok("ok"));
        let (mut ui, controller) = start(launcher.clone(), remote.clone(), true);

        ui.send(UiCommand::Scan).await;
        ui.status.wait_for(|s| s.scanning).await.unwrap();
        ui.send(UiCommand::Shutdown).await;
        controller.await.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(*launcher.cancelled.lock().unwrap(), vec![RequestId(9002)]);
        assert_eq!(remote.call_count(), 0);
        assert!(!ui.status.borrow().scanning);
    }

    #[tokio::test]
    async fn test_stale_outcomes_are_ignored() {
        let launcher = Arc::new(ScriptedLauncher::default());
        let remote = Arc::new(FakeRemote::ok("ok"));
        let (ui, controller) = start(launcher, remote.clone(), true);

        ui.inbox
            .send(SessionEvent::ScanCompleted(ScanOutcome::Scanned {
                request_id: RequestId(1),
                token: "forged".to_string(),
            }))
            .await
            .unwrap();

        ui.send(UiCommand::Shutdown).await;
        controller.await.unwrap();
        assert_eq!(remote.call_count(), 0);
    }
}

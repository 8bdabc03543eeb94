//! UI/controller communication bridge
//!
//! The UI posts commands into the controller inbox and renders the status it
//! receives back. Scanner and remote-call completions reach the controller
//! through the same inbox, so the controller is the only writer of session
//! state.

use crate::error::IdentityError;
use crate::identity::SignedInUser;
use crate::remote::AuthOutcome;
use qrsignin_core::ErrorKind;
use qrsignin_scanner::ScanOutcome;
use tokio::sync::{broadcast, mpsc, watch};

/// User actions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiCommand {
    SignIn,
    SignOut,
    /// Launch a QR scan
    Scan,
    Shutdown,
}

/// Messages consumed by the session controller
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Command(UiCommand),
    SignInCompleted(Result<SignedInUser, IdentityError>),
    ScanCompleted(ScanOutcome),
    AuthCompleted(AuthOutcome),
}

impl From<UiCommand> for SessionEvent {
    fn from(command: UiCommand) -> Self {
        SessionEvent::Command(command)
    }
}

/// One-off notifications shown to the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    SignInFailed { reason: String },
    /// A scan needs a signed-in user
    NotSignedIn,
    /// A scan or its authentication is still in progress
    ScanBusy,
    ScanFailed { kind: ErrorKind },
    /// The scan ended without a code, through the user or the end of the
    /// camera stream
    ScanCancelled,
    Authenticated { result: String },
    AuthenticationFailed { reason: String },
}

/// What the UI renders
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStatus {
    pub user: Option<SignedInUser>,
    pub scanning: bool,
    pub authenticating: bool,
}

impl SessionStatus {
    pub fn signed_in(&self) -> bool {
        self.user.is_some()
    }

    /// Whether the scan action is offered
    pub fn can_scan(&self) -> bool {
        self.signed_in() && !self.scanning && !self.authenticating
    }
}

/// UI end of the bridge
pub struct SessionUi {
    pub inbox: mpsc::Sender<SessionEvent>,
    pub status: watch::Receiver<SessionStatus>,
    pub notices: broadcast::Receiver<Notice>,
}

impl SessionUi {
    /// Post a user action. Returns false once the controller is gone.
    pub async fn send(&self, command: UiCommand) -> bool {
        self.inbox.send(command.into()).await.is_ok()
    }
}

/// Controller end of the bridge
pub struct ControllerBridge {
    pub inbox_rx: mpsc::Receiver<SessionEvent>,
    /// Handed to tasks that report completions
    pub inbox_tx: mpsc::Sender<SessionEvent>,
    pub status_tx: watch::Sender<SessionStatus>,
    pub notice_tx: broadcast::Sender<Notice>,
}

/// Create a new bridge pair for the UI and the session controller
pub fn create_bridge() -> (SessionUi, ControllerBridge) {
    let (inbox_tx, inbox_rx) = mpsc::channel::<SessionEvent>(32);
    let (status_tx, status_rx) = watch::channel(SessionStatus::default());
    let (notice_tx, notice_rx) = broadcast::channel::<Notice>(64);

    let ui = SessionUi {
        inbox: inbox_tx.clone(),
        status: status_rx,
        notices: notice_rx,
    };

    let controller = ControllerBridge {
        inbox_rx,
        inbox_tx,
        status_tx,
        notice_tx,
    };

    (ui, controller)
}

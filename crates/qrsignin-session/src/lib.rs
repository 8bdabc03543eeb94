//! QR Sign-In Session - Sign-in state and remote authentication
//!
//! The [`SessionController`] is the single consumer of the session inbox:
//! user commands and completions from the scanner and the remote call all
//! arrive there as [`SessionEvent`]s, and the controller publishes the state
//! the UI renders. The [`RemoteAuthenticator`] forwards a scanned token to
//! the authentication function once per scan.

pub mod bridge;
pub mod controller;
pub mod error;
pub mod haptics;
pub mod identity;
pub mod remote;

pub use bridge::{create_bridge, ControllerBridge, Notice, SessionEvent, SessionStatus, SessionUi, UiCommand};
pub use controller::SessionController;
pub use error::{IdentityError, RemoteCallError};
pub use haptics::{Haptics, LogHaptics};
pub use identity::{IdentityProvider, SignedInUser, StaticIdentity};
pub use remote::{AuthOutcome, AuthRequest, HttpsCallable, RemoteAuthenticator, RemoteFunction};

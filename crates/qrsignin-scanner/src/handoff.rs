//! Validation and one-time delivery of a scan result
//!
//! A [`ScanResultHandoff`] is created together with the receiver the launcher
//! waits on. Its clones share a single one-shot slot, so however many times a
//! scan is paused and resumed, exactly one [`ScanOutcome`] reaches the
//! launcher: the first of handoff, cancellation or failure wins and every
//! later attempt is a no-op.
//!
//! A pipeline hands payloads off through its frame gate. Checking the gate and
//! sending happen under the slot lock, and the pipeline's stop closes the gate
//! under the same lock, so a stopped pipeline never delivers.

use qrsignin_capture::FrameGate;
use qrsignin_core::ErrorKind;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tracing::{debug, info};

/// Identifier the launcher attaches to a scan request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(pub u32);

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "scan-request-{}", self.0)
    }
}

/// Terminal result of a scan session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    /// A validated payload
    Scanned { request_id: RequestId, token: String },
    /// Scan ended without a payload
    Cancelled { request_id: RequestId },
    /// Scan could not run
    Failed { request_id: RequestId, kind: ErrorKind },
}

impl ScanOutcome {
    pub fn request_id(&self) -> RequestId {
        match self {
            ScanOutcome::Scanned { request_id, .. }
            | ScanOutcome::Cancelled { request_id }
            | ScanOutcome::Failed { request_id, .. } => *request_id,
        }
    }

    pub fn token(&self) -> Option<&str> {
        match self {
            ScanOutcome::Scanned { token, .. } => Some(token),
            _ => None,
        }
    }
}

/// Decides whether a decoded payload is a sign-in token.
///
/// Called from the detection pass on a blocking worker, so a policy may be
/// slow, but it must not rely on running inside the async runtime.
pub trait ValidationPolicy: Send + Sync {
    fn validate(&self, payload: &str) -> bool;
}

impl<F> ValidationPolicy for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn validate(&self, payload: &str) -> bool {
        self(payload)
    }
}

/// Accepts every payload
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl ValidationPolicy for AcceptAll {
    fn validate(&self, _payload: &str) -> bool {
        true
    }
}

/// Accepts payloads made of a fixed prefix followed by a token of fixed length
#[derive(Debug, Clone)]
pub struct PrefixLengthPolicy {
    prefix: String,
    token_len: usize,
}

impl PrefixLengthPolicy {
    pub const QR_AUTH_PREFIX: &'static str = "qrAuth$";
    pub const TOKEN_LEN: usize = 128;

    pub fn new(prefix: impl Into<String>, token_len: usize) -> Self {
        Self {
            prefix: prefix.into(),
            token_len,
        }
    }

    /// `qrAuth$` followed by a 128 character token
    pub fn qr_auth() -> Self {
        Self::new(Self::QR_AUTH_PREFIX, Self::TOKEN_LEN)
    }
}

impl ValidationPolicy for PrefixLengthPolicy {
    fn validate(&self, payload: &str) -> bool {
        payload
            .strip_prefix(self.prefix.as_str())
            .map(|token| token.chars().count() == self.token_len)
            .unwrap_or(false)
    }
}

type Slot = Arc<Mutex<Option<oneshot::Sender<ScanOutcome>>>>;
type SlotGuard<'a> = std::sync::MutexGuard<'a, Option<oneshot::Sender<ScanOutcome>>>;

/// Validates payloads and returns exactly one outcome to the launcher
#[derive(Clone)]
pub struct ScanResultHandoff {
    request_id: RequestId,
    policy: Arc<dyn ValidationPolicy>,
    slot: Slot,
}

impl ScanResultHandoff {
    /// Create a handoff and the receiver its outcome is delivered to
    pub fn new(
        request_id: RequestId,
        policy: Arc<dyn ValidationPolicy>,
    ) -> (Self, oneshot::Receiver<ScanOutcome>) {
        let (tx, rx) = oneshot::channel();
        let handoff = Self {
            request_id,
            policy,
            slot: Arc::new(Mutex::new(Some(tx))),
        };
        (handoff, rx)
    }

    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    pub fn validate(&self, payload: &str) -> bool {
        self.policy.validate(payload)
    }

    /// Deliver a validated payload. Returns false if an outcome was already
    /// delivered, in which case nothing is sent.
    pub fn handoff(&self, payload: &str) -> bool {
        let mut slot = self.lock_slot();
        self.deliver_payload(&mut slot, payload)
    }

    /// Deliver a validated payload unless `gate` is closed. The check and the
    /// delivery are one step with respect to [`close_gate`](Self::close_gate).
    pub fn handoff_gated(&self, gate: &FrameGate, payload: &str) -> bool {
        let mut slot = self.lock_slot();
        if gate.is_closed() {
            debug!("{} gate closed, dropping scanned code", self.request_id);
            return false;
        }
        self.deliver_payload(&mut slot, payload)
    }

    /// Close a pipeline's gate. Once this returns, no payload gated on it can
    /// be delivered.
    pub fn close_gate(&self, gate: &FrameGate) {
        let _slot = self.lock_slot();
        gate.close();
    }

    /// End the scan without a payload
    pub fn cancel(&self) -> bool {
        self.deliver(ScanOutcome::Cancelled {
            request_id: self.request_id,
        })
    }

    /// End the scan because it could not run
    pub fn fail(&self, kind: ErrorKind) -> bool {
        self.deliver(ScanOutcome::Failed {
            request_id: self.request_id,
            kind,
        })
    }

    /// Whether an outcome has been delivered
    pub fn is_complete(&self) -> bool {
        self.lock_slot().is_none()
    }

    fn deliver_payload(&self, slot: &mut SlotGuard<'_>, payload: &str) -> bool {
        let outcome = ScanOutcome::Scanned {
            request_id: self.request_id,
            token: payload.to_string(),
        };
        let delivered = self.send(slot, outcome);
        if delivered {
            info!("{} handed off a scanned code", self.request_id);
        }
        delivered
    }

    fn deliver(&self, outcome: ScanOutcome) -> bool {
        let mut slot = self.lock_slot();
        self.send(&mut slot, outcome)
    }

    fn send(&self, slot: &mut SlotGuard<'_>, outcome: ScanOutcome) -> bool {
        let Some(tx) = slot.take() else {
            debug!("{} already complete, dropping {:?}", self.request_id, outcome);
            return false;
        };
        if tx.send(outcome).is_err() {
            // The launcher went away; the scan still counts as complete
            debug!("{} launcher no longer waiting", self.request_id);
        }
        true
    }

    fn lock_slot(&self) -> SlotGuard<'_> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for ScanResultHandoff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanResultHandoff")
            .field("request_id", &self.request_id)
            .field("complete", &self.is_complete())
            .finish()
    }
}

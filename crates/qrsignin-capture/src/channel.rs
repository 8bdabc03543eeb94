//! Frame hand-over between the capture thread and the detection pipeline
//!
//! The gate is a single-permit semaphore. A frame is only sent when the permit
//! is free, and the permit travels with the frame until its detection pass
//! finishes, so a frame arriving during a pass is dropped instead of queued.
//! Closing the gate stops delivery immediately, including for a frame that
//! already passed the gate but has not been picked up yet.

use qrsignin_core::Frame;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tracing::trace;

/// Result of offering a frame to the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The frame will be processed
    Accepted,
    /// A detection pass is in flight, the frame was discarded
    Dropped,
    /// The pipeline no longer accepts frames
    Closed,
}

/// Counters shared by both ends of a frame channel
#[derive(Debug, Default)]
pub struct FrameStats {
    accepted: AtomicU64,
    dropped: AtomicU64,
}

impl FrameStats {
    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Proof that a detection pass owns the single in-flight slot.
///
/// Dropping it lets the next frame through.
#[derive(Debug)]
pub struct PassPermit {
    _permit: OwnedSemaphorePermit,
}

struct PendingFrame {
    frame: Frame,
    permit: PassPermit,
}

/// Close-only view of the gate, for owners that do not hold either end
#[derive(Debug, Clone)]
pub struct FrameGate {
    gate: Arc<Semaphore>,
}

impl FrameGate {
    /// Stop delivery; any frame not yet picked up is discarded
    pub fn close(&self) {
        self.gate.close();
    }

    pub fn is_closed(&self) -> bool {
        self.gate.is_closed()
    }
}

/// Producer end, held by the capture thread
#[derive(Clone)]
pub struct FrameSink {
    gate: Arc<Semaphore>,
    tx: mpsc::UnboundedSender<PendingFrame>,
    stats: Arc<FrameStats>,
}

/// Consumer end, held by the frame processing pipeline
pub struct FrameSource {
    gate: Arc<Semaphore>,
    rx: mpsc::UnboundedReceiver<PendingFrame>,
    stats: Arc<FrameStats>,
}

/// Create a connected sink/source pair with one in-flight slot
pub fn frame_channel() -> (FrameSink, FrameSource) {
    let gate = Arc::new(Semaphore::new(1));
    let stats = Arc::new(FrameStats::default());
    let (tx, rx) = mpsc::unbounded_channel();

    (
        FrameSink {
            gate: gate.clone(),
            tx,
            stats: stats.clone(),
        },
        FrameSource { gate, rx, stats },
    )
}

impl FrameSink {
    /// Offer a frame without blocking the capture thread
    pub fn submit(&self, frame: Frame) -> SubmitOutcome {
        match self.gate.clone().try_acquire_owned() {
            Ok(permit) => {
                let sequence = frame.sequence;
                let pending = PendingFrame {
                    frame,
                    permit: PassPermit { _permit: permit },
                };
                if self.tx.send(pending).is_err() {
                    return SubmitOutcome::Closed;
                }
                self.stats.accepted.fetch_add(1, Ordering::Relaxed);
                trace!("Frame {} accepted", sequence);
                SubmitOutcome::Accepted
            }
            Err(TryAcquireError::NoPermits) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                SubmitOutcome::Dropped
            }
            Err(TryAcquireError::Closed) => SubmitOutcome::Closed,
        }
    }

    /// Stop delivery; frames already queued are discarded by the source
    pub fn close(&self) {
        self.gate.close();
    }

    pub fn is_closed(&self) -> bool {
        self.gate.is_closed() || self.tx.is_closed()
    }

    pub fn stats(&self) -> Arc<FrameStats> {
        self.stats.clone()
    }
}

impl FrameSource {
    /// Wait for the next deliverable frame.
    ///
    /// Returns `None` once the channel is closed, even if a frame is queued.
    pub async fn recv(&mut self) -> Option<(Frame, PassPermit)> {
        if self.gate.is_closed() {
            return None;
        }
        let pending = self.rx.recv().await?;
        if self.gate.is_closed() {
            return None;
        }
        Some((pending.frame, pending.permit))
    }

    /// Whether delivery was stopped. A pass finishing after this must not emit.
    pub fn is_closed(&self) -> bool {
        self.gate.is_closed()
    }

    pub fn gate(&self) -> FrameGate {
        FrameGate {
            gate: self.gate.clone(),
        }
    }

    /// Stop accepting frames from the sink
    pub fn close(&mut self) {
        self.gate.close();
        self.rx.close();
    }

    pub fn stats(&self) -> Arc<FrameStats> {
        self.stats.clone()
    }
}

//! Frame processing pipeline
//!
//! Pulls frames from a [`FrameSource`], runs one detection pass at a time on a
//! blocking worker and hands the first accepted payload to the
//! [`ScanResultHandoff`]. A pass covers detection, tie-break and validation.
//! After a handoff the pipeline is terminal: it closes the frame gate, which
//! also ends the capture thread, and never emits again.

use crate::detector::{BarcodeDetector, DetectionResult};
use crate::error::ScanResult;
use crate::handoff::ScanResultHandoff;
use qrsignin_capture::{FrameGate, FrameSource, FrameStats, OverlayTarget};
use qrsignin_core::{Frame, TieBreak};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinError;
use tracing::{debug, error, info, warn};

/// Lifecycle of a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Running,
    /// A payload was handed off
    Emitted,
    /// Stopped or the frame source ended without a payload
    Stopped,
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Emitted | PipelineState::Stopped)
    }
}

/// Counters for one pipeline run
#[derive(Debug)]
pub struct PipelineStats {
    frames: Arc<FrameStats>,
    passes_completed: AtomicU64,
    passes_failed: AtomicU64,
    passes_discarded: AtomicU64,
}

/// Point-in-time copy of [`PipelineStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub frames_accepted: u64,
    pub frames_dropped: u64,
    pub passes_completed: u64,
    pub passes_failed: u64,
    pub passes_discarded: u64,
}

impl PipelineStats {
    fn new(frames: Arc<FrameStats>) -> Self {
        Self {
            frames,
            passes_completed: AtomicU64::new(0),
            passes_failed: AtomicU64::new(0),
            passes_discarded: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_accepted: self.frames.accepted(),
            frames_dropped: self.frames.dropped(),
            passes_completed: self.passes_completed.load(Ordering::Relaxed),
            passes_failed: self.passes_failed.load(Ordering::Relaxed),
            passes_discarded: self.passes_discarded.load(Ordering::Relaxed),
        }
    }
}

/// Detection stage of a scan session
pub struct FrameProcessingPipeline {
    detector: Arc<dyn BarcodeDetector>,
    handoff: ScanResultHandoff,
    tie_break: TieBreak,
    overlay: Option<Arc<dyn OverlayTarget>>,
}

impl FrameProcessingPipeline {
    pub fn new(detector: Arc<dyn BarcodeDetector>, handoff: ScanResultHandoff) -> Self {
        Self {
            detector,
            handoff,
            tie_break: TieBreak::default(),
            overlay: None,
        }
    }

    /// Builder pattern: set multi-barcode tie-break
    pub fn with_tie_break(mut self, tie_break: TieBreak) -> Self {
        self.tie_break = tie_break;
        self
    }

    /// Builder pattern: draw detected regions on an overlay
    pub fn with_overlay(mut self, overlay: Arc<dyn OverlayTarget>) -> Self {
        self.overlay = Some(overlay);
        self
    }

    /// Spawn the pipeline on the current runtime
    pub fn start(self, source: FrameSource) -> PipelineHandle {
        let (state_tx, state_rx) = watch::channel(PipelineState::Idle);
        let (stop_tx, stop_rx) = oneshot::channel();
        let stats = Arc::new(PipelineStats::new(source.stats()));
        let gate = source.gate();
        let handoff = self.handoff.clone();

        tokio::spawn(self.run(source, stop_rx, state_tx, stats.clone()));

        PipelineHandle {
            state_rx,
            stop_tx: Some(stop_tx),
            gate,
            handoff,
            stats,
        }
    }

    async fn run(
        self,
        mut source: FrameSource,
        mut stop_rx: oneshot::Receiver<()>,
        state_tx: watch::Sender<PipelineState>,
        stats: Arc<PipelineStats>,
    ) {
        state_tx.send_replace(PipelineState::Running);
        info!("{} detection pipeline started", self.handoff.request_id());
        let gate = source.gate();

        let terminal = loop {
            let next = tokio::select! {
                biased;
                _ = &mut stop_rx => None,
                next = source.recv() => next,
            };
            let Some((frame, permit)) = next else {
                break PipelineState::Stopped;
            };

            let sequence = frame.sequence;
            let detector = self.detector.clone();
            let handoff = self.handoff.clone();
            let tie_break = self.tie_break;
            let pass = tokio::task::spawn_blocking(move || {
                run_pass(detector.as_ref(), &handoff, tie_break, &frame)
            });

            let result = tokio::select! {
                biased;
                _ = &mut stop_rx => {
                    stats.passes_discarded.fetch_add(1, Ordering::Relaxed);
                    debug!("Stopped during pass on frame {}", sequence);
                    break PipelineState::Stopped;
                }
                result = pass => result,
            };

            // Closing the gate makes every result still in flight a no-op
            if source.is_closed() {
                stats.passes_discarded.fetch_add(1, Ordering::Relaxed);
                debug!("Discarding pass on frame {} after close", sequence);
                break PipelineState::Stopped;
            }

            let emitted = self.process(sequence, result, &gate, &stats);
            if !emitted && source.is_closed() {
                // Stopped while the pass was finishing
                stats.passes_discarded.fetch_add(1, Ordering::Relaxed);
                debug!("Discarding pass on frame {} after close", sequence);
                break PipelineState::Stopped;
            }
            let complete = emitted || self.handoff.is_complete();
            if complete {
                // Closed before the permit is released so no later frame gets in
                source.close();
            }
            drop(permit);

            if emitted {
                break PipelineState::Emitted;
            }
            if complete {
                // Cancelled or failed elsewhere
                break PipelineState::Stopped;
            }
        };

        source.close();
        state_tx.send_replace(terminal);

        let snapshot = stats.snapshot();
        debug!(
            "Pipeline finished: {} accepted, {} dropped, {} passes ({} failed, {} discarded)",
            snapshot.frames_accepted,
            snapshot.frames_dropped,
            snapshot.passes_completed,
            snapshot.passes_failed,
            snapshot.passes_discarded
        );
        info!("{} detection pipeline {:?}", self.handoff.request_id(), terminal);
    }

    /// Handle one finished pass. Returns whether a payload was handed off.
    fn process(
        &self,
        sequence: u64,
        result: Result<ScanResult<Pass>, JoinError>,
        gate: &FrameGate,
        stats: &PipelineStats,
    ) -> bool {
        let pass = match result {
            Ok(Ok(pass)) => pass,
            Ok(Err(e)) => {
                stats.passes_failed.fetch_add(1, Ordering::Relaxed);
                error!("Detection failed on frame {}: {}", sequence, e);
                return false;
            }
            Err(e) => {
                stats.passes_failed.fetch_add(1, Ordering::Relaxed);
                error!("Detection worker failed on frame {}: {}", sequence, e);
                return false;
            }
        };
        stats.passes_completed.fetch_add(1, Ordering::Relaxed);

        if let Some(overlay) = &self.overlay {
            overlay.draw_detections(sequence, &pass.detection.regions());
        }

        let payload = match pass.selected {
            Ok(Some(payload)) => payload,
            Ok(None) => return false,
            Err(e) => {
                stats.passes_failed.fetch_add(1, Ordering::Relaxed);
                error!("Unreadable barcode: {}", e);
                return false;
            }
        };

        let found = pass.detection.barcodes.len();
        if found > 1 {
            debug!(
                "Frame {} holds {} barcodes, using {:?}",
                sequence, found, self.tie_break
            );
        }

        if !pass.accepted {
            warn!("Frame {}: payload rejected by validation policy", sequence);
            return false;
        }

        self.handoff.handoff_gated(gate, &payload)
    }
}

/// Output of one pass on the blocking worker
struct Pass {
    detection: DetectionResult,
    selected: ScanResult<Option<String>>,
    /// Whether the validation policy accepted the selected payload
    accepted: bool,
}

fn run_pass(
    detector: &dyn BarcodeDetector,
    handoff: &ScanResultHandoff,
    tie_break: TieBreak,
    frame: &Frame,
) -> ScanResult<Pass> {
    let detection = detector.detect(frame)?;
    let selected = detection
        .select(tie_break)
        .map(|payload| payload.map(str::to_string));
    let accepted = matches!(&selected, Ok(Some(payload)) if handoff.validate(payload));
    Ok(Pass {
        detection,
        selected,
        accepted,
    })
}

/// Control handle of a running pipeline. Dropping it stops the pipeline.
pub struct PipelineHandle {
    state_rx: watch::Receiver<PipelineState>,
    stop_tx: Option<oneshot::Sender<()>>,
    gate: FrameGate,
    handoff: ScanResultHandoff,
    stats: Arc<PipelineStats>,
}

impl PipelineHandle {
    /// Stop accepting frames. A pass in flight may finish but its result is
    /// discarded: once this returns the pipeline cannot hand anything off.
    pub fn stop(&mut self) {
        self.handoff.close_gate(&self.gate);
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
    }

    pub fn state(&self) -> PipelineState {
        *self.state_rx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<PipelineState> {
        self.state_rx.clone()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Wait until the pipeline reaches a terminal state
    pub async fn finished(&mut self) -> PipelineState {
        match self.state_rx.wait_for(|state| state.is_terminal()).await {
            Ok(state) => *state,
            // The run task is gone without publishing a terminal state
            Err(_) => PipelineState::Stopped,
        }
    }
}

impl Drop for PipelineHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

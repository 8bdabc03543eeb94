//! Scanner screen: binds a camera session and a detection pipeline to the
//! host's lifecycle callbacks.
//!
//! The host calls `on_create`, `on_permissions_result`, `on_resume`,
//! `on_pause` and `on_destroy` as its screen moves through its lifecycle. The
//! camera is open only between a successful resume and the following pause,
//! and the launcher receives exactly one [`ScanOutcome`] whichever way the
//! screen ends.
//!
//! [`ScreenLauncher`] drives a screen headlessly for hosts without a real
//! lifecycle.

use crate::detector::BarcodeDetector;
use crate::error::{ScanError, ScanResult};
use crate::handoff::{RequestId, ScanOutcome, ScanResultHandoff, ValidationPolicy};
use crate::pipeline::{FrameProcessingPipeline, PipelineHandle, PipelineState, StatsSnapshot};
use qrsignin_capture::{
    frame_channel, CameraProvider, CameraResourceManager, NullSurface, OverlayTarget, PreviewTarget,
};
use qrsignin_core::{ErrorKind, Permission, PermissionSet, PermissionState, ScannerConfig};
use std::sync::Arc;
use tokio::sync::{oneshot, Notify};
use tracing::{debug, error, info, warn};

/// Host permission service
pub trait PermissionHost: Send + Sync {
    /// Current grant state of a permission
    fn check(&self, permission: &Permission) -> PermissionState;

    /// Ask the user for permissions. Interactive hosts answer later through
    /// [`ScannerScreen::on_permissions_result`].
    fn request(&self, permissions: &[Permission]);
}

/// Host that holds every permission
#[derive(Debug, Clone, Copy, Default)]
pub struct GrantAll;

impl PermissionHost for GrantAll {
    fn check(&self, _permission: &Permission) -> PermissionState {
        PermissionState::Granted
    }

    fn request(&self, _permissions: &[Permission]) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScreenState {
    Created,
    AwaitingPermission,
    Ready,
    Resumed,
    Paused,
    Finished,
}

pub struct ScannerScreen {
    config: ScannerConfig,
    manager: CameraResourceManager,
    detector: Arc<dyn BarcodeDetector>,
    handoff: ScanResultHandoff,
    host: Arc<dyn PermissionHost>,
    preview: Arc<dyn PreviewTarget>,
    overlay: Arc<dyn OverlayTarget>,
    permissions: PermissionSet,
    pipeline: Option<PipelineHandle>,
    last_stats: Option<StatsSnapshot>,
    state: ScreenState,
}

impl ScannerScreen {
    pub fn new(
        config: ScannerConfig,
        provider: Arc<dyn CameraProvider>,
        detector: Arc<dyn BarcodeDetector>,
        handoff: ScanResultHandoff,
        host: Arc<dyn PermissionHost>,
    ) -> Self {
        let permissions = PermissionSet::new(config.required_permissions.iter().cloned());
        Self {
            config,
            manager: CameraResourceManager::new(provider),
            detector,
            handoff,
            host,
            preview: Arc::new(NullSurface),
            overlay: Arc::new(NullSurface),
            permissions,
            pipeline: None,
            last_stats: None,
            state: ScreenState::Created,
        }
    }

    /// Builder pattern: bind preview and overlay surfaces
    pub fn with_surfaces(
        mut self,
        preview: Arc<dyn PreviewTarget>,
        overlay: Arc<dyn OverlayTarget>,
    ) -> Self {
        self.preview = preview;
        self.overlay = overlay;
        self
    }

    pub fn state(&self) -> ScreenState {
        self.state
    }

    pub fn request_id(&self) -> RequestId {
        self.handoff.request_id()
    }

    pub fn permissions(&self) -> &PermissionSet {
        &self.permissions
    }

    pub fn is_camera_acquired(&self) -> bool {
        self.manager.is_acquired()
    }

    /// Statistics of the running pipeline, or of the last one
    pub fn pipeline_stats(&self) -> Option<StatsSnapshot> {
        self.pipeline.as_ref().map(|p| p.stats()).or(self.last_stats)
    }

    /// Query permissions; acquire the camera if all are granted, otherwise
    /// ask the host for the missing ones.
    pub fn on_create(&mut self) -> ScanResult<()> {
        self.ensure_active()?;
        self.query_permissions();

        if self.permissions.all_granted() {
            self.state = ScreenState::Ready;
            return self.acquire_camera();
        }

        self.state = ScreenState::AwaitingPermission;
        self.request_permissions();
        Ok(())
    }

    /// Apply the answer to a permission prompt
    pub fn on_permissions_result(
        &mut self,
        results: &[(Permission, PermissionState)],
    ) -> ScanResult<()> {
        self.ensure_active()?;
        for (permission, state) in results {
            self.permissions.set(permission, *state);
        }
        self.query_permissions();

        if !self.permissions.all_granted() {
            let missing = self.permissions.missing();
            warn!("{}: camera blocked, missing {:?}", self.request_id(), missing);
            self.state = ScreenState::AwaitingPermission;
            return Err(ScanError::PermissionDenied(missing));
        }

        if self.state == ScreenState::AwaitingPermission {
            self.state = ScreenState::Ready;
        }
        self.acquire_camera()
    }

    /// Prompt again for whatever is not granted
    pub fn request_permissions(&self) {
        let missing = self.permissions.missing();
        if !missing.is_empty() {
            debug!("{}: requesting {:?}", self.request_id(), missing);
            self.host.request(&missing);
        }
    }

    /// Start the preview and the detection pipeline.
    ///
    /// Must run inside a tokio runtime. A preview failure releases the camera
    /// and is returned; the next resume retries.
    pub fn on_resume(&mut self) -> ScanResult<()> {
        self.ensure_active()?;
        if self.state == ScreenState::AwaitingPermission || self.pipeline.is_some() {
            return Ok(());
        }
        if !self.permissions.all_granted() {
            return Err(ScanError::PermissionDenied(self.permissions.missing()));
        }
        if self.handoff.is_complete() {
            return Err(ScanError::Finished);
        }

        self.acquire_camera()?;

        let (sink, source) = frame_channel();
        if let Err(e) = self.manager.start(sink) {
            error!("{}: preview failed to start: {}", self.request_id(), e);
            self.state = ScreenState::Paused;
            return Err(e.into());
        }

        let pipeline = FrameProcessingPipeline::new(self.detector.clone(), self.handoff.clone())
            .with_tie_break(self.config.tie_break)
            .with_overlay(self.overlay.clone())
            .start(source);
        self.pipeline = Some(pipeline);
        self.state = ScreenState::Resumed;
        Ok(())
    }

    /// Stop detection and release the camera
    pub fn on_pause(&mut self) {
        if let Some(mut pipeline) = self.pipeline.take() {
            pipeline.stop();
            self.last_stats = Some(pipeline.stats());
        }
        self.manager.release();
        if self.state != ScreenState::Finished {
            self.state = ScreenState::Paused;
        }
    }

    /// Tear the screen down. If nothing was handed off the scan ends as
    /// cancelled.
    pub fn on_destroy(&mut self) {
        self.on_pause();
        if self.handoff.cancel() {
            info!("{} ended without a result", self.request_id());
        }
        self.state = ScreenState::Finished;
    }

    /// User backed out of the scan
    pub fn cancel(&mut self) {
        debug!("{} cancelled by user", self.request_id());
        self.on_destroy();
    }

    /// Wait for the pipeline to end, then tear the screen down
    pub async fn wait_finished(&mut self) -> PipelineState {
        let state = match self.pipeline.as_mut() {
            Some(pipeline) => pipeline.finished().await,
            None => PipelineState::Stopped,
        };
        self.on_destroy();
        state
    }

    /// End the scan with a failure the launcher must see
    fn fail(&mut self, kind: ErrorKind) {
        self.handoff.fail(kind);
        self.on_destroy();
    }

    fn ensure_active(&self) -> ScanResult<()> {
        if self.state == ScreenState::Finished {
            return Err(ScanError::Finished);
        }
        Ok(())
    }

    fn query_permissions(&mut self) {
        let required: Vec<Permission> = self.permissions.permissions().cloned().collect();
        for permission in required {
            if self.permissions.state(&permission) != Some(PermissionState::Granted) {
                let state = self.host.check(&permission);
                if state != PermissionState::Unknown {
                    self.permissions.set(&permission, state);
                }
            }
        }
    }

    /// Open the camera. Failing to get one ends the scan.
    fn acquire_camera(&mut self) -> ScanResult<()> {
        if self.manager.is_acquired() {
            return Ok(());
        }

        match self.manager.acquire(self.preview.clone(), self.overlay.clone()) {
            Ok(id) => {
                debug!("{} bound to {}", self.request_id(), id);
                Ok(())
            }
            Err(e) => {
                error!("{}: camera unavailable: {}", self.request_id(), e);
                self.fail(ErrorKind::ResourceUnavailable);
                Err(e.into())
            }
        }
    }
}

impl Drop for ScannerScreen {
    fn drop(&mut self) {
        self.on_destroy();
    }
}

/// Cancels a launched scan from outside its screen
#[derive(Debug, Clone, Default)]
pub struct ScanCanceller(Arc<Notify>);

impl ScanCanceller {
    pub fn cancel(&self) {
        self.0.notify_one();
    }

    pub async fn cancelled(&self) {
        self.0.notified().await;
    }
}

/// Launcher's view of a scan in progress
pub struct ScreenHandle {
    request_id: RequestId,
    outcome_rx: oneshot::Receiver<ScanOutcome>,
    canceller: ScanCanceller,
}

impl ScreenHandle {
    pub fn new(request_id: RequestId, outcome_rx: oneshot::Receiver<ScanOutcome>) -> Self {
        Self {
            request_id,
            outcome_rx,
            canceller: ScanCanceller::default(),
        }
    }

    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    pub fn canceller(&self) -> ScanCanceller {
        self.canceller.clone()
    }

    pub fn cancel(&self) {
        self.canceller.cancel();
    }

    /// Wait for the scan outcome. A screen that vanished counts as cancelled.
    pub async fn outcome(self) -> ScanOutcome {
        match self.outcome_rx.await {
            Ok(outcome) => outcome,
            Err(_) => ScanOutcome::Cancelled {
                request_id: self.request_id,
            },
        }
    }
}

/// Starts scan sessions for a given request id
pub trait ScanLauncher: Send + Sync {
    fn launch(&self, request_id: RequestId) -> ScreenHandle;
}

/// Launches [`ScannerScreen`]s and drives their lifecycle on the runtime
pub struct ScreenLauncher {
    config: ScannerConfig,
    provider: Arc<dyn CameraProvider>,
    detector: Arc<dyn BarcodeDetector>,
    policy: Arc<dyn ValidationPolicy>,
    host: Arc<dyn PermissionHost>,
    preview: Arc<dyn PreviewTarget>,
    overlay: Arc<dyn OverlayTarget>,
}

impl ScreenLauncher {
    pub fn new(
        config: ScannerConfig,
        provider: Arc<dyn CameraProvider>,
        detector: Arc<dyn BarcodeDetector>,
        policy: Arc<dyn ValidationPolicy>,
    ) -> Self {
        Self {
            config,
            provider,
            detector,
            policy,
            host: Arc::new(GrantAll),
            preview: Arc::new(NullSurface),
            overlay: Arc::new(NullSurface),
        }
    }

    /// Builder pattern: set the permission host
    pub fn with_permission_host(mut self, host: Arc<dyn PermissionHost>) -> Self {
        self.host = host;
        self
    }

    /// Builder pattern: bind preview and overlay surfaces
    pub fn with_surfaces(
        mut self,
        preview: Arc<dyn PreviewTarget>,
        overlay: Arc<dyn OverlayTarget>,
    ) -> Self {
        self.preview = preview;
        self.overlay = overlay;
        self
    }
}

impl ScanLauncher for ScreenLauncher {
    fn launch(&self, request_id: RequestId) -> ScreenHandle {
        let (handoff, outcome_rx) = ScanResultHandoff::new(request_id, self.policy.clone());
        let screen = ScannerScreen::new(
            self.config.clone(),
            self.provider.clone(),
            self.detector.clone(),
            handoff,
            self.host.clone(),
        )
        .with_surfaces(self.preview.clone(), self.overlay.clone());

        let handle = ScreenHandle::new(request_id, outcome_rx);
        tokio::spawn(drive(screen, handle.canceller()));
        handle
    }
}

async fn drive(mut screen: ScannerScreen, canceller: ScanCanceller) {
    if let Err(e) = screen.on_create() {
        warn!("{}: {}", screen.request_id(), e);
        return;
    }

    if screen.state() == ScreenState::AwaitingPermission {
        // Headless hosts settle the prompt inside `request`
        if let Err(e) = screen.on_permissions_result(&[]) {
            warn!("{}: {}", screen.request_id(), e);
            screen.fail(ErrorKind::PermissionDenied);
            return;
        }
    }

    if let Err(e) = screen.on_resume() {
        warn!("{}: {}", screen.request_id(), e);
        let kind = qrsignin_core::Error::from(e).kind();
        screen.fail(kind);
        return;
    }

    let request_id = screen.request_id();
    let cancelled = tokio::select! {
        state = screen.wait_finished() => {
            debug!("{} finished: {:?}", request_id, state);
            false
        }
        _ = canceller.cancelled() => true,
    };
    if cancelled {
        screen.cancel();
    }
}

//! Camera session ownership bound to the host screen's lifecycle
//!
//! The manager holds at most one [`CameraSession`]. Acquisition opens the
//! device and binds the surfaces; starting the session begins preview and
//! spawns the capture thread; release stops frame delivery immediately and is
//! safe to call any number of times. Releasing never waits for the capture
//! thread, which drops the device after its current read returns.

use crate::channel::{FrameSink, SubmitOutcome};
use crate::device::{CameraDevice, CameraInfo, CameraProvider};
use crate::error::{CaptureError, CaptureResult};
use crate::surface::{OverlayTarget, PreviewTarget};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, info, warn};

/// Identifier of a camera session within its manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub u64);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "camera-session-{}", self.0)
    }
}

/// Running capture thread of a started session
struct CaptureThread {
    running: Arc<AtomicBool>,
    sink: FrameSink,
    _handle: Option<JoinHandle<()>>,
}

/// One open camera device plus its preview binding
pub struct CameraSession {
    id: SessionId,
    info: CameraInfo,
    preview: Arc<dyn PreviewTarget>,
    overlay: Arc<dyn OverlayTarget>,
    /// Present until the capture thread takes ownership
    device: Option<Box<dyn CameraDevice>>,
    capture: Option<CaptureThread>,
    open: bool,
}

impl CameraSession {
    fn new(
        id: SessionId,
        device: Box<dyn CameraDevice>,
        preview: Arc<dyn PreviewTarget>,
        overlay: Arc<dyn OverlayTarget>,
    ) -> Self {
        let info = device.info().clone();
        overlay.set_camera_info(&info);

        Self {
            id,
            info,
            preview,
            overlay,
            device: Some(device),
            capture: None,
            open: true,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn info(&self) -> &CameraInfo {
        &self.info
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn is_streaming(&self) -> bool {
        self.capture.is_some()
    }

    /// Overlay bound to this session, written by the frame pipeline
    pub fn overlay(&self) -> Arc<dyn OverlayTarget> {
        self.overlay.clone()
    }

    /// Start the preview and push frames into `sink` from a capture thread
    fn start(&mut self, sink: FrameSink) -> CaptureResult<()> {
        if self.capture.is_some() {
            return Ok(());
        }
        let mut device = self.device.take().ok_or(CaptureError::NotAcquired)?;

        if let Err(e) = self
            .preview
            .attach(&self.info)
            .and_then(|_| device.start_preview(self.preview.as_ref()))
        {
            // Device is dropped here, which closes it
            device.stop_preview();
            return Err(CaptureError::PreviewStart(e));
        }

        let running = Arc::new(AtomicBool::new(true));
        let thread_running = running.clone();
        let thread_sink = sink.clone();
        let name = format!("{}-capture", self.id);

        let handle = std::thread::Builder::new()
            .name(name)
            .spawn(move || capture_loop(device, thread_sink, thread_running))
            .map_err(CaptureError::PreviewStart)?;

        info!(
            "{} streaming from {} ({}x{} @ {} fps)",
            self.id, self.info.name, self.info.width, self.info.height, self.info.fps
        );

        self.capture = Some(CaptureThread {
            running,
            sink,
            _handle: Some(handle),
        });
        Ok(())
    }

    /// Close the session. Idempotent.
    fn close(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;

        if let Some(capture) = self.capture.take() {
            capture.running.store(false, Ordering::SeqCst);
            capture.sink.close();
        }
        if let Some(mut device) = self.device.take() {
            device.stop_preview();
        }

        self.preview.detach();
        self.overlay.clear();
        debug!("{} closed", self.id);
    }
}

impl Drop for CameraSession {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for CameraSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CameraSession")
            .field("id", &self.id)
            .field("camera", &self.info.name)
            .field("open", &self.open)
            .field("streaming", &self.capture.is_some())
            .finish()
    }
}

fn capture_loop(mut device: Box<dyn CameraDevice>, sink: FrameSink, running: Arc<AtomicBool>) {
    while running.load(Ordering::SeqCst) {
        match device.next_frame() {
            Ok(Some(frame)) => {
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                if sink.submit(frame) == SubmitOutcome::Closed {
                    debug!("Frame consumer closed, stopping capture");
                    break;
                }
            }
            Ok(None) => {
                // Lets the pipeline see the end of the stream
                info!("Camera stream ended");
                sink.close();
                break;
            }
            Err(e) => {
                warn!("Camera read error: {}", e);
            }
        }
    }

    device.stop_preview();
    debug!("Capture thread exiting");
}

/// Owns the camera for one host screen
pub struct CameraResourceManager {
    provider: Arc<dyn CameraProvider>,
    session: Option<CameraSession>,
    next_id: u64,
}

impl CameraResourceManager {
    pub fn new(provider: Arc<dyn CameraProvider>) -> Self {
        Self {
            provider,
            session: None,
            next_id: 1,
        }
    }

    /// Open the camera and bind the surfaces
    pub fn acquire(
        &mut self,
        preview: Arc<dyn PreviewTarget>,
        overlay: Arc<dyn OverlayTarget>,
    ) -> CaptureResult<SessionId> {
        if self.session.is_some() {
            return Err(CaptureError::SessionActive);
        }
        if self.provider.camera_count() == 0 {
            return Err(CaptureError::NoCameraHardware);
        }

        let device = self.provider.open()?;
        let id = SessionId(self.next_id);
        self.next_id += 1;

        let session = CameraSession::new(id, device, preview, overlay);
        info!("{} acquired {}", id, session.info().name);
        self.session = Some(session);
        Ok(id)
    }

    /// Start preview and frame delivery for the acquired session.
    ///
    /// On failure the session is force-released so a later `acquire` can
    /// retry; the error is returned to the caller.
    pub fn start(&mut self, sink: FrameSink) -> CaptureResult<()> {
        let session = self.session.as_mut().ok_or(CaptureError::NotAcquired)?;

        if let Err(e) = session.start(sink) {
            warn!("Unable to start camera session: {}", e);
            self.release();
            return Err(e);
        }
        Ok(())
    }

    /// Release the session if any. Returns whether a session was open.
    pub fn release(&mut self) -> bool {
        match self.session.take() {
            Some(mut session) => {
                session.close();
                info!("{} released", session.id());
                true
            }
            None => false,
        }
    }

    pub fn is_acquired(&self) -> bool {
        self.session.is_some()
    }

    pub fn session(&self) -> Option<&CameraSession> {
        self.session.as_ref()
    }
}

impl Drop for CameraResourceManager {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::channel::frame_channel;
    use crate::surface::NullSurface;
    use qrsignin_core::{Frame, PixelFormat};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Scripted camera shared by the tests in this crate
    #[derive(Default)]
    pub(crate) struct FakeProvider {
        pub cameras: usize,
        pub claimed: Arc<AtomicBool>,
        pub closed: Arc<AtomicUsize>,
        pub fail_preview: bool,
        /// Frames delivered before the stream ends, unlimited if `None`
        pub frame_limit: Option<u64>,
    }

    struct FakeDevice {
        info: CameraInfo,
        sequence: u64,
        frame_limit: Option<u64>,
        claimed: Arc<AtomicBool>,
        closed: Arc<AtomicUsize>,
        fail_preview: bool,
    }

    impl CameraDevice for FakeDevice {
        fn info(&self) -> &CameraInfo {
            &self.info
        }

        fn start_preview(&mut self, _preview: &dyn PreviewTarget) -> std::io::Result<()> {
            if self.fail_preview {
                return Err(std::io::Error::new(std::io::ErrorKind::Other, "surface lost"));
            }
            Ok(())
        }

        fn next_frame(&mut self) -> CaptureResult<Option<Frame>> {
            std::thread::sleep(Duration::from_millis(2));
            if self.frame_limit.is_some_and(|limit| self.sequence >= limit) {
                return Ok(None);
            }
            self.sequence += 1;
            Ok(Some(Frame::new(vec![0; 4], PixelFormat::Luma8, 2, 2, self.sequence)))
        }

        fn stop_preview(&mut self) {}
    }

    impl Drop for FakeDevice {
        fn drop(&mut self) {
            self.claimed.store(false, Ordering::SeqCst);
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl CameraProvider for FakeProvider {
        fn camera_count(&self) -> usize {
            self.cameras
        }

        fn open(&self) -> CaptureResult<Box<dyn CameraDevice>> {
            if self.claimed.swap(true, Ordering::SeqCst) {
                return Err(CaptureError::CameraInUse("fake".to_string()));
            }
            Ok(Box::new(FakeDevice {
                info: CameraInfo::new("fake0", "Fake Camera", 2, 2, 500),
                sequence: 0,
                frame_limit: self.frame_limit,
                claimed: self.claimed.clone(),
                closed: self.closed.clone(),
                fail_preview: self.fail_preview,
            }))
        }
    }

    fn surfaces() -> (Arc<dyn PreviewTarget>, Arc<dyn OverlayTarget>) {
        (Arc::new(NullSurface), Arc::new(NullSurface))
    }

    #[test]
    fn test_no_camera_hardware() {
        let provider = Arc::new(FakeProvider::default());
        let mut manager = CameraResourceManager::new(provider);
        let (preview, overlay) = surfaces();

        let result = manager.acquire(preview, overlay);
        assert!(matches!(result, Err(CaptureError::NoCameraHardware)));
        assert!(!manager.is_acquired());
    }

    #[test]
    fn test_single_session_per_manager() {
        let provider = Arc::new(FakeProvider {
            cameras: 1,
            ..Default::default()
        });
        let mut manager = CameraResourceManager::new(provider);

        let (preview, overlay) = surfaces();
        manager.acquire(preview, overlay).unwrap();

        let (preview, overlay) = surfaces();
        assert!(matches!(
            manager.acquire(preview, overlay),
            Err(CaptureError::SessionActive)
        ));
    }

    #[test]
    fn test_camera_claimed_elsewhere() {
        let provider = Arc::new(FakeProvider {
            cameras: 1,
            ..Default::default()
        });
        provider.claimed.store(true, Ordering::SeqCst);
        let mut manager = CameraResourceManager::new(provider);

        let (preview, overlay) = surfaces();
        assert!(matches!(
            manager.acquire(preview, overlay),
            Err(CaptureError::CameraInUse(_))
        ));
    }

    #[test]
    fn test_release_is_idempotent() {
        let provider = Arc::new(FakeProvider {
            cameras: 1,
            ..Default::default()
        });
        let mut manager = CameraResourceManager::new(provider.clone());

        let (preview, overlay) = surfaces();
        manager.acquire(preview, overlay).unwrap();
        assert!(manager.release());
        assert!(!manager.release());
        assert_eq!(provider.closed.load(Ordering::SeqCst), 1);

        // Reacquire after release
        let (preview, overlay) = surfaces();
        manager.acquire(preview, overlay).unwrap();
    }

    #[test]
    fn test_preview_failure_resets_manager() {
        let provider = Arc::new(FakeProvider {
            cameras: 1,
            fail_preview: true,
            ..Default::default()
        });
        let mut manager = CameraResourceManager::new(provider.clone());

        let (preview, overlay) = surfaces();
        manager.acquire(preview, overlay).unwrap();

        let (sink, _source) = frame_channel();
        let result = manager.start(sink);
        assert!(matches!(result, Err(CaptureError::PreviewStart(_))));
        assert!(!manager.is_acquired());
        assert!(!provider.claimed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_no_frames_after_release() {
        let provider = Arc::new(FakeProvider {
            cameras: 1,
            ..Default::default()
        });
        let mut manager = CameraResourceManager::new(provider.clone());

        let (preview, overlay) = surfaces();
        manager.acquire(preview, overlay).unwrap();

        let (sink, mut source) = frame_channel();
        manager.start(sink).unwrap();
        assert!(manager.session().unwrap().is_streaming());

        let (first, permit) = source.recv().await.unwrap();
        assert_eq!(first.sequence, 1);
        drop(permit);

        manager.release();
        assert!(source.recv().await.is_none());

        // The capture thread drops the device after its current read
        for _ in 0..100 {
            if provider.closed.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(provider.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stream_end_closes_channel() {
        let provider = Arc::new(FakeProvider {
            cameras: 1,
            frame_limit: Some(2),
            ..Default::default()
        });
        let mut manager = CameraResourceManager::new(provider.clone());

        let (preview, overlay) = surfaces();
        manager.acquire(preview, overlay).unwrap();

        let (sink, mut source) = frame_channel();
        manager.start(sink).unwrap();

        // The session still holds its sink, so only closing ends the stream
        let drained = tokio::time::timeout(Duration::from_secs(2), async {
            while let Some((_frame, permit)) = source.recv().await {
                drop(permit);
            }
        })
        .await;
        assert!(drained.is_ok());
        assert!(source.is_closed());
        assert!(manager.is_acquired());

        manager.release();
        for _ in 0..100 {
            if provider.closed.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(provider.closed.load(Ordering::SeqCst), 1);
    }

    struct RecordingPreview {
        events: Mutex<Vec<&'static str>>,
    }

    impl PreviewTarget for RecordingPreview {
        fn attach(&self, _camera: &CameraInfo) -> std::io::Result<()> {
            self.events.lock().unwrap().push("attach");
            Ok(())
        }

        fn detach(&self) {
            self.events.lock().unwrap().push("detach");
        }
    }

    #[test]
    fn test_drop_releases_session() {
        let provider = Arc::new(FakeProvider {
            cameras: 1,
            ..Default::default()
        });
        let preview = Arc::new(RecordingPreview {
            events: Mutex::new(Vec::new()),
        });

        {
            let mut manager = CameraResourceManager::new(provider.clone());
            manager.acquire(preview.clone(), Arc::new(NullSurface)).unwrap();
        }

        assert_eq!(*preview.events.lock().unwrap(), vec!["detach"]);
        assert_eq!(provider.closed.load(Ordering::SeqCst), 1);
    }
}

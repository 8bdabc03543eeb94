//! Camera backed by a directory of still images
//!
//! Each PNG or JPEG file in the directory, in name order, becomes one
//! greyscale frame delivered at the configured rate. Used for headless
//! scanning and for driving the pipeline in tests.

use crate::device::{CameraDevice, CameraInfo, CameraProvider};
use crate::error::{CaptureError, CaptureResult};
use crate::surface::PreviewTarget;
use qrsignin_core::{Frame, PixelFormat};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

/// Provides a single [`ImageDirectoryCamera`] over a directory
#[derive(Debug, Clone)]
pub struct ImageDirectoryProvider {
    dir: PathBuf,
    fps: u32,
    looping: bool,
    claimed: Arc<AtomicBool>,
}

impl ImageDirectoryProvider {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            fps: 30,
            looping: false,
            claimed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Builder pattern: set frame rate
    pub fn with_fps(mut self, fps: u32) -> Self {
        self.fps = fps.max(1);
        self
    }

    /// Builder pattern: restart from the first image after the last one
    pub fn with_looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn images(&self) -> Vec<PathBuf> {
        list_images(&self.dir).unwrap_or_default()
    }
}

impl CameraProvider for ImageDirectoryProvider {
    fn camera_count(&self) -> usize {
        if self.images().is_empty() {
            0
        } else {
            1
        }
    }

    fn open(&self) -> CaptureResult<Box<dyn CameraDevice>> {
        let images = list_images(&self.dir)
            .map_err(|e| CaptureError::Device(format!("{}: {}", self.dir.display(), e)))?;
        if images.is_empty() {
            return Err(CaptureError::NoCameraHardware);
        }
        if self.claimed.swap(true, Ordering::SeqCst) {
            return Err(CaptureError::CameraInUse(self.dir.display().to_string()));
        }

        let camera = ImageDirectoryCamera::open(images, self.fps, self.looping, self.claimed.clone());
        match camera {
            Ok(camera) => Ok(Box::new(camera)),
            Err(e) => {
                self.claimed.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }
}

/// A camera replaying image files
pub struct ImageDirectoryCamera {
    info: CameraInfo,
    images: Vec<PathBuf>,
    position: usize,
    sequence: u64,
    looping: bool,
    interval: Duration,
    streaming: bool,
    claimed: Arc<AtomicBool>,
}

impl ImageDirectoryCamera {
    fn open(
        images: Vec<PathBuf>,
        fps: u32,
        looping: bool,
        claimed: Arc<AtomicBool>,
    ) -> CaptureResult<Self> {
        // Frame geometry comes from the first image
        let (width, height) = image::image_dimensions(&images[0])
            .map_err(|e| CaptureError::Device(format!("{}: {}", images[0].display(), e)))?;
        let name = images[0]
            .parent()
            .map(|p| p.display().to_string())
            .unwrap_or_default();

        Ok(Self {
            info: CameraInfo::new("image-dir", name, width, height, fps),
            images,
            position: 0,
            sequence: 0,
            looping,
            interval: Duration::from_micros(1_000_000 / fps.max(1) as u64),
            streaming: false,
            claimed,
        })
    }

    fn decode(&self, path: &Path) -> CaptureResult<Frame> {
        let luma = image::open(path)
            .map_err(|e| CaptureError::Device(format!("{}: {}", path.display(), e)))?
            .to_luma8();
        let (width, height) = luma.dimensions();
        Ok(Frame::new(
            luma.into_raw(),
            PixelFormat::Luma8,
            width,
            height,
            self.sequence,
        ))
    }
}

impl CameraDevice for ImageDirectoryCamera {
    fn info(&self) -> &CameraInfo {
        &self.info
    }

    fn start_preview(&mut self, _preview: &dyn PreviewTarget) -> std::io::Result<()> {
        self.streaming = true;
        debug!("Replaying {} images", self.images.len());
        Ok(())
    }

    fn next_frame(&mut self) -> CaptureResult<Option<Frame>> {
        if !self.streaming {
            return Ok(None);
        }
        if self.position >= self.images.len() {
            if !self.looping {
                return Ok(None);
            }
            self.position = 0;
        }

        std::thread::sleep(self.interval);

        let path = self.images[self.position].clone();
        self.position += 1;
        self.sequence += 1;

        match self.decode(&path) {
            Ok(frame) => Ok(Some(frame)),
            Err(e) => {
                warn!("Skipping unreadable image: {}", e);
                Err(e)
            }
        }
    }

    fn stop_preview(&mut self) {
        self.streaming = false;
    }
}

impl Drop for ImageDirectoryCamera {
    fn drop(&mut self) {
        self.claimed.store(false, Ordering::SeqCst);
    }
}

fn list_images(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut images: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
                .unwrap_or(false)
        })
        .collect();
    images.sort();
    Ok(images)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::NullSurface;
    use image::{GrayImage, Luma};
    use tempfile::tempdir;

    fn write_image(dir: &Path, name: &str, shade: u8) {
        let img = GrayImage::from_pixel(8, 6, Luma([shade]));
        img.save(dir.join(name)).unwrap();
    }

    #[test]
    fn test_empty_directory_has_no_camera() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "not an image").unwrap();

        let provider = ImageDirectoryProvider::new(dir.path());
        assert_eq!(provider.camera_count(), 0);
        assert!(matches!(provider.open(), Err(CaptureError::NoCameraHardware)));
    }

    #[test]
    fn test_frames_in_name_order() {
        let dir = tempdir().unwrap();
        write_image(dir.path(), "b.png", 200);
        write_image(dir.path(), "a.png", 10);

        let provider = ImageDirectoryProvider::new(dir.path()).with_fps(1000);
        let mut camera = provider.open().unwrap();
        assert_eq!(camera.info().width, 8);
        assert_eq!(camera.info().height, 6);

        camera.start_preview(&NullSurface).unwrap();

        let first = camera.next_frame().unwrap().unwrap();
        assert_eq!(first.format, PixelFormat::Luma8);
        assert_eq!(first.sequence, 1);
        assert_eq!(first.data()[0], 10);

        let second = camera.next_frame().unwrap().unwrap();
        assert_eq!(second.data()[0], 200);

        assert!(camera.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_looping_restarts() {
        let dir = tempdir().unwrap();
        write_image(dir.path(), "only.png", 42);

        let provider = ImageDirectoryProvider::new(dir.path())
            .with_fps(1000)
            .with_looping(true);
        let mut camera = provider.open().unwrap();
        camera.start_preview(&NullSurface).unwrap();

        for expected in 1..=3 {
            let frame = camera.next_frame().unwrap().unwrap();
            assert_eq!(frame.sequence, expected);
        }
    }

    #[test]
    fn test_exclusive_claim() {
        let dir = tempdir().unwrap();
        write_image(dir.path(), "a.png", 0);

        let provider = ImageDirectoryProvider::new(dir.path());
        let camera = provider.open().unwrap();
        assert!(matches!(provider.open(), Err(CaptureError::CameraInUse(_))));

        drop(camera);
        assert!(provider.open().is_ok());
    }
}

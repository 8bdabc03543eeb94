//! Barcode detection on single frames

use crate::error::{ScanError, ScanResult};
use qrsignin_core::{Frame, Point, Quad, TieBreak};
use tracing::{debug, trace};

/// One barcode found in a frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Barcode {
    /// Decoded payload, `None` when the code was located but could not be read
    pub raw: Option<String>,
    /// Corners of the code in frame coordinates
    pub bounds: Quad,
}

impl Barcode {
    pub fn new(raw: impl Into<String>, bounds: Quad) -> Self {
        Self {
            raw: Some(raw.into()),
            bounds,
        }
    }

    pub fn unreadable(bounds: Quad) -> Self {
        Self { raw: None, bounds }
    }
}

/// Everything one detection pass found in one frame
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetectionResult {
    /// Sequence number of the frame the pass ran on
    pub sequence: u64,
    /// Barcodes in detector order
    pub barcodes: Vec<Barcode>,
}

impl DetectionResult {
    pub fn new(sequence: u64, barcodes: Vec<Barcode>) -> Self {
        Self { sequence, barcodes }
    }

    pub fn is_empty(&self) -> bool {
        self.barcodes.is_empty()
    }

    pub fn regions(&self) -> Vec<Quad> {
        self.barcodes.iter().map(|b| b.bounds).collect()
    }

    /// Pick the payload this frame reports.
    ///
    /// Returns `Ok(None)` for an empty result. Selecting a barcode whose
    /// payload could not be read is a detection failure for this frame.
    pub fn select(&self, tie_break: TieBreak) -> ScanResult<Option<&str>> {
        let chosen = match tie_break {
            TieBreak::First => self.barcodes.first(),
            TieBreak::Last => self.barcodes.last(),
        };

        match chosen {
            None => Ok(None),
            Some(Barcode { raw: Some(raw), .. }) => Ok(Some(raw.as_str())),
            Some(Barcode { raw: None, .. }) => Err(ScanError::Detection(format!(
                "barcode in frame {} has no payload",
                self.sequence
            ))),
        }
    }
}

/// Decodes barcodes from a frame.
///
/// Runs on a blocking worker, never on the thread that owns the screen.
pub trait BarcodeDetector: Send + Sync + 'static {
    fn detect(&self, frame: &Frame) -> ScanResult<DetectionResult>;
}

/// QR code detector backed by rqrr
#[derive(Debug, Clone, Copy, Default)]
pub struct QrDetector;

impl QrDetector {
    pub fn new() -> Self {
        Self
    }
}

impl BarcodeDetector for QrDetector {
    fn detect(&self, frame: &Frame) -> ScanResult<DetectionResult> {
        if !frame.is_valid() {
            return Err(ScanError::Detection(format!(
                "frame {} is truncated ({} bytes for {}x{})",
                frame.sequence,
                frame.size(),
                frame.width,
                frame.height
            )));
        }

        let width = frame.width as usize;
        let height = frame.height as usize;
        let luma = frame.luma();

        let mut prepared =
            rqrr::PreparedImage::prepare_from_greyscale(width, height, |x, y| luma[y * width + x]);
        let grids = prepared.detect_grids();
        trace!("Frame {}: {} candidate grids", frame.sequence, grids.len());

        let barcodes = grids
            .into_iter()
            .map(|grid| {
                let bounds = Quad::new(grid.bounds.map(|p| Point { x: p.x, y: p.y }));
                match grid.decode() {
                    Ok((_, content)) => Barcode::new(content, bounds),
                    Err(e) => {
                        debug!("Grid decode failed in frame {}: {:?}", frame.sequence, e);
                        Barcode::unreadable(bounds)
                    }
                }
            })
            .collect();

        Ok(DetectionResult::new(frame.sequence, barcodes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qrcode::QrCode;
    use qrsignin_core::PixelFormat;

    fn barcode(raw: &str) -> Barcode {
        Barcode::new(raw, Quad::default())
    }

    #[test]
    fn test_last_payload_wins_by_default() {
        let result = DetectionResult::new(1, vec![barcode("A"), barcode("B")]);
        assert_eq!(result.select(TieBreak::default()).unwrap(), Some("B"));
        assert_eq!(result.select(TieBreak::First).unwrap(), Some("A"));
    }

    #[test]
    fn test_empty_result_selects_nothing() {
        let result = DetectionResult::new(1, Vec::new());
        assert!(result.is_empty());
        assert_eq!(result.select(TieBreak::Last).unwrap(), None);
    }

    #[test]
    fn test_unreadable_selection_fails_frame() {
        let result = DetectionResult::new(
            3,
            vec![barcode("A"), Barcode::unreadable(Quad::default())],
        );
        assert!(matches!(result.select(TieBreak::Last), Err(ScanError::Detection(_))));
        assert_eq!(result.select(TieBreak::First).unwrap(), Some("A"));
    }

    #[test]
    fn test_qr_detector_reads_rendered_code() {
        let code = QrCode::new(b"qrAuth$hello").unwrap();
        let image = code
            .render::<image::Luma<u8>>()
            .quiet_zone(true)
            .module_dimensions(4, 4)
            .build();
        let (width, height) = image.dimensions();
        let frame = Frame::new(image.into_raw(), PixelFormat::Luma8, width, height, 9);

        let result = QrDetector::new().detect(&frame).unwrap();
        assert_eq!(result.sequence, 9);
        assert_eq!(result.select(TieBreak::Last).unwrap(), Some("qrAuth$hello"));
        assert_eq!(result.regions().len(), 1);
    }

    #[test]
    fn test_qr_detector_blank_frame() {
        let frame = Frame::new(vec![255; 64 * 64], PixelFormat::Luma8, 64, 64, 1);
        let result = QrDetector::new().detect(&frame).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn test_qr_detector_rejects_truncated_frame() {
        let frame = Frame::new(vec![0; 10], PixelFormat::Luma8, 64, 64, 1);
        assert!(QrDetector::new().detect(&frame).is_err());
    }
}

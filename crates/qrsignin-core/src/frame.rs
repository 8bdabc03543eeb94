//! Frame representation for captured camera data
//!
//! A frame is produced by a camera session and owned by the frame processing
//! pipeline for the duration of one detection pass.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::sync::Arc;

/// Pixel layout of a frame buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// 8-bit greyscale, one byte per pixel
    Luma8,
    /// 8-bit RGBA
    Rgba8,
    /// 8-bit BGRA
    Bgra8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Luma8 => 1,
            PixelFormat::Rgba8 | PixelFormat::Bgra8 => 4,
        }
    }
}

/// Sensor orientation relative to the natural display orientation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Orientation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Orientation {
    /// Orientation from a rotation in degrees (rounded down to a quarter turn)
    pub fn from_degrees(degrees: u32) -> Self {
        match (degrees % 360) / 90 {
            1 => Orientation::Deg90,
            2 => Orientation::Deg180,
            3 => Orientation::Deg270,
            _ => Orientation::Deg0,
        }
    }

    pub fn degrees(&self) -> u32 {
        match self {
            Orientation::Deg0 => 0,
            Orientation::Deg90 => 90,
            Orientation::Deg180 => 180,
            Orientation::Deg270 => 270,
        }
    }
}

/// Integer pixel position within a frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

/// Four corners of a detected region, in detector order
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quad {
    pub corners: [Point; 4],
}

impl Quad {
    pub fn new(corners: [Point; 4]) -> Self {
        Self { corners }
    }

    /// Axis-aligned bounds as (min_x, min_y, max_x, max_y)
    pub fn bounds(&self) -> (i32, i32, i32, i32) {
        let xs = self.corners.iter().map(|p| p.x);
        let ys = self.corners.iter().map(|p| p.y);
        (
            xs.clone().min().unwrap_or(0),
            ys.clone().min().unwrap_or(0),
            xs.max().unwrap_or(0),
            ys.max().unwrap_or(0),
        )
    }
}

/// Represents a captured camera frame
#[derive(Clone)]
pub struct Frame {
    /// Raw pixel data
    data: Arc<Vec<u8>>,
    /// Pixel layout of `data`
    pub format: PixelFormat,
    /// Frame width
    pub width: u32,
    /// Frame height
    pub height: u32,
    /// Frame sequence number within its camera session
    pub sequence: u64,
    /// Capture timestamp in microseconds
    pub timestamp_us: u64,
    /// Sensor orientation
    pub orientation: Orientation,
}

impl Frame {
    /// Create a new frame stamped with the current time
    pub fn new(data: Vec<u8>, format: PixelFormat, width: u32, height: u32, sequence: u64) -> Self {
        let timestamp_us = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or(0);

        Self {
            data: Arc::new(data),
            format,
            width,
            height,
            sequence,
            timestamp_us,
            orientation: Orientation::Deg0,
        }
    }

    /// Builder pattern: set orientation
    pub fn with_orientation(mut self, orientation: Orientation) -> Self {
        self.orientation = orientation;
        self
    }

    /// Get the raw pixel data as a slice
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Get the number of bytes per row (stride)
    pub fn stride(&self) -> usize {
        self.width as usize * self.format.bytes_per_pixel()
    }

    /// Get total size in bytes
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Check if frame dimensions are valid
    pub fn is_valid(&self) -> bool {
        let expected_size = self.stride() * self.height as usize;
        self.data.len() >= expected_size && self.width > 0 && self.height > 0
    }

    /// Greyscale view of the frame, converting colour formats on demand
    pub fn luma(&self) -> Cow<'_, [u8]> {
        let pixels = self.width as usize * self.height as usize;
        match self.format {
            PixelFormat::Luma8 => Cow::Borrowed(&self.data[..pixels.min(self.data.len())]),
            PixelFormat::Rgba8 => Cow::Owned(
                self.data
                    .chunks_exact(4)
                    .take(pixels)
                    .map(|px| luminance(px[0], px[1], px[2]))
                    .collect(),
            ),
            PixelFormat::Bgra8 => Cow::Owned(
                self.data
                    .chunks_exact(4)
                    .take(pixels)
                    .map(|px| luminance(px[2], px[1], px[0]))
                    .collect(),
            ),
        }
    }
}

/// ITU-R BT.601 luma in integer arithmetic
fn luminance(r: u8, g: u8, b: u8) -> u8 {
    ((299 * r as u32 + 587 * g as u32 + 114 * b as u32) / 1000) as u8
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("format", &self.format)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("sequence", &self.sequence)
            .field("orientation", &self.orientation)
            .field("size", &self.data.len())
            .finish()
    }
}

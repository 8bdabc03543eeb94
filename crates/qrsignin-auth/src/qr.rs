//! QR code image rendering

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use image::{imageops, DynamicImage, GrayImage, ImageFormat, Luma};
use qrcode::{EcLevel, QrCode};
use serde::{Deserialize, Serialize};
use std::io::Cursor;

/// How a QR code is drawn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QrImageOptions {
    /// Pixels per module
    pub scale: u32,
    /// Quiet zone width, in modules
    pub margin: u32,
}

impl Default for QrImageOptions {
    fn default() -> Self {
        Self {
            scale: 6,
            margin: 4,
        }
    }
}

/// Render `data` as a PNG QR code with low error correction
pub fn render_png(data: &str, options: QrImageOptions) -> Result<Vec<u8>, String> {
    let code = QrCode::with_error_correction_level(data.as_bytes(), EcLevel::L)
        .map_err(|e| format!("Failed to encode QR code: {}", e))?;

    let scale = options.scale.max(1);
    let modules = code
        .render::<Luma<u8>>()
        .quiet_zone(false)
        .module_dimensions(scale, scale)
        .dark_color(Luma([0]))
        .light_color(Luma([255]))
        .build();

    let border = options.margin * scale;
    let mut canvas = GrayImage::from_pixel(
        modules.width() + 2 * border,
        modules.height() + 2 * border,
        Luma([255]),
    );
    imageops::overlay(&mut canvas, &modules, border as i64, border as i64);

    let mut png = Vec::new();
    DynamicImage::ImageLuma8(canvas)
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .map_err(|e| format!("Failed to encode PNG: {}", e))?;
    Ok(png)
}

/// A PNG image as a `data:` URL
pub struct PngDataUrl<'a>(pub &'a [u8]);

impl std::fmt::Display for PngDataUrl<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "data:image/png;base64,{}", BASE64.encode(self.0))
    }
}

//! Image decoding: encoded bytes to an RGB pixel grid.
//!
//! Decoding failures are routine for an upload endpoint, so every malformed
//! input maps onto a [`DecodeError`] and nothing here panics.

use image::RgbImage;
use thiserror::Error;

/// Largest accepted width or height, in pixels.
pub const MAX_IMAGE_DIMENSION: u32 = 16_384;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("empty image buffer")]
    Empty,
    #[error("invalid image or unsupported format: {0}")]
    Unsupported(#[from] image::ImageError),
    #[error("image decodes to an empty raster")]
    EmptyRaster,
    #[error("image too large ({width}x{height} px, max {MAX_IMAGE_DIMENSION})")]
    TooLarge { width: u32, height: u32 },
}

/// A decoded 3-channel raster. Width and height are always non-zero.
#[derive(Debug, Clone)]
pub struct PixelGrid {
    rgb: RgbImage,
}

impl PixelGrid {
    /// Wrap an already-decoded RGB image, enforcing the raster invariants.
    pub fn from_rgb(rgb: RgbImage) -> Result<Self, DecodeError> {
        let (width, height) = rgb.dimensions();
        if width == 0 || height == 0 {
            return Err(DecodeError::EmptyRaster);
        }
        if width > MAX_IMAGE_DIMENSION || height > MAX_IMAGE_DIMENSION {
            return Err(DecodeError::TooLarge { width, height });
        }
        Ok(Self { rgb })
    }

    pub fn width(&self) -> u32 {
        self.rgb.width()
    }

    pub fn height(&self) -> u32 {
        self.rgb.height()
    }

    pub fn rgb(&self) -> &RgbImage {
        &self.rgb
    }

    /// Bilinear sample of channel `c` at a sub-pixel position.
    /// Coordinates outside the raster read as black.
    pub fn sample(&self, x: f32, y: f32, c: usize) -> f32 {
        let (w, h) = (self.width() as i64, self.height() as i64);
        let x0 = x.floor();
        let y0 = y.floor();
        let fx = x - x0;
        let fy = y - y0;
        let px = |xi: i64, yi: i64| -> f32 {
            if xi < 0 || yi < 0 || xi >= w || yi >= h {
                0.0
            } else {
                self.rgb.get_pixel(xi as u32, yi as u32)[c] as f32
            }
        };
        let (xi, yi) = (x0 as i64, y0 as i64);
        let top = px(xi, yi) * (1.0 - fx) + px(xi + 1, yi) * fx;
        let bottom = px(xi, yi + 1) * (1.0 - fx) + px(xi + 1, yi + 1) * fx;
        top * (1.0 - fy) + bottom * fy
    }
}

/// Decode an encoded image (JPEG, PNG, WebP, ...) into RGB.
pub fn decode(bytes: &[u8]) -> Result<PixelGrid, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }
    let image = image::load_from_memory(bytes)?;
    PixelGrid::from_rgb(image.to_rgb8())
}

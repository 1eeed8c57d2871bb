//! Frame container.
//!
//! `Frame` wraps an RGB pixel grid. Frames are treated as immutable once
//! captured: resizing and annotation produce new frames, so the pipeline can
//! keep an untouched reference frame while emitting an annotated copy.

use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{GrayImage, Rgb, RgbImage};

/// Working resolution every frame is normalized to before analysis.
pub const DEFAULT_FRAME_WIDTH: u32 = 640;
pub const DEFAULT_FRAME_HEIGHT: u32 = 480;

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    image: RgbImage,
}

impl Frame {
    /// Build a frame from packed RGB24 bytes.
    pub fn from_rgb(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("RGB frame dimensions overflow"))?;
        if data.len() != expected {
            return Err(anyhow!(
                "RGB frame length mismatch: expected {}, got {}",
                expected,
                data.len()
            ));
        }
        let image = RgbImage::from_raw(width, height, data)
            .ok_or_else(|| anyhow!("RGB buffer does not match {}x{}", width, height))?;
        Ok(Self { image })
    }

    pub fn from_image(image: RgbImage) -> Self {
        Self { image }
    }

    /// Uniformly colored frame.
    pub fn solid(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        Self {
            image: RgbImage::from_pixel(width, height, Rgb(rgb)),
        }
    }

    /// Decode a JPEG (or any format the `image` build supports) into a frame.
    pub fn decode_jpeg(bytes: &[u8]) -> Result<Self> {
        let decoded = image::load_from_memory(bytes).context("decode jpeg")?;
        Ok(Self {
            image: decoded.into_rgb8(),
        })
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    /// Resize to `width` x `height`. Frames already at that size pass through untouched.
    pub fn resized(self, width: u32, height: u32) -> Self {
        if self.width() == width && self.height() == height {
            return self;
        }
        Self {
            image: imageops::resize(&self.image, width, height, FilterType::Triangle),
        }
    }

    /// Single-channel intensity image.
    pub fn intensity(&self) -> GrayImage {
        imageops::grayscale(&self.image)
    }

    /// Copy of this frame with an axis-aligned rectangle filled in `rgb`.
    /// The rectangle is clipped to the frame bounds.
    pub fn with_filled_rect(&self, x: u32, y: u32, width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let mut image = self.image.clone();
        let x_end = x.saturating_add(width).min(image.width());
        let y_end = y.saturating_add(height).min(image.height());
        for py in y.min(y_end)..y_end {
            for px in x.min(x_end)..x_end {
                image.put_pixel(px, py, Rgb(rgb));
            }
        }
        Self { image }
    }

    /// Encode as baseline JPEG with the given quality (1..=100).
    pub fn encode_jpeg(&self, quality: u8) -> Result<Vec<u8>> {
        if self.width() == 0 || self.height() == 0 {
            return Err(anyhow!("cannot encode an empty frame"));
        }
        let mut buf = Vec::with_capacity(64 * 1024);
        let mut encoder = JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100));
        encoder.encode_image(&self.image).context("encode jpeg")?;
        Ok(buf)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

//! Luma-key background removal.
//!
//! Pixels whose every channel is at or above the threshold are treated as
//! background and made fully transparent; everything else stays opaque.
//! The output is always an RGBA PNG of the same dimensions.

use std::io::Cursor;

use image::{GrayImage, ImageFormat, Luma, RgbaImage};

use crate::device::Device;
use crate::engine::{EngineFactory, InferenceEngine, InferenceError};
use crate::format::sniff_image;

pub const DEFAULT_LUMA_THRESHOLD: u8 = 240;

/// Keys out near-white backgrounds.
#[derive(Debug, Clone)]
pub struct LumaKeyEngine {
    device: Device,
    threshold: u8,
}

impl LumaKeyEngine {
    pub fn new(device: Device, threshold: u8) -> Self {
        Self { device, threshold }
    }

    fn decode(&self, bytes: &[u8]) -> Result<RgbaImage, InferenceError> {
        sniff_image(bytes)?;
        let decoded = image::load_from_memory(bytes)
            .map_err(|e| InferenceError::InvalidImage(e.to_string()))?;
        Ok(decoded.to_rgba8())
    }

    fn mask(&self, image: &RgbaImage) -> GrayImage {
        GrayImage::from_fn(image.width(), image.height(), |x, y| {
            let [r, g, b, _] = image.get_pixel(x, y).0;
            let background = r.min(g).min(b) >= self.threshold;
            Luma([if background { 0 } else { 255 }])
        })
    }

    fn encode(image: &RgbaImage) -> Result<Vec<u8>, InferenceError> {
        let mut out = Cursor::new(Vec::new());
        image
            .write_to(&mut out, ImageFormat::Png)
            .map_err(|e| InferenceError::Failed(format!("PNG encoding failed: {e}")))?;
        Ok(out.into_inner())
    }
}

impl InferenceEngine for LumaKeyEngine {
    fn infer(&mut self, bytes: &[u8]) -> Result<Vec<u8>, InferenceError> {
        let mut image = self.decode(bytes)?;
        let mask = self.mask(&image);
        for (pixel, alpha) in image.pixels_mut().zip(mask.pixels()) {
            pixel.0[3] = pixel.0[3].min(alpha.0[0]);
        }
        tracing::trace!(
            device = %self.device,
            width = image.width(),
            height = image.height(),
            "Luma key applied"
        );
        Self::encode(&image)
    }
}

/// Creates a [`LumaKeyEngine`] for any device.
#[derive(Debug, Clone)]
pub struct LumaKeyFactory {
    threshold: u8,
}

impl LumaKeyFactory {
    pub fn new(threshold: u8) -> Self {
        Self { threshold }
    }

    /// Threshold from `LUMA_KEY_THRESHOLD` (default `240`).
    pub fn from_env() -> Self {
        let threshold = std::env::var("LUMA_KEY_THRESHOLD")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_LUMA_THRESHOLD);
        Self::new(threshold)
    }
}

impl Default for LumaKeyFactory {
    fn default() -> Self {
        Self::new(DEFAULT_LUMA_THRESHOLD)
    }
}

impl EngineFactory for LumaKeyFactory {
    fn load(&self, device: Device) -> Result<Box<dyn InferenceEngine>, InferenceError> {
        tracing::info!(device = %device, threshold = self.threshold, "Loading luma-key engine");
        Ok(Box::new(LumaKeyEngine::new(device, self.threshold)))
    }
}

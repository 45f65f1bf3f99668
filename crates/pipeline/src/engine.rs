use crate::device::Device;

/// Error type for model loading and inference.
#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    /// The input bytes are not a decodable JPEG/PNG image.
    #[error("Invalid image: {0}")]
    InvalidImage(String),

    /// The model ran but could not produce a result.
    #[error("Inference failed: {0}")]
    Failed(String),

    /// The device or model is not available.
    #[error("Unsupported: {0}")]
    Unsupported(String),
}

/// A loaded model bound to one device.
///
/// `infer` is blocking and single-threaded per call; the worker runs it on
/// a blocking thread and never calls one engine concurrently.
pub trait InferenceEngine: Send {
    /// Turn an input image into a PNG with the background removed.
    fn infer(&mut self, image: &[u8]) -> Result<Vec<u8>, InferenceError>;
}

/// Loads one [`InferenceEngine`] per device at worker startup.
pub trait EngineFactory: Send + Sync {
    fn load(&self, device: Device) -> Result<Box<dyn InferenceEngine>, InferenceError>;
}

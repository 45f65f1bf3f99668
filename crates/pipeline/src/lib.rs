//! Inference seam for the worker pool.
//!
//! Workers never talk to a model directly. At startup each slot asks an
//! [`EngineFactory`] for an [`InferenceEngine`] bound to its [`Device`] and
//! keeps it for the life of the process, so the model is loaded once per
//! device. The built-in [`LumaKeyEngine`] keys out near-white backgrounds
//! and stands in for a segmentation model.

pub mod device;
pub mod engine;
pub mod format;
pub mod luma;

pub use device::{parse_device_list, Device};
pub use engine::{EngineFactory, InferenceEngine, InferenceError};
pub use format::{sniff_image, ImageKind};
pub use luma::{LumaKeyEngine, LumaKeyFactory, DEFAULT_LUMA_THRESHOLD};

use matte_db::{QueueError, StoreError};
use matte_events::DispatchError;
use matte_pipeline::{Device, InferenceError};

/// Error type for starting and running the worker runtime.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Failed to load engine on {device}: {source}")]
    EngineLoad {
        device: Device,
        #[source]
        source: InferenceError,
    },

    #[error("Job store error: {0}")]
    Store(#[from] StoreError),

    #[error("Job queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Dispatcher error: {0}")]
    Dispatch(#[from] DispatchError),
}

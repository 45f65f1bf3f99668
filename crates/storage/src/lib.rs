//! Artifact storage: uploaded inputs and produced results.
//!
//! - [`InputStore`] owns uploaded source images between submission and the
//!   end of processing.
//! - [`ResultSink`] persists result artifacts and returns a URL that is
//!   resolvable without this service.

use std::sync::Arc;

pub mod config;
pub mod error;
pub mod input;
pub mod local;
pub mod s3;
pub mod sink;

pub use config::{S3Config, StorageConfig};
pub use error::StorageError;
pub use input::InputStore;
pub use local::LocalResultSink;
pub use s3::S3ResultSink;
pub use sink::{result_key, ResultSink};

/// Build the configured result sink: S3 when credentials are present,
/// otherwise the local directory.
pub async fn build_sink(config: &StorageConfig) -> Result<Arc<dyn ResultSink>, StorageError> {
    match &config.s3 {
        Some(s3) => {
            let sink = S3ResultSink::connect(s3).await?;
            tracing::info!(bucket = %s3.bucket, "Using S3 result sink");
            Ok(Arc::new(sink))
        }
        None => {
            let sink = LocalResultSink::new(&config.result_dir, config.result_base_url.clone());
            tracing::info!(dir = %config.result_dir.display(), "S3 not configured, using local result sink");
            Ok(Arc::new(sink))
        }
    }
}

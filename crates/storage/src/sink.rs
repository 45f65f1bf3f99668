use async_trait::async_trait;
use matte_core::types::JobId;

use crate::error::StorageError;

/// Object key for a job's result. Stable per job, so a retried store
/// overwrites instead of duplicating.
pub fn result_key(job_id: JobId) -> String {
    format!("results/{job_id}.png")
}

/// Destination for result artifacts.
#[async_trait]
pub trait ResultSink: Send + Sync {
    /// Persist `artifact` for `job_id` and return its URL.
    ///
    /// Transient failures are reported as [`StorageError::Unavailable`].
    async fn store(&self, job_id: JobId, artifact: &[u8]) -> Result<String, StorageError>;

    /// Short backend name for logs and health output.
    fn backend(&self) -> &'static str;
}

//! Submission gateway: turns a saved upload into a queued job.
//!
//! The job record is written before the id is enqueued. If the enqueue
//! fails the pending record is discarded again, so a failed submission
//! never leaves a job behind.

use std::sync::Arc;

use matte_core::job::{CallbackConfig, Job};
use matte_core::types::JobId;
use matte_core::validation::validate_callback;
use matte_db::{JobQueue, JobStore};
use matte_storage::InputStore;

/// Submission-time failure. None of these create a job.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The input cannot be resolved or the callback is malformed.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The job could not be recorded or queued.
    #[error("Queue unavailable: {0}")]
    QueueUnavailable(String),

    #[error("Job not found: {0}")]
    NotFound(String),
}

pub struct SubmissionGateway {
    store: Arc<dyn JobStore>,
    queue: Arc<dyn JobQueue>,
    inputs: InputStore,
}

impl SubmissionGateway {
    pub fn new(store: Arc<dyn JobStore>, queue: Arc<dyn JobQueue>, inputs: InputStore) -> Self {
        Self {
            store,
            queue,
            inputs,
        }
    }

    pub fn inputs(&self) -> &InputStore {
        &self.inputs
    }

    /// Validate, record and enqueue a new job. Returns the pending job.
    pub async fn submit(
        &self,
        input_ref: &str,
        original_filename: Option<String>,
        callback: Option<CallbackConfig>,
    ) -> Result<Job, GatewayError> {
        self.inputs
            .resolve(input_ref)
            .await
            .map_err(|e| GatewayError::InvalidInput(e.to_string()))?;
        if let Some(callback) = &callback {
            validate_callback(callback).map_err(|e| GatewayError::InvalidInput(e.to_string()))?;
        }

        let job = Job::new(input_ref, original_filename, callback);
        self.store.insert(&job).await.map_err(|e| {
            tracing::error!(job_id = %job.id, error = %e, "Failed to record job");
            GatewayError::QueueUnavailable("Job could not be recorded".into())
        })?;

        if let Err(e) = self.queue.enqueue(job.id).await {
            tracing::error!(job_id = %job.id, error = %e, "Failed to enqueue job");
            if let Err(discard) = self.store.discard(job.id).await {
                tracing::error!(job_id = %job.id, error = %discard, "Failed to discard unqueued job");
            }
            return Err(GatewayError::QueueUnavailable("Job could not be queued".into()));
        }

        tracing::info!(
            job_id = %job.id,
            input_ref = %job.input_ref,
            callback = job.callback.is_some(),
            "Job submitted"
        );
        Ok(job)
    }

    pub async fn get(&self, job_id: JobId) -> Result<Job, GatewayError> {
        match self.store.get(job_id).await {
            Ok(Some(job)) => Ok(job),
            Ok(None) => Err(GatewayError::NotFound(job_id.to_string())),
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Failed to load job");
                Err(GatewayError::QueueUnavailable("Job store unavailable".into()))
            }
        }
    }
}

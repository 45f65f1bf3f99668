//! The [`JobStore`] trait: durable job records with atomic status updates.

use async_trait::async_trait;
use matte_core::job::{Job, JobStatus, JobUpdate};
use matte_core::types::{JobId, Timestamp};
use serde::Serialize;

/// Error type for job store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backing database failed (connection, query, pool exhaustion).
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A record was read back but could not be mapped to a [`Job`].
    #[error("Corrupt job record {id}: {reason}")]
    Corrupt { id: String, reason: String },

    /// A job with the same id already exists.
    #[error("Job already exists: {0}")]
    Duplicate(JobId),
}

/// Result of [`JobStore::advance`].
#[derive(Debug, Clone, PartialEq)]
pub enum Advance {
    /// The update was applied; carries the new snapshot.
    Applied(Job),
    /// The job was not in a status that accepts the update, or another
    /// writer changed it first. Carries the status that was observed.
    Rejected(JobStatus),
    /// No job with that id exists.
    Missing,
}

/// Liveness record written by each worker slot on every loop iteration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlotHeartbeat {
    pub slot: String,
    pub device: String,
    pub current_job: Option<JobId>,
    pub seen_at: Timestamp,
}

/// Durable key-value record of job state.
///
/// Every status change goes through [`compare_and_set`](JobStore::compare_and_set),
/// which only writes when the stored status and attempt count still match
/// the snapshot the change was computed from. That check is what guarantees
/// a single owner per transition and per callback attempt.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new job. Fails with [`StoreError::Duplicate`] if the id exists.
    async fn insert(&self, job: &Job) -> Result<(), StoreError>;

    /// Fetch a snapshot of a job.
    async fn get(&self, id: JobId) -> Result<Option<Job>, StoreError>;

    /// Replace the stored job with `next` if its status and attempt count
    /// still equal those of `current`. Returns whether the write happened.
    async fn compare_and_set(&self, current: &Job, next: &Job) -> Result<bool, StoreError>;

    /// Delete a job that is still `pending`. Used to roll back a submission
    /// whose enqueue failed. Returns whether a record was removed.
    async fn discard(&self, id: JobId) -> Result<bool, StoreError>;

    /// Jobs in any of `statuses`, oldest submission first.
    async fn list_by_status(
        &self,
        statuses: &[JobStatus],
        limit: usize,
    ) -> Result<Vec<Job>, StoreError>;

    /// Upsert a slot heartbeat.
    async fn record_heartbeat(&self, heartbeat: &SlotHeartbeat) -> Result<(), StoreError>;

    /// Slots that heartbeated at or after `since`.
    async fn live_slots(&self, since: Timestamp) -> Result<Vec<SlotHeartbeat>, StoreError>;

    /// Cheap health probe.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Read the job, apply `update` and persist it with a compare-and-set
    /// against the snapshot that was read.
    async fn advance(&self, id: JobId, update: JobUpdate) -> Result<Advance, StoreError> {
        let Some(current) = self.get(id).await? else {
            return Ok(Advance::Missing);
        };
        let next = match current.apply(update) {
            Ok(next) => next,
            Err(_) => return Ok(Advance::Rejected(current.status)),
        };
        if self.compare_and_set(&current, &next).await? {
            Ok(Advance::Applied(next))
        } else {
            Ok(Advance::Rejected(current.status))
        }
    }
}

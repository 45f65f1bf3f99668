//! Periodic recovery of abandoned jobs.
//!
//! A worker that dies mid-job leaves the record in `processing`. Once it
//! has been there longer than the stale timeout the reaper moves it back
//! to `pending` and re-enqueues it. `pending` jobs older than the same
//! timeout are re-enqueued too, which covers records whose queue entry was
//! lost. Enqueue is idempotent, so re-enqueueing a live entry is harmless.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use matte_core::job::{JobStatus, JobUpdate};
use matte_db::{Advance, JobQueue, JobStore};
use tokio_util::sync::CancellationToken;

use crate::error::PoolError;

/// Upper bound on jobs examined per status in one sweep.
const SWEEP_BATCH: usize = 1000;

/// What one sweep did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    /// Stale `processing` jobs moved back to `pending`.
    pub requeued: usize,
    /// Old `pending` jobs pushed to the queue again.
    pub reenqueued: usize,
}

pub struct Reaper {
    store: Arc<dyn JobStore>,
    queue: Arc<dyn JobQueue>,
    stale_after: Duration,
    interval: Duration,
}

impl Reaper {
    pub fn new(
        store: Arc<dyn JobStore>,
        queue: Arc<dyn JobQueue>,
        stale_after: Duration,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            queue,
            stale_after,
            interval,
        }
    }

    /// Run one pass over `processing` and `pending` jobs.
    pub async fn sweep(&self) -> Result<SweepReport, PoolError> {
        let stale_after = chrono::Duration::from_std(self.stale_after)
            .map_err(|e| PoolError::Config(format!("Stale job timeout out of range: {e}")))?;
        let cutoff = Utc::now() - stale_after;
        let mut report = SweepReport::default();

        let processing = self
            .store
            .list_by_status(&[JobStatus::Processing], SWEEP_BATCH)
            .await?;
        for job in processing {
            if job.started_at.is_some_and(|started| started > cutoff) {
                continue;
            }
            if let Advance::Applied(_) = self.store.advance(job.id, JobUpdate::Requeue).await? {
                self.queue.enqueue(job.id).await?;
                tracing::warn!(
                    job_id = %job.id,
                    slot = job.slot.as_deref().unwrap_or("unknown"),
                    "Requeued stale processing job"
                );
                report.requeued += 1;
            }
        }

        let pending = self
            .store
            .list_by_status(&[JobStatus::Pending], SWEEP_BATCH)
            .await?;
        for job in pending.into_iter().filter(|j| j.submitted_at <= cutoff) {
            self.queue.enqueue(job.id).await?;
            report.reenqueued += 1;
        }

        Ok(report)
    }

    /// Sweep on a fixed interval until `cancel` is triggered.
    pub async fn run(self, cancel: CancellationToken) {
        tracing::info!(
            stale_after_secs = self.stale_after.as_secs(),
            interval_secs = self.interval.as_secs(),
            "Stale job reaper started"
        );

        let mut interval = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Stale job reaper stopping");
                    break;
                }
                _ = interval.tick() => {
                    match self.sweep().await {
                        Ok(report) if report == SweepReport::default() => {
                            tracing::debug!("Reaper: nothing to recover");
                        }
                        Ok(report) => {
                            tracing::info!(
                                requeued = report.requeued,
                                reenqueued = report.reenqueued,
                                "Reaper: recovered jobs"
                            );
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "Reaper: sweep failed");
                        }
                    }
                }
            }
        }
    }
}

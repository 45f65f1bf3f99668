//! Callback dispatcher.
//!
//! [`CallbackDispatcher::spawn`] starts a background loop that receives
//! [`DispatchRequest`]s from workers and runs one delivery task per finished
//! job, bounded by a semaphore. Every state change goes through the job
//! store's compare-and-set, so a job that is dispatched twice (a crash
//! recovery racing a live hand-off) is delivered at least once and never
//! regresses.

use std::sync::Arc;

use chrono::Utc;
use matte_core::job::{ErrorKind, Job, JobError, JobStatus, JobUpdate};
use matte_core::types::JobId;
use matte_db::{Advance, JobStore, StoreError};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::DispatcherConfig;
use crate::delivery::{DeliveryError, WebhookClient};
use crate::payload::CallbackPayload;

/// Upper bound on jobs re-dispatched by one [`CallbackDispatcher::recover`].
const RECOVERY_BATCH: usize = 10_000;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Error type for dispatcher operations.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Job store error: {0}")]
    Store(#[from] StoreError),

    #[error("Payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Webhook client error: {0}")]
    Client(#[from] DeliveryError),
}

/// Work handed to the dispatcher by a worker slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchRequest {
    /// The job was claimed; send the optional progress callback.
    Started(JobId),
    /// The job reached `completed` or `failed`; notify the caller.
    Finished(JobId),
}

/// What a call to [`CallbackDispatcher::notify`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyOutcome {
    /// The receiver accepted the callback.
    Notified { attempts: u32 },
    /// No callback configured; the job went straight to `notified`.
    Skipped,
    /// Every attempt failed; the job is `notify_failed`.
    Exhausted { attempts: u32 },
    /// Nothing to do: the job is not finished, already notified, or another
    /// dispatcher moved it first. Carries the status that was observed.
    Unchanged(JobStatus),
    /// No job with that id.
    Missing,
    /// Shutdown interrupted the backoff. The job stays `notifying` and is
    /// resumed by the next [`recover`](CallbackDispatcher::recover).
    Interrupted,
}

/// Sender side of the dispatcher channel. Cheap to clone.
#[derive(Debug, Clone)]
pub struct DispatchHandle {
    tx: mpsc::UnboundedSender<DispatchRequest>,
}

impl DispatchHandle {
    /// Queue a request. If the dispatcher has stopped the request is dropped;
    /// finished jobs are picked up again by startup recovery.
    pub fn send(&self, request: DispatchRequest) {
        if self.tx.send(request).is_err() {
            tracing::warn!(request = ?request, "Dispatcher stopped, request dropped");
        }
    }

    pub fn started(&self, job_id: JobId) {
        self.send(DispatchRequest::Started(job_id));
    }

    pub fn finished(&self, job_id: JobId) {
        self.send(DispatchRequest::Finished(job_id));
    }

    /// A handle and its receiving end, without a running dispatcher.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<DispatchRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

// ---------------------------------------------------------------------------
// CallbackDispatcher
// ---------------------------------------------------------------------------

pub struct CallbackDispatcher {
    store: Arc<dyn JobStore>,
    client: WebhookClient,
    config: DispatcherConfig,
    shutdown: CancellationToken,
}

impl CallbackDispatcher {
    pub fn new(
        store: Arc<dyn JobStore>,
        config: DispatcherConfig,
        shutdown: CancellationToken,
    ) -> Result<Self, DispatchError> {
        let client = WebhookClient::new(config.request_timeout)?;
        Ok(Self {
            store,
            client,
            config,
            shutdown,
        })
    }

    /// Start the dispatch loop. The loop stops when every handle is dropped,
    /// or once the shutdown token is cancelled and the requests already sent
    /// have been taken off the channel. It then waits for in-flight
    /// deliveries.
    pub fn spawn(self: Arc<Self>) -> (DispatchHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(self.run(rx));
        (DispatchHandle { tx }, task)
    }

    async fn run(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<DispatchRequest>) {
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let tracker = TaskTracker::new();
        tracing::info!(concurrency = self.config.concurrency, "Callback dispatcher started");

        loop {
            // Queued requests win over shutdown so hand-offs made just
            // before it are still delivered.
            let request = tokio::select! {
                biased;
                request = rx.recv() => match request {
                    Some(request) => request,
                    None => break,
                },
                _ = self.shutdown.cancelled() => break,
            };
            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                break;
            };

            let this = Arc::clone(&self);
            tracker.spawn(async move {
                let _permit = permit;
                this.handle(request).await;
            });
        }

        tracker.close();
        tracker.wait().await;
        tracing::info!("Callback dispatcher stopped");
    }

    async fn handle(&self, request: DispatchRequest) {
        match request {
            DispatchRequest::Started(job_id) => {
                if !self.config.notify_processing {
                    return;
                }
                if let Err(e) = self.notify_processing(job_id).await {
                    tracing::debug!(job_id = %job_id, error = %e, "Processing callback not delivered");
                }
            }
            DispatchRequest::Finished(job_id) => match self.notify(job_id).await {
                Ok(outcome) => {
                    tracing::debug!(job_id = %job_id, outcome = ?outcome, "Dispatch finished");
                }
                Err(e) => {
                    tracing::error!(job_id = %job_id, error = %e, "Dispatch failed");
                }
            },
        }
    }

    /// Re-dispatch every job left in `completed`, `failed` or `notifying`,
    /// e.g. after a crash. Returns how many jobs were queued.
    pub async fn recover(&self, handle: &DispatchHandle) -> Result<usize, DispatchError> {
        let jobs = self
            .store
            .list_by_status(
                &[JobStatus::Completed, JobStatus::Failed, JobStatus::Notifying],
                RECOVERY_BATCH,
            )
            .await?;
        for job in &jobs {
            handle.finished(job.id);
        }
        if !jobs.is_empty() {
            tracing::info!(count = jobs.len(), "Re-dispatching unfinished notifications");
        }
        Ok(jobs.len())
    }

    /// Deliver the completion callback for a job.
    ///
    /// Without a callback the job moves straight to `notified`. A job already
    /// `notifying` resumes with its remaining attempt budget; `notified` and
    /// `notify_failed` jobs are left alone.
    pub async fn notify(&self, job_id: JobId) -> Result<NotifyOutcome, DispatchError> {
        let Some(job) = self.store.get(job_id).await? else {
            return Ok(NotifyOutcome::Missing);
        };

        let job = match job.status {
            JobStatus::Completed | JobStatus::Failed if job.callback.is_none() => {
                return Ok(
                    match self
                        .store
                        .advance(job_id, JobUpdate::SkipNotify { at: Utc::now() })
                        .await?
                    {
                        Advance::Applied(_) => {
                            tracing::info!(job_id = %job_id, "No callback configured, job notified");
                            NotifyOutcome::Skipped
                        }
                        Advance::Rejected(status) => NotifyOutcome::Unchanged(status),
                        Advance::Missing => NotifyOutcome::Missing,
                    },
                );
            }
            JobStatus::Completed | JobStatus::Failed => {
                match self.store.advance(job_id, JobUpdate::BeginNotify).await? {
                    Advance::Applied(job) => job,
                    Advance::Rejected(status) => return Ok(NotifyOutcome::Unchanged(status)),
                    Advance::Missing => return Ok(NotifyOutcome::Missing),
                }
            }
            JobStatus::Notifying => job,
            other => return Ok(NotifyOutcome::Unchanged(other)),
        };

        self.deliver(job).await
    }

    /// Attempt loop for a job in `notifying`.
    async fn deliver(&self, job: Job) -> Result<NotifyOutcome, DispatchError> {
        let job_id = job.id;
        let (Some(callback), Some(payload)) = (job.callback.clone(), CallbackPayload::from_job(&job))
        else {
            let error = JobError::new(
                ErrorKind::DeliveryFailure,
                "Job has no callback or no processing outcome",
            );
            return self.give_up(job_id, job.attempt_count, error).await;
        };
        // Serialized once: every attempt sends identical bytes.
        let body = serde_json::to_vec(&payload)?;
        let policy = self.config.retry;

        let mut attempts = job.attempt_count;
        let mut last_error: Option<String> = None;

        while policy.has_attempts_left(attempts) {
            // The claim is checked against the stored count, so concurrent
            // dispatchers of one job share a single budget.
            let claim = JobUpdate::RecordAttempt {
                max_attempts: policy.max_attempts,
            };
            match self.store.advance(job_id, claim).await? {
                Advance::Applied(updated) => attempts = updated.attempt_count,
                Advance::Rejected(status) => return Ok(NotifyOutcome::Unchanged(status)),
                Advance::Missing => return Ok(NotifyOutcome::Missing),
            }

            match self
                .client
                .post(&callback.url, callback.auth_token.as_deref(), body.clone())
                .await
            {
                Ok(()) => {
                    tracing::info!(job_id = %job_id, attempt = attempts, "Callback delivered");
                    return Ok(
                        match self
                            .store
                            .advance(job_id, JobUpdate::Notified { at: Utc::now() })
                            .await?
                        {
                            Advance::Applied(_) => NotifyOutcome::Notified { attempts },
                            Advance::Rejected(status) => NotifyOutcome::Unchanged(status),
                            Advance::Missing => NotifyOutcome::Missing,
                        },
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        job_id = %job_id,
                        attempt = attempts,
                        max_attempts = policy.max_attempts,
                        url = %callback.url,
                        error = %e,
                        "Callback attempt failed"
                    );
                    last_error = Some(e.to_string());
                }
            }

            if policy.has_attempts_left(attempts) {
                let delay = policy.delay_for_attempt(attempts);
                tokio::select! {
                    _ = self.shutdown.cancelled() => {
                        tracing::info!(job_id = %job_id, "Shutdown during callback backoff");
                        return Ok(NotifyOutcome::Interrupted);
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        let message = match last_error {
            Some(e) => format!("Callback failed after {attempts} attempts: {e}"),
            None => format!("Callback attempt budget exhausted after {attempts} attempts"),
        };
        self.give_up(job_id, attempts, JobError::new(ErrorKind::DeliveryFailure, message))
            .await
    }

    async fn give_up(
        &self,
        job_id: JobId,
        attempts: u32,
        error: JobError,
    ) -> Result<NotifyOutcome, DispatchError> {
        tracing::error!(job_id = %job_id, attempts, error = %error, "Callback delivery failed");
        Ok(
            match self
                .store
                .advance(job_id, JobUpdate::NotifyFailed { error })
                .await?
            {
                Advance::Applied(_) => NotifyOutcome::Exhausted { attempts },
                Advance::Rejected(status) => NotifyOutcome::Unchanged(status),
                Advance::Missing => NotifyOutcome::Missing,
            },
        )
    }

    /// Best-effort, single-attempt `processing` callback. Never changes the
    /// job record.
    pub async fn notify_processing(&self, job_id: JobId) -> Result<(), DispatchError> {
        let Some(job) = self.store.get(job_id).await? else {
            return Ok(());
        };
        let Some(callback) = &job.callback else {
            return Ok(());
        };
        let body = serde_json::to_vec(&CallbackPayload::processing(&job))?;
        self.client
            .post(&callback.url, callback.auth_token.as_deref(), body)
            .await?;
        tracing::debug!(job_id = %job_id, "Processing callback delivered");
        Ok(())
    }
}

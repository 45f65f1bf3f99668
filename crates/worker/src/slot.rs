//! A single worker slot: one device, one job at a time.
//!
//! Per delivery the slot claims the job (`pending -> processing`), reads
//! the input, runs inference on a blocking thread under the hard timeout,
//! stores the artifact, records `completed` or `failed`, removes the input
//! and acks the delivery. Every status write is a compare-and-set, so a
//! duplicate delivery of a job that is already claimed is dropped.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::Utc;
use matte_core::job::{ErrorKind, Job, JobError, JobUpdate};
use matte_core::types::JobId;
use matte_db::{Advance, Delivery, JobQueue, JobStore, SlotHeartbeat};
use matte_events::DispatchHandle;
use matte_pipeline::{Device, InferenceEngine, InferenceError};
use matte_storage::{InputStore, ResultSink, StorageError};
use tokio_util::sync::CancellationToken;

use crate::config::WorkerConfig;

/// Heartbeat period while a job is being processed.
const BUSY_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// Collaborators shared by every slot of a pool.
#[derive(Clone)]
pub struct SlotContext {
    pub store: Arc<dyn JobStore>,
    pub queue: Arc<dyn JobQueue>,
    pub sink: Arc<dyn ResultSink>,
    pub inputs: InputStore,
    pub dispatch: DispatchHandle,
    pub config: WorkerConfig,
}

pub(crate) struct Slot {
    name: String,
    device: Device,
    engine: Arc<Mutex<Box<dyn InferenceEngine>>>,
    ctx: Arc<SlotContext>,
}

impl Slot {
    pub(crate) fn new(
        index: usize,
        device: Device,
        engine: Box<dyn InferenceEngine>,
        ctx: Arc<SlotContext>,
    ) -> Self {
        Self {
            name: format!("slot-{index}@{device}"),
            device,
            engine: Arc::new(Mutex::new(engine)),
            ctx,
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn device(&self) -> Device {
        self.device
    }

    /// Pull and process jobs until `cancel` fires. A job in progress is
    /// always finished before the slot stops.
    pub(crate) async fn run(self, cancel: CancellationToken) {
        tracing::info!(slot = %self.name, device = %self.device, "Worker slot started");

        loop {
            self.heartbeat(None).await;

            let delivery = tokio::select! {
                _ = cancel.cancelled() => break,
                delivery = self.ctx.queue.dequeue(self.ctx.config.dequeue_wait) => delivery,
            };

            match delivery {
                Ok(Some(delivery)) => self.process(delivery).await,
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(slot = %self.name, error = %e, "Dequeue failed");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.ctx.config.dequeue_wait) => {}
                    }
                }
            }
        }

        tracing::info!(slot = %self.name, "Worker slot stopped");
    }

    async fn process(&self, delivery: Delivery) {
        let job_id = delivery.job_id;
        self.heartbeat(Some(job_id)).await;

        let claim = JobUpdate::Claim {
            slot: self.name.clone(),
            at: Utc::now(),
        };
        let job = match self.ctx.store.advance(job_id, claim).await {
            Ok(Advance::Applied(job)) => job,
            Ok(Advance::Rejected(status)) => {
                tracing::debug!(
                    job_id = %job_id,
                    slot = %self.name,
                    status = %status,
                    "Job not pending, dropping duplicate delivery"
                );
                self.ack(&delivery).await;
                return;
            }
            Ok(Advance::Missing) => {
                tracing::warn!(job_id = %job_id, slot = %self.name, "Delivered job does not exist");
                self.ack(&delivery).await;
                return;
            }
            Err(e) => {
                // Left unacked: the queue redelivers after the visibility timeout.
                tracing::error!(job_id = %job_id, slot = %self.name, error = %e, "Claim failed");
                return;
            }
        };

        tracing::info!(
            job_id = %job_id,
            slot = %self.name,
            delivery = delivery.attempt,
            queue_time = job.queue_time_secs(),
            "Job claimed"
        );
        self.ctx.dispatch.started(job_id);

        let update = {
            let work = self.execute(&job);
            tokio::pin!(work);
            let mut ticker = tokio::time::interval(BUSY_HEARTBEAT_INTERVAL);
            ticker.tick().await;
            loop {
                tokio::select! {
                    update = &mut work => break update,
                    _ = ticker.tick() => self.heartbeat(Some(job_id)).await,
                }
            }
        };

        match self.ctx.store.advance(job_id, update).await {
            Ok(Advance::Applied(job)) => {
                match &job.error {
                    None => tracing::info!(
                        job_id = %job_id,
                        slot = %self.name,
                        processing_time = job.processing_time_secs(),
                        model_time = job.model_time_secs(),
                        "Job completed"
                    ),
                    Some(error) => tracing::warn!(
                        job_id = %job_id,
                        slot = %self.name,
                        error = %error,
                        "Job failed"
                    ),
                }
                self.remove_input(&job).await;
                self.ctx.dispatch.finished(job_id);
            }
            Ok(other) => {
                // Someone else moved the job (e.g. the reaper requeued it);
                // the input now belongs to the next attempt.
                tracing::warn!(
                    job_id = %job_id,
                    slot = %self.name,
                    result = ?other,
                    "Job changed while processing, result discarded"
                );
            }
            Err(e) => {
                tracing::error!(
                    job_id = %job_id,
                    slot = %self.name,
                    error = %e,
                    "Could not record job outcome, leaving it for the reaper"
                );
                return;
            }
        }

        self.ack(&delivery).await;
    }

    /// Run the job and describe its outcome as a status update.
    async fn execute(&self, job: &Job) -> JobUpdate {
        let fail = |kind: ErrorKind, message: String| JobUpdate::Fail {
            error: JobError::new(kind, message),
            inference_ms: None,
            at: Utc::now(),
        };

        let input = match self.ctx.inputs.read(&job.input_ref).await {
            Ok(bytes) => bytes,
            Err(e @ (StorageError::NotFound(_) | StorageError::InvalidReference(_))) => {
                return fail(ErrorKind::InvalidInput, format!("Input could not be resolved: {e}"));
            }
            Err(e) => {
                return fail(ErrorKind::StorageUnavailable, format!("Input could not be read: {e}"));
            }
        };

        let (artifact, elapsed) = match self.infer(input).await {
            Ok(inferred) => inferred,
            Err(error) => {
                return JobUpdate::Fail {
                    error,
                    inference_ms: None,
                    at: Utc::now(),
                }
            }
        };
        let inference_ms = i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX);

        match self.store_result(job.id, &artifact).await {
            Ok(result_ref) => JobUpdate::Complete {
                result_ref,
                inference_ms,
                at: Utc::now(),
            },
            Err(e) => fail(
                ErrorKind::ProcessingFailure,
                format!("Result could not be stored: {e}"),
            ),
        }
    }

    /// Run the engine on a blocking thread under the hard timeout. Returns
    /// the artifact and the time spent inside the engine call.
    ///
    /// The engine mutex stays held by a timed-out call until it returns, so
    /// the device never runs two inferences at once. Waiting for it counts
    /// against the timeout but not the reported model time.
    async fn infer(&self, input: Vec<u8>) -> Result<(Vec<u8>, Duration), JobError> {
        let engine = Arc::clone(&self.engine);
        let task = tokio::task::spawn_blocking(move || {
            let mut engine = engine.lock().unwrap_or_else(PoisonError::into_inner);
            let started = Instant::now();
            engine.infer(&input).map(|artifact| (artifact, started.elapsed()))
        });

        let timeout = self.ctx.config.inference_timeout;
        match tokio::time::timeout(timeout, task).await {
            Err(_) => Err(JobError::new(
                ErrorKind::Timeout,
                format!("Inference exceeded the {timeout:?} limit"),
            )),
            Ok(Err(join_error)) => Err(JobError::new(
                ErrorKind::ProcessingFailure,
                format!("Inference task aborted: {join_error}"),
            )),
            Ok(Ok(Err(InferenceError::InvalidImage(message)))) => {
                Err(JobError::new(ErrorKind::InvalidInput, message))
            }
            Ok(Ok(Err(e))) => Err(JobError::new(ErrorKind::ProcessingFailure, e.to_string())),
            Ok(Ok(Ok(inferred))) => Ok(inferred),
        }
    }

    /// Store the artifact, retrying once after a transient failure.
    async fn store_result(&self, job_id: JobId, artifact: &[u8]) -> Result<String, StorageError> {
        match self.ctx.sink.store(job_id, artifact).await {
            Err(e) if e.is_transient() => {
                tracing::warn!(
                    job_id = %job_id,
                    sink = self.ctx.sink.backend(),
                    error = %e,
                    "Result storage failed, retrying once"
                );
                tokio::time::sleep(self.ctx.config.storage_retry_delay).await;
                self.ctx.sink.store(job_id, artifact).await
            }
            result => result,
        }
    }

    async fn remove_input(&self, job: &Job) {
        if let Err(e) = self.ctx.inputs.remove(&job.input_ref).await {
            tracing::warn!(job_id = %job.id, error = %e, "Failed to remove input file");
        }
    }

    async fn ack(&self, delivery: &Delivery) {
        if let Err(e) = self.ctx.queue.ack(delivery).await {
            tracing::warn!(job_id = %delivery.job_id, error = %e, "Failed to ack delivery");
        }
    }

    async fn heartbeat(&self, current_job: Option<JobId>) {
        let heartbeat = SlotHeartbeat {
            slot: self.name.clone(),
            device: self.device.to_string(),
            current_job,
            seen_at: Utc::now(),
        };
        if let Err(e) = self.ctx.store.record_heartbeat(&heartbeat).await {
            tracing::warn!(slot = %self.name, error = %e, "Failed to record heartbeat");
        }
    }
}

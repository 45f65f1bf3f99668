//! Job model and lifecycle transition rules.
//!
//! A [`Job`] only ever changes through [`Job::apply`], which checks the
//! requested [`JobUpdate`] against the allowed edges:
//!
//! ```text
//! pending -> processing -> {completed, failed} -> notifying -> {notified, notify_failed}
//! {completed, failed} -> notified          (no callback configured)
//! notifying -> notifying                   (delivery attempt recorded)
//! processing -> pending                    (stale-job reaper)
//! ```
//!
//! Stores persist the result with a compare-and-set on the prior status,
//! which is what makes each edge atomic across workers.

use std::fmt;
use std::str::FromStr;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{JobId, Timestamp};

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Notifying,
    Notified,
    NotifyFailed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 7] = [
        JobStatus::Pending,
        JobStatus::Processing,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Notifying,
        JobStatus::Notified,
        JobStatus::NotifyFailed,
    ];

    /// Wire and database name.
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Notifying => "notifying",
            JobStatus::Notified => "notified",
            JobStatus::NotifyFailed => "notify_failed",
        }
    }

    /// `notified` and `notify_failed` end the lifecycle.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Notified | JobStatus::NotifyFailed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| CoreError::Validation(format!("Unknown job status '{s}'")))
    }
}

// ---------------------------------------------------------------------------
// Errors recorded on the job
// ---------------------------------------------------------------------------

/// Classifies why a job failed processing or delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The input could not be resolved or decoded by the worker.
    InvalidInput,
    /// Inference failed, or the artifact could not be stored.
    ProcessingFailure,
    /// Inference exceeded the hard timeout.
    Timeout,
    /// The result sink stayed unavailable.
    StorageUnavailable,
    /// Every callback delivery attempt failed.
    DeliveryFailure,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::ProcessingFailure => "processing_failure",
            ErrorKind::Timeout => "timeout",
            ErrorKind::StorageUnavailable => "storage_unavailable",
            ErrorKind::DeliveryFailure => "delivery_failure",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured failure reason stored on a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub kind: ErrorKind,
    pub message: String,
}

impl JobError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

// ---------------------------------------------------------------------------
// Callback configuration
// ---------------------------------------------------------------------------

/// Where and how to notify the caller once the job finishes.
///
/// `custom_data` is opaque and echoed back verbatim in the payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackConfig {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_data: Option<serde_json::Value>,
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// One submitted unit of work and its tracked lifecycle state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub status: JobStatus,
    pub input_ref: String,
    pub original_filename: Option<String>,
    pub result_ref: Option<String>,
    pub error: Option<JobError>,
    pub delivery_error: Option<JobError>,
    pub callback: Option<CallbackConfig>,
    /// Slot that claimed the job, e.g. `slot-0@cuda:0`.
    pub slot: Option<String>,
    pub attempt_count: u32,
    pub inference_ms: Option<i64>,
    pub submitted_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub notified_at: Option<Timestamp>,
}

/// A requested state change. Applied with [`Job::apply`].
#[derive(Debug, Clone, PartialEq)]
pub enum JobUpdate {
    /// A worker takes ownership of a pending job.
    Claim { slot: String, at: Timestamp },
    /// Inference and storage succeeded.
    Complete {
        result_ref: String,
        inference_ms: i64,
        at: Timestamp,
    },
    /// Processing failed; the caller is still notified.
    Fail {
        error: JobError,
        inference_ms: Option<i64>,
        at: Timestamp,
    },
    /// The dispatcher starts delivering the callback.
    BeginNotify,
    /// No callback configured: finish without delivery.
    SkipNotify { at: Timestamp },
    /// One delivery attempt is about to be made. Rejected once the job has
    /// used `max_attempts`.
    RecordAttempt { max_attempts: u32 },
    /// The callback was accepted by the receiver.
    Notified { at: Timestamp },
    /// Every delivery attempt failed.
    NotifyFailed { error: JobError },
    /// A stale processing job is handed back to the queue.
    Requeue,
}

impl JobUpdate {
    /// Status the job is in after the update.
    pub fn target(&self) -> JobStatus {
        match self {
            JobUpdate::Claim { .. } => JobStatus::Processing,
            JobUpdate::Complete { .. } => JobStatus::Completed,
            JobUpdate::Fail { .. } => JobStatus::Failed,
            JobUpdate::BeginNotify | JobUpdate::RecordAttempt { .. } => JobStatus::Notifying,
            JobUpdate::SkipNotify { .. } | JobUpdate::Notified { .. } => JobStatus::Notified,
            JobUpdate::NotifyFailed { .. } => JobStatus::NotifyFailed,
            JobUpdate::Requeue => JobStatus::Pending,
        }
    }

    fn allowed_from(&self) -> &'static [JobStatus] {
        match self {
            JobUpdate::Claim { .. } => &[JobStatus::Pending],
            JobUpdate::Complete { .. } | JobUpdate::Fail { .. } | JobUpdate::Requeue => {
                &[JobStatus::Processing]
            }
            JobUpdate::BeginNotify | JobUpdate::SkipNotify { .. } => {
                &[JobStatus::Completed, JobStatus::Failed]
            }
            JobUpdate::RecordAttempt { .. }
            | JobUpdate::Notified { .. }
            | JobUpdate::NotifyFailed { .. } => &[JobStatus::Notifying],
        }
    }
}

impl Job {
    /// Create a new pending job.
    pub fn new(
        input_ref: impl Into<String>,
        original_filename: Option<String>,
        callback: Option<CallbackConfig>,
    ) -> Self {
        Self {
            id: JobId::new(),
            status: JobStatus::Pending,
            input_ref: input_ref.into(),
            original_filename,
            result_ref: None,
            error: None,
            delivery_error: None,
            callback,
            slot: None,
            attempt_count: 0,
            inference_ms: None,
            submitted_at: Utc::now(),
            started_at: None,
            completed_at: None,
            notified_at: None,
        }
    }

    /// Return the job as it looks after `update`, or `InvalidTransition`
    /// if the edge is not allowed from the current status.
    pub fn apply(&self, update: JobUpdate) -> Result<Job, CoreError> {
        let target = update.target();
        let invalid = CoreError::InvalidTransition {
            from: self.status,
            to: target,
        };
        if !update.allowed_from().contains(&self.status) {
            return Err(invalid);
        }

        let mut next = self.clone();
        match update {
            JobUpdate::Claim { slot, at } => {
                next.slot = Some(slot);
                next.started_at = Some(at);
            }
            JobUpdate::Complete {
                result_ref,
                inference_ms,
                at,
            } => {
                next.result_ref = Some(result_ref);
                next.inference_ms = Some(inference_ms);
                next.completed_at = Some(at);
            }
            JobUpdate::Fail {
                error,
                inference_ms,
                at,
            } => {
                next.error = Some(error);
                next.inference_ms = inference_ms;
                next.completed_at = Some(at);
            }
            JobUpdate::BeginNotify => {}
            JobUpdate::SkipNotify { at } => {
                if self.callback.is_some() {
                    return Err(invalid);
                }
                next.notified_at = Some(at);
            }
            JobUpdate::RecordAttempt { max_attempts } => {
                if self.attempt_count >= max_attempts {
                    return Err(invalid);
                }
                next.attempt_count += 1;
            }
            JobUpdate::Notified { at } => {
                next.notified_at = Some(at);
            }
            JobUpdate::NotifyFailed { error } => {
                next.delivery_error = Some(error);
            }
            JobUpdate::Requeue => {
                next.slot = None;
                next.started_at = None;
            }
        }
        next.status = target;
        Ok(next)
    }

    /// Processing outcome reported to the caller: `completed` or `failed`,
    /// `None` while the job has not finished processing.
    pub fn outcome(&self) -> Option<JobStatus> {
        if self.result_ref.is_some() {
            Some(JobStatus::Completed)
        } else if self.error.is_some() {
            Some(JobStatus::Failed)
        } else {
            None
        }
    }

    /// Seconds between submission and claim.
    pub fn queue_time_secs(&self) -> Option<f64> {
        let started = self.started_at?;
        Some(secs_between(self.submitted_at, started))
    }

    /// Seconds between claim and the end of processing.
    pub fn processing_time_secs(&self) -> Option<f64> {
        let started = self.started_at?;
        let completed = self.completed_at?;
        Some(secs_between(started, completed))
    }

    /// Seconds spent inside the inference call.
    pub fn model_time_secs(&self) -> Option<f64> {
        self.inference_ms.map(|ms| round_millis(ms as f64 / 1000.0))
    }
}

fn secs_between(from: Timestamp, to: Timestamp) -> f64 {
    round_millis((to - from).num_milliseconds() as f64 / 1000.0)
}

fn round_millis(secs: f64) -> f64 {
    (secs * 1000.0).round() / 1000.0
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

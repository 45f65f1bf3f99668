use matte_core::job::{Job, JobError, JobStatus};
use matte_core::types::JobId;
use serde::Serialize;

/// JSON body POSTed to the caller's callback URL.
///
/// Optional fields are omitted rather than sent as `null`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallbackPayload {
    pub job_id: JobId,
    /// `completed`, `failed`, or `processing` for the optional progress
    /// notification.
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_time: Option<f64>,
}

impl CallbackPayload {
    /// Completion payload, or `None` if the job has not finished processing.
    pub fn from_job(job: &Job) -> Option<Self> {
        let status = job.outcome()?;
        Some(Self {
            job_id: job.id,
            status,
            result_url: job.result_ref.clone(),
            error: job.error.clone(),
            custom_data: job.callback.as_ref().and_then(|c| c.custom_data.clone()),
            queue_time: job.queue_time_secs(),
            processing_time: job.processing_time_secs(),
            model_time: job.model_time_secs(),
        })
    }

    /// Progress payload sent once a worker has claimed the job.
    pub fn processing(job: &Job) -> Self {
        Self {
            job_id: job.id,
            status: JobStatus::Processing,
            result_url: None,
            error: None,
            custom_data: job.callback.as_ref().and_then(|c| c.custom_data.clone()),
            queue_time: job.queue_time_secs(),
            processing_time: None,
            model_time: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use matte_core::job::{CallbackConfig, ErrorKind, JobUpdate};

    fn claimed_job() -> Job {
        Job::new(
            "in.png",
            None,
            Some(CallbackConfig {
                url: "https://example.com/hook".into(),
                auth_token: None,
                custom_data: Some(serde_json::json!({"user_id": "123"})),
            }),
        )
        .apply(JobUpdate::Claim {
            slot: "slot-0@cpu".into(),
            at: Utc::now(),
        })
        .unwrap()
    }

    #[test]
    fn unfinished_job_has_no_payload() {
        assert!(CallbackPayload::from_job(&claimed_job()).is_none());
    }

    #[test]
    fn completed_payload_omits_error() {
        let job = claimed_job()
            .apply(JobUpdate::Complete {
                result_ref: "https://bucket/results/x.png".into(),
                inference_ms: 420,
                at: Utc::now(),
            })
            .unwrap();
        let json = serde_json::to_value(CallbackPayload::from_job(&job).unwrap()).unwrap();

        assert_eq!(json["status"], "completed");
        assert_eq!(json["result_url"], "https://bucket/results/x.png");
        assert_eq!(json["custom_data"]["user_id"], "123");
        assert_eq!(json["model_time"], 0.42);
        assert!(json.get("error").is_none());
    }

    #[test]
    fn failed_payload_carries_error() {
        let job = claimed_job()
            .apply(JobUpdate::Fail {
                error: JobError::new(ErrorKind::Timeout, "inference exceeded 1800s"),
                inference_ms: None,
                at: Utc::now(),
            })
            .unwrap();
        let json = serde_json::to_value(CallbackPayload::from_job(&job).unwrap()).unwrap();

        assert_eq!(json["status"], "failed");
        assert_eq!(json["error"]["kind"], "timeout");
        assert!(json.get("result_url").is_none());
        assert!(json.get("model_time").is_none());
    }

    #[test]
    fn processing_payload_reports_queue_time_only() {
        let json = serde_json::to_value(CallbackPayload::processing(&claimed_job())).unwrap();
        assert_eq!(json["status"], "processing");
        assert!(json.get("queue_time").is_some());
        assert!(json.get("processing_time").is_none());
    }
}

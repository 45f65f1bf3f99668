//! Handlers for job submission and status lookup.
//!
//! Routes:
//! - `POST /jobs`       multipart upload (`file`, optional `request_data`)
//! - `GET  /jobs/{id}`  job status

use std::str::FromStr;

use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::Json;
use matte_core::job::{CallbackConfig, Job, JobError, JobStatus};
use matte_core::types::{JobId, Timestamp};
use matte_core::validation::validate_image_content_type;
use matte_pipeline::sniff_image;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::gateway::GatewayError;
use crate::state::AppState;

/// Optional JSON metadata sent as the `request_data` form field.
#[derive(Debug, Default, Deserialize)]
pub struct RequestData {
    pub callback_url: Option<String>,
    pub callback_auth: Option<String>,
    pub custom_data: Option<serde_json::Value>,
}

impl RequestData {
    /// A callback is only configured when a URL is given.
    fn into_callback(self) -> Option<CallbackConfig> {
        let url = self.callback_url?;
        Some(CallbackConfig {
            url,
            auth_token: self.callback_auth,
            custom_data: self.custom_data,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub job_id: JobId,
    pub status: JobStatus,
}

#[derive(Debug, Serialize)]
pub struct JobStatusResponse {
    pub job_id: JobId,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery_error: Option<JobError>,
    pub attempt_count: u32,
    pub submitted_at: Timestamp,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<Timestamp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<Timestamp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notified_at: Option<Timestamp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_time: Option<f64>,
}

impl From<&Job> for JobStatusResponse {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id,
            status: job.status,
            result_url: job.result_ref.clone(),
            error: job.error.clone(),
            delivery_error: job.delivery_error.clone(),
            attempt_count: job.attempt_count,
            submitted_at: job.submitted_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
            notified_at: job.notified_at,
            queue_time: job.queue_time_secs(),
            processing_time: job.processing_time_secs(),
            model_time: job.model_time_secs(),
        }
    }
}

struct Upload {
    filename: Option<String>,
    bytes: Vec<u8>,
}

/// POST /api/v1/jobs
///
/// Accepts a multipart form with a required `file` field (JPEG or PNG) and
/// an optional `request_data` JSON field. The upload is saved and a pending
/// job is queued. Responds `202 Accepted`.
pub async fn submit_job(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> AppResult<(StatusCode, Json<SubmitResponse>)> {
    let mut upload: Option<Upload> = None;
    let mut request = RequestData::default();

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "file" => {
                validate_image_content_type(field.content_type())?;
                let filename = field.file_name().map(str::to_string);
                let bytes = field.bytes().await?;
                upload = Some(Upload {
                    filename,
                    bytes: bytes.to_vec(),
                });
            }
            "request_data" => {
                let text = field.text().await?;
                if !text.trim().is_empty() {
                    request = serde_json::from_str(&text).map_err(|e| {
                        tracing::debug!(error = %e, "Invalid request_data");
                        AppError::BadRequest(format!("Invalid JSON in request_data: {e}"))
                    })?;
                }
            }
            _ => {} // ignore unknown fields
        }
    }

    let upload =
        upload.ok_or_else(|| AppError::BadRequest("Missing required 'file' field".into()))?;
    if upload.bytes.is_empty() {
        return Err(AppError::BadRequest("Uploaded file is empty".into()));
    }
    sniff_image(&upload.bytes).map_err(|e| AppError::BadRequest(e.to_string()))?;

    let inputs = state.gateway.inputs();
    let input_ref = inputs
        .save(upload.filename.as_deref(), &upload.bytes)
        .await
        .map_err(|e| AppError::InternalError(format!("Failed to save upload: {e}")))?;

    let job = match state
        .gateway
        .submit(&input_ref, upload.filename, request.into_callback())
        .await
    {
        Ok(job) => job,
        Err(e) => {
            if let Err(remove) = inputs.remove(&input_ref).await {
                tracing::warn!(input_ref = %input_ref, error = %remove, "Failed to remove rejected upload");
            }
            return Err(e.into());
        }
    };

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            job_id: job.id,
            status: job.status,
        }),
    ))
}

/// GET /api/v1/jobs/{id}
///
/// Ids that are not UUIDs are reported as not found.
pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<JobStatusResponse>> {
    let job_id = JobId::from_str(&id).map_err(|_| GatewayError::NotFound(id.clone()))?;
    let job = state.gateway.get(job_id).await?;
    Ok(Json(JobStatusResponse::from(&job)))
}

//! PostgreSQL store and queue.
//!
//! Status changes are conditional `UPDATE … WHERE status = $expected`
//! statements. Queue claims use `FOR UPDATE SKIP LOCKED` so concurrent
//! workers never receive the same visible row.

use std::time::Duration;

use async_trait::async_trait;
use matte_core::job::{CallbackConfig, Job, JobError, JobStatus};
use matte_core::types::{JobId, Timestamp};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::queue::{Delivery, JobQueue, QueueError};
use crate::store::{JobStore, SlotHeartbeat, StoreError};

/// How often `dequeue` re-polls while waiting for a visible row.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Column list for job queries.
const COLUMNS: &str = "id, status, input_ref, original_filename, result_ref, error, \
    delivery_error, callback, slot, attempt_count, inference_ms, submitted_at, \
    started_at, completed_at, notified_at";

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

#[derive(Debug, FromRow)]
struct JobRow {
    id: Uuid,
    status: String,
    input_ref: String,
    original_filename: Option<String>,
    result_ref: Option<String>,
    error: Option<Json<JobError>>,
    delivery_error: Option<Json<JobError>>,
    callback: Option<Json<CallbackConfig>>,
    slot: Option<String>,
    attempt_count: i32,
    inference_ms: Option<i64>,
    submitted_at: Timestamp,
    started_at: Option<Timestamp>,
    completed_at: Option<Timestamp>,
    notified_at: Option<Timestamp>,
}

impl TryFrom<JobRow> for Job {
    type Error = StoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<JobStatus>()
            .map_err(|e| StoreError::Corrupt {
                id: row.id.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Job {
            id: JobId::from(row.id),
            status,
            input_ref: row.input_ref,
            original_filename: row.original_filename,
            result_ref: row.result_ref,
            error: row.error.map(|Json(e)| e),
            delivery_error: row.delivery_error.map(|Json(e)| e),
            callback: row.callback.map(|Json(c)| c),
            slot: row.slot,
            attempt_count: u32::try_from(row.attempt_count).unwrap_or(0),
            inference_ms: row.inference_ms,
            submitted_at: row.submitted_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            notified_at: row.notified_at,
        })
    }
}

fn attempt_count_column(job: &Job) -> i32 {
    i32::try_from(job.attempt_count).unwrap_or(i32::MAX)
}

// ---------------------------------------------------------------------------
// Job store
// ---------------------------------------------------------------------------

/// Job store backed by the `jobs` and `worker_slots` tables.
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn insert(&self, job: &Job) -> Result<(), StoreError> {
        let result = sqlx::query(
            "INSERT INTO jobs (id, status, input_ref, original_filename, result_ref, error, \
                 delivery_error, callback, slot, attempt_count, inference_ms, submitted_at, \
                 started_at, completed_at, notified_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15) \
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(job.id.as_uuid())
        .bind(job.status.as_str())
        .bind(&job.input_ref)
        .bind(&job.original_filename)
        .bind(&job.result_ref)
        .bind(job.error.clone().map(Json))
        .bind(job.delivery_error.clone().map(Json))
        .bind(job.callback.clone().map(Json))
        .bind(&job.slot)
        .bind(attempt_count_column(job))
        .bind(job.inference_ms)
        .bind(job.submitted_at)
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(job.notified_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Duplicate(job.id));
        }
        Ok(())
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE id = $1");
        let row = sqlx::query_as::<_, JobRow>(&query)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Job::try_from).transpose()
    }

    async fn compare_and_set(&self, current: &Job, next: &Job) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE jobs SET \
                 status = $3, result_ref = $4, error = $5, delivery_error = $6, slot = $7, \
                 attempt_count = $8, inference_ms = $9, started_at = $10, completed_at = $11, \
                 notified_at = $12, updated_at = NOW() \
             WHERE id = $1 AND status = $2 AND attempt_count = $13",
        )
        .bind(next.id.as_uuid())
        .bind(current.status.as_str())
        .bind(next.status.as_str())
        .bind(&next.result_ref)
        .bind(next.error.clone().map(Json))
        .bind(next.delivery_error.clone().map(Json))
        .bind(&next.slot)
        .bind(attempt_count_column(next))
        .bind(next.inference_ms)
        .bind(next.started_at)
        .bind(next.completed_at)
        .bind(next.notified_at)
        .bind(attempt_count_column(current))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn discard(&self, id: JobId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM jobs WHERE id = $1 AND status = 'pending'")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn list_by_status(
        &self,
        statuses: &[JobStatus],
        limit: usize,
    ) -> Result<Vec<Job>, StoreError> {
        let names: Vec<String> = statuses.iter().map(|s| s.as_str().to_string()).collect();
        let query = format!(
            "SELECT {COLUMNS} FROM jobs WHERE status = ANY($1) ORDER BY submitted_at ASC LIMIT $2"
        );
        let rows = sqlx::query_as::<_, JobRow>(&query)
            .bind(names)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Job::try_from).collect()
    }

    async fn record_heartbeat(&self, heartbeat: &SlotHeartbeat) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO worker_slots (slot, device, current_job_id, seen_at) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (slot) DO UPDATE SET \
                 device = EXCLUDED.device, \
                 current_job_id = EXCLUDED.current_job_id, \
                 seen_at = EXCLUDED.seen_at",
        )
        .bind(&heartbeat.slot)
        .bind(&heartbeat.device)
        .bind(heartbeat.current_job.map(|id| id.as_uuid()))
        .bind(heartbeat.seen_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn live_slots(&self, since: Timestamp) -> Result<Vec<SlotHeartbeat>, StoreError> {
        let rows: Vec<(String, String, Option<Uuid>, Timestamp)> = sqlx::query_as(
            "SELECT slot, device, current_job_id, seen_at FROM worker_slots \
             WHERE seen_at >= $1 ORDER BY slot",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(slot, device, current_job, seen_at)| SlotHeartbeat {
                slot,
                device,
                current_job: current_job.map(JobId::from),
                seen_at,
            })
            .collect())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        crate::health_check(&self.pool).await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Job queue
// ---------------------------------------------------------------------------

/// Job queue backed by the `job_queue` table.
#[derive(Clone)]
pub struct PgJobQueue {
    pool: PgPool,
    visibility_timeout: Duration,
}

impl PgJobQueue {
    pub fn new(pool: PgPool, visibility_timeout: Duration) -> Self {
        Self {
            pool,
            visibility_timeout,
        }
    }

    /// Claim the oldest visible row, hiding it for the visibility timeout.
    async fn try_claim(&self) -> Result<Option<Delivery>, QueueError> {
        let row: Option<(Uuid, i32)> = sqlx::query_as(
            "UPDATE job_queue SET \
                 visible_at = NOW() + make_interval(secs => $1), \
                 deliveries = deliveries + 1 \
             WHERE job_id = ( \
                 SELECT job_id FROM job_queue \
                 WHERE visible_at <= NOW() \
                 ORDER BY enqueued_at ASC \
                 LIMIT 1 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING job_id, deliveries",
        )
        .bind(self.visibility_timeout.as_secs_f64())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(job_id, deliveries)| Delivery {
            job_id: JobId::from(job_id),
            attempt: u32::try_from(deliveries).unwrap_or(1),
        }))
    }
}

#[async_trait]
impl JobQueue for PgJobQueue {
    async fn enqueue(&self, job_id: JobId) -> Result<(), QueueError> {
        sqlx::query(
            "INSERT INTO job_queue (job_id) VALUES ($1) \
             ON CONFLICT (job_id) DO UPDATE SET \
                 visible_at = NOW(), \
                 deliveries = job_queue.deliveries + 1",
        )
        .bind(job_id.as_uuid())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn dequeue(&self, wait: Duration) -> Result<Option<Delivery>, QueueError> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            if let Some(delivery) = self.try_claim().await? {
                return Ok(Some(delivery));
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        // A row redelivered or re-enqueued since this delivery carries a
        // higher count and belongs to the newer consumer.
        sqlx::query("DELETE FROM job_queue WHERE job_id = $1 AND deliveries = $2")
            .bind(delivery.job_id.as_uuid())
            .bind(i32::try_from(delivery.attempt).unwrap_or(i32::MAX))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn depth(&self) -> Result<u64, QueueError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM job_queue")
            .fetch_one(&self.pool)
            .await?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn ping(&self) -> Result<(), QueueError> {
        crate::health_check(&self.pool).await?;
        Ok(())
    }
}

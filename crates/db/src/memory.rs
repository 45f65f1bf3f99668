//! In-process store and queue.
//!
//! Used when no `DATABASE_URL` is configured and throughout the test
//! suites. All state lives behind tokio locks and is lost on restart.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use matte_core::job::{Job, JobStatus};
use matte_core::types::{JobId, Timestamp};
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::time::Instant;

use crate::queue::{Delivery, JobQueue, QueueError};
use crate::store::{JobStore, SlotHeartbeat, StoreError};

// ---------------------------------------------------------------------------
// Job store
// ---------------------------------------------------------------------------

/// Job records held in a map guarded by a single [`RwLock`].
///
/// The compare-and-set check and the write happen under one write guard,
/// so concurrent updates to the same job are serialized.
#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
    slots: RwLock<HashMap<String, SlotHeartbeat>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert(&self, job: &Job) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.id) {
            return Err(StoreError::Duplicate(job.id));
        }
        jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        Ok(self.jobs.read().await.get(&id).cloned())
    }

    async fn compare_and_set(&self, current: &Job, next: &Job) -> Result<bool, StoreError> {
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(&next.id) {
            Some(stored)
                if stored.status == current.status
                    && stored.attempt_count == current.attempt_count =>
            {
                *stored = next.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn discard(&self, id: JobId) -> Result<bool, StoreError> {
        let mut jobs = self.jobs.write().await;
        if jobs.get(&id).map(|j| j.status) == Some(JobStatus::Pending) {
            jobs.remove(&id);
            return Ok(true);
        }
        Ok(false)
    }

    async fn list_by_status(
        &self,
        statuses: &[JobStatus],
        limit: usize,
    ) -> Result<Vec<Job>, StoreError> {
        let jobs = self.jobs.read().await;
        let mut matching: Vec<Job> = jobs
            .values()
            .filter(|j| statuses.contains(&j.status))
            .cloned()
            .collect();
        matching.sort_by_key(|j| j.submitted_at);
        matching.truncate(limit);
        Ok(matching)
    }

    async fn record_heartbeat(&self, heartbeat: &SlotHeartbeat) -> Result<(), StoreError> {
        self.slots
            .write()
            .await
            .insert(heartbeat.slot.clone(), heartbeat.clone());
        Ok(())
    }

    async fn live_slots(&self, since: Timestamp) -> Result<Vec<SlotHeartbeat>, StoreError> {
        let slots = self.slots.read().await;
        let mut live: Vec<SlotHeartbeat> = slots
            .values()
            .filter(|h| h.seen_at >= since)
            .cloned()
            .collect();
        live.sort_by(|a, b| a.slot.cmp(&b.slot));
        Ok(live)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Job queue
// ---------------------------------------------------------------------------

struct InFlight {
    visible_at: Instant,
    attempt: u32,
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<JobId>,
    in_flight: HashMap<JobId, InFlight>,
    deliveries: HashMap<JobId, u32>,
}

impl QueueState {
    /// Move expired in-flight ids back to the ready queue. Returns the
    /// earliest remaining expiry, if any.
    fn reclaim_expired(&mut self, now: Instant) -> Option<Instant> {
        let expired: Vec<JobId> = self
            .in_flight
            .iter()
            .filter(|(_, f)| f.visible_at <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            self.in_flight.remove(&id);
            self.ready.push_back(id);
        }
        self.in_flight.values().map(|f| f.visible_at).min()
    }
}

/// FIFO queue with visibility-timeout redelivery.
pub struct InMemoryJobQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    visibility_timeout: Duration,
}

impl InMemoryJobQueue {
    pub fn new(visibility_timeout: Duration) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            visibility_timeout,
        }
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, job_id: JobId) -> Result<(), QueueError> {
        {
            let mut state = self.state.lock().await;
            if state.ready.contains(&job_id) {
                return Ok(());
            }
            state.in_flight.remove(&job_id);
            state.ready.push_back(job_id);
        }
        self.notify.notify_one();
        Ok(())
    }

    async fn dequeue(&self, wait: Duration) -> Result<Option<Delivery>, QueueError> {
        let deadline = Instant::now() + wait;
        loop {
            let now = Instant::now();
            let next_expiry = {
                let mut state = self.state.lock().await;
                let next_expiry = state.reclaim_expired(now);
                if let Some(job_id) = state.ready.pop_front() {
                    let attempt = {
                        let count = state.deliveries.entry(job_id).or_insert(0);
                        *count += 1;
                        *count
                    };
                    state.in_flight.insert(
                        job_id,
                        InFlight {
                            visible_at: now + self.visibility_timeout,
                            attempt,
                        },
                    );
                    return Ok(Some(Delivery { job_id, attempt }));
                }
                next_expiry
            };

            if now >= deadline {
                return Ok(None);
            }
            let mut wake_at = deadline;
            if let Some(expiry) = next_expiry {
                wake_at = wake_at.min(expiry);
            }
            // Either an enqueue or the next wake-up point ends the wait.
            let _ = tokio::time::timeout_at(wake_at, self.notify.notified()).await;
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        // Only the latest delivery of an id may remove it.
        let current = state
            .in_flight
            .get(&delivery.job_id)
            .is_some_and(|f| f.attempt == delivery.attempt);
        if current {
            state.in_flight.remove(&delivery.job_id);
            state.deliveries.remove(&delivery.job_id);
        }
        Ok(())
    }

    async fn depth(&self) -> Result<u64, QueueError> {
        let state = self.state.lock().await;
        Ok((state.ready.len() + state.in_flight.len()) as u64)
    }

    async fn ping(&self) -> Result<(), QueueError> {
        Ok(())
    }
}

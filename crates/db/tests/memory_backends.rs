use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use chrono::Utc;
use matte_core::job::{CallbackConfig, ErrorKind, Job, JobError, JobStatus, JobUpdate};
use matte_db::{
    Advance, InMemoryJobQueue, InMemoryJobStore, JobQueue, JobStore, SlotHeartbeat, StoreError,
};

fn pending_job() -> Job {
    Job::new(
        "/tmp/uploads/in.png",
        Some("in.png".into()),
        Some(CallbackConfig {
            url: "https://example.com/hook".into(),
            auth_token: None,
            custom_data: None,
        }),
    )
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[tokio::test]
async fn insert_then_get_returns_snapshot() {
    let store = InMemoryJobStore::new();
    let job = pending_job();
    store.insert(&job).await.unwrap();

    let loaded = store.get(job.id).await.unwrap().unwrap();
    assert_eq!(loaded, job);
}

#[tokio::test]
async fn insert_rejects_duplicate_id() {
    let store = InMemoryJobStore::new();
    let job = pending_job();
    store.insert(&job).await.unwrap();
    assert_matches!(store.insert(&job).await, Err(StoreError::Duplicate(id)) if id == job.id);
}

#[tokio::test]
async fn concurrent_claims_have_exactly_one_winner() {
    let store = Arc::new(InMemoryJobStore::new());
    let job = pending_job();
    store.insert(&job).await.unwrap();

    let claims = (0..32).map(|i| {
        let store = Arc::clone(&store);
        let id = job.id;
        tokio::spawn(async move {
            store
                .advance(
                    id,
                    JobUpdate::Claim {
                        slot: format!("slot-{i}@cpu"),
                        at: Utc::now(),
                    },
                )
                .await
                .unwrap()
        })
    });
    let results = futures::future::join_all(claims).await;

    let winners = results
        .into_iter()
        .map(|r| r.unwrap())
        .filter(|a| matches!(a, Advance::Applied(_)))
        .count();
    assert_eq!(winners, 1);
    assert_eq!(
        store.get(job.id).await.unwrap().unwrap().status,
        JobStatus::Processing
    );
}

#[tokio::test]
async fn advance_rejects_invalid_edge_and_reports_status() {
    let store = InMemoryJobStore::new();
    let job = pending_job();
    store.insert(&job).await.unwrap();

    let result = store
        .advance(
            job.id,
            JobUpdate::Fail {
                error: JobError::new(ErrorKind::ProcessingFailure, "boom"),
                inference_ms: None,
                at: Utc::now(),
            },
        )
        .await
        .unwrap();
    assert_eq!(result, Advance::Rejected(JobStatus::Pending));
}

#[tokio::test]
async fn advance_on_unknown_job_is_missing() {
    let store = InMemoryJobStore::new();
    let result = store
        .advance(pending_job().id, JobUpdate::BeginNotify)
        .await
        .unwrap();
    assert_eq!(result, Advance::Missing);
}

#[tokio::test]
async fn stale_compare_and_set_does_not_write() {
    let store = InMemoryJobStore::new();
    let job = pending_job();
    store.insert(&job).await.unwrap();

    let mut stale = job.clone();
    stale.status = JobStatus::Processing;
    let mut next = job.clone();
    next.status = JobStatus::Completed;
    assert!(!store.compare_and_set(&stale, &next).await.unwrap());
    assert_eq!(
        store.get(job.id).await.unwrap().unwrap().status,
        JobStatus::Pending
    );
}

#[tokio::test]
async fn compare_and_set_checks_the_attempt_count() {
    let store = InMemoryJobStore::new();
    let mut job = pending_job();
    job.status = JobStatus::Notifying;
    store.insert(&job).await.unwrap();

    let first = job.apply(JobUpdate::RecordAttempt { max_attempts: 3 }).unwrap();
    assert!(store.compare_and_set(&job, &first).await.unwrap());

    // Same status, but computed from a snapshot taken before the first write.
    let second = job.apply(JobUpdate::RecordAttempt { max_attempts: 3 }).unwrap();
    assert!(!store.compare_and_set(&job, &second).await.unwrap());
    assert_eq!(store.get(job.id).await.unwrap().unwrap().attempt_count, 1);
}

#[tokio::test]
async fn discard_only_removes_pending_jobs() {
    let store = InMemoryJobStore::new();
    let job = pending_job();
    store.insert(&job).await.unwrap();
    store
        .advance(
            job.id,
            JobUpdate::Claim {
                slot: "slot-0@cpu".into(),
                at: Utc::now(),
            },
        )
        .await
        .unwrap();
    assert!(!store.discard(job.id).await.unwrap());

    let other = pending_job();
    store.insert(&other).await.unwrap();
    assert!(store.discard(other.id).await.unwrap());
    assert!(store.get(other.id).await.unwrap().is_none());
}

#[tokio::test]
async fn list_by_status_filters_and_limits() {
    let store = InMemoryJobStore::new();
    for _ in 0..3 {
        store.insert(&pending_job()).await.unwrap();
    }
    let claimed = pending_job();
    store.insert(&claimed).await.unwrap();
    store
        .advance(
            claimed.id,
            JobUpdate::Claim {
                slot: "slot-0@cpu".into(),
                at: Utc::now(),
            },
        )
        .await
        .unwrap();

    let pending = store
        .list_by_status(&[JobStatus::Pending], 10)
        .await
        .unwrap();
    assert_eq!(pending.len(), 3);
    assert!(pending.windows(2).all(|w| w[0].submitted_at <= w[1].submitted_at));

    let limited = store
        .list_by_status(&[JobStatus::Pending, JobStatus::Processing], 2)
        .await
        .unwrap();
    assert_eq!(limited.len(), 2);
}

#[tokio::test]
async fn live_slots_excludes_old_heartbeats() {
    let store = InMemoryJobStore::new();
    let now = Utc::now();
    store
        .record_heartbeat(&SlotHeartbeat {
            slot: "slot-0@cpu".into(),
            device: "cpu".into(),
            current_job: None,
            seen_at: now,
        })
        .await
        .unwrap();
    store
        .record_heartbeat(&SlotHeartbeat {
            slot: "slot-1@cpu".into(),
            device: "cpu".into(),
            current_job: None,
            seen_at: now - chrono::Duration::seconds(120),
        })
        .await
        .unwrap();

    let live = store
        .live_slots(now - chrono::Duration::seconds(30))
        .await
        .unwrap();
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].slot, "slot-0@cpu");
}

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

#[tokio::test]
async fn queue_is_fifo() {
    let queue = InMemoryJobQueue::new(Duration::from_secs(60));
    let ids: Vec<_> = (0..3).map(|_| pending_job().id).collect();
    for id in &ids {
        queue.enqueue(*id).await.unwrap();
    }

    for expected in &ids {
        let delivery = queue.dequeue(Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(delivery.job_id, *expected);
        assert_eq!(delivery.attempt, 1);
    }
    assert!(queue.dequeue(Duration::ZERO).await.unwrap().is_none());
}

#[tokio::test]
async fn enqueue_is_idempotent() {
    let queue = InMemoryJobQueue::new(Duration::from_secs(60));
    let id = pending_job().id;
    queue.enqueue(id).await.unwrap();
    queue.enqueue(id).await.unwrap();
    assert_eq!(queue.depth().await.unwrap(), 1);

    queue.dequeue(Duration::ZERO).await.unwrap().unwrap();
    assert!(queue.dequeue(Duration::ZERO).await.unwrap().is_none());
}

#[tokio::test]
async fn unacked_delivery_is_redelivered_after_visibility_timeout() {
    let queue = InMemoryJobQueue::new(Duration::from_millis(50));
    let id = pending_job().id;
    queue.enqueue(id).await.unwrap();

    let first = queue.dequeue(Duration::ZERO).await.unwrap().unwrap();
    assert!(queue.dequeue(Duration::ZERO).await.unwrap().is_none());

    let second = queue
        .dequeue(Duration::from_secs(2))
        .await
        .unwrap()
        .expect("redelivery after visibility timeout");
    assert_eq!(second.job_id, first.job_id);
    assert_eq!(second.attempt, 2);
}

#[tokio::test]
async fn acked_delivery_is_gone() {
    let queue = InMemoryJobQueue::new(Duration::from_millis(20));
    let id = pending_job().id;
    queue.enqueue(id).await.unwrap();

    let delivery = queue.dequeue(Duration::ZERO).await.unwrap().unwrap();
    queue.ack(&delivery).await.unwrap();
    assert_eq!(queue.depth().await.unwrap(), 0);
    assert!(queue
        .dequeue(Duration::from_millis(100))
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn waiting_dequeue_wakes_on_enqueue() {
    let queue = Arc::new(InMemoryJobQueue::new(Duration::from_secs(60)));
    let id = pending_job().id;

    let consumer = {
        let queue = Arc::clone(&queue);
        tokio::spawn(async move { queue.dequeue(Duration::from_secs(5)).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    queue.enqueue(id).await.unwrap();

    let delivery = consumer.await.unwrap().unwrap().unwrap();
    assert_eq!(delivery.job_id, id);
}

#[tokio::test]
async fn stale_ack_keeps_a_re_enqueued_id() {
    let queue = InMemoryJobQueue::new(Duration::from_secs(60));
    let id = pending_job().id;
    queue.enqueue(id).await.unwrap();
    let stale = queue.dequeue(Duration::ZERO).await.unwrap().unwrap();

    // Handed back while the first consumer still holds it.
    queue.enqueue(id).await.unwrap();
    queue.ack(&stale).await.unwrap();
    assert_eq!(queue.depth().await.unwrap(), 1);

    let current = queue.dequeue(Duration::ZERO).await.unwrap().unwrap();
    assert_eq!(current.job_id, id);
    assert!(current.attempt > stale.attempt);
    queue.ack(&stale).await.unwrap();
    assert_eq!(queue.depth().await.unwrap(), 1);

    queue.ack(&current).await.unwrap();
    assert_eq!(queue.depth().await.unwrap(), 0);
}

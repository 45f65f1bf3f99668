//! Job Store and Job Queue backends.
//!
//! Both are exposed as traits ([`JobStore`], [`JobQueue`]) so every other
//! component receives an injected `Arc<dyn …>` handle created at startup.
//! Two backends exist: in-process ([`memory`]) for single-binary
//! deployments and tests, and PostgreSQL ([`postgres`]) for durable,
//! multi-process deployments.

use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;

pub mod memory;
pub mod postgres;
pub mod queue;
pub mod store;

pub use memory::{InMemoryJobQueue, InMemoryJobStore};
pub use postgres::{PgJobQueue, PgJobStore};
pub use queue::{Delivery, JobQueue, QueueError};
pub use store::{Advance, JobStore, SlotHeartbeat, StoreError};

pub type DbPool = sqlx::PgPool;

/// Default queue visibility timeout. Longer than the default inference
/// timeout so a live worker never loses its delivery.
pub const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(1900);

/// Create a connection pool from a database URL.
pub async fn create_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(20)
        .connect(database_url)
        .await
}

/// Verify the database answers a trivial query.
pub async fn health_check(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Apply pending migrations from `crates/db/migrations`.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

/// Queue settings loaded from the environment.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// How long a delivery stays invisible to other workers before it is
    /// redelivered (`QUEUE_VISIBILITY_TIMEOUT_SECS`, default `1900`).
    pub visibility_timeout: Duration,
}

impl QueueConfig {
    pub fn from_env() -> Self {
        let visibility_timeout = std::env::var("QUEUE_VISIBILITY_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_VISIBILITY_TIMEOUT);
        Self { visibility_timeout }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            visibility_timeout: DEFAULT_VISIBILITY_TIMEOUT,
        }
    }
}

/// The store/queue pair shared by every component of a process.
#[derive(Clone)]
pub struct Backends {
    pub store: Arc<dyn JobStore>,
    pub queue: Arc<dyn JobQueue>,
}

impl Backends {
    /// In-process store and queue. State is lost on restart.
    pub fn in_memory(config: &QueueConfig) -> Self {
        Self {
            store: Arc::new(InMemoryJobStore::new()),
            queue: Arc::new(InMemoryJobQueue::new(config.visibility_timeout)),
        }
    }

    /// PostgreSQL-backed store and queue. Connects, checks health and
    /// applies migrations before returning.
    pub async fn postgres(database_url: &str, config: &QueueConfig) -> Result<Self, sqlx::Error> {
        let pool = create_pool(database_url).await?;
        tracing::info!("Database connection pool created");

        health_check(&pool).await?;
        tracing::info!("Database health check passed");

        run_migrations(&pool).await?;
        tracing::info!("Database migrations applied");

        Ok(Self {
            store: Arc::new(PgJobStore::new(pool.clone())),
            queue: Arc::new(PgJobQueue::new(pool, config.visibility_timeout)),
        })
    }
}

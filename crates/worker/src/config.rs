use std::time::Duration;

use matte_pipeline::{parse_device_list, Device};

use crate::error::PoolError;

/// Worker pool settings loaded from environment variables.
///
/// | Env var                  | Default  |
/// |--------------------------|----------|
/// | `WORKER_DEVICES`         | `cuda:0` |
/// | `INFERENCE_TIMEOUT_SECS` | `1800`   |
/// | `DEQUEUE_WAIT_MS`        | `1000`   |
/// | `STORAGE_RETRY_DELAY_MS` | `500`    |
/// | `STALE_JOB_TIMEOUT_SECS` | `3600`   |
/// | `REAPER_INTERVAL_SECS`   | `60`     |
///
/// One slot is started per entry in `WORKER_DEVICES`
/// (e.g. `cuda:0,cuda:1` runs two slots).
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub devices: Vec<Device>,
    /// Hard limit on a single inference call.
    pub inference_timeout: Duration,
    /// How long one dequeue call waits for work.
    pub dequeue_wait: Duration,
    /// Backoff before the single result-storage retry.
    pub storage_retry_delay: Duration,
    /// Jobs stuck in `processing` (or `pending`) longer than this are
    /// handed back to the queue by the reaper.
    pub stale_job_timeout: Duration,
    pub reaper_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            devices: vec![Device::Cuda(0)],
            inference_timeout: Duration::from_secs(1800),
            dequeue_wait: Duration::from_millis(1000),
            storage_retry_delay: Duration::from_millis(500),
            stale_job_timeout: Duration::from_secs(3600),
            reaper_interval: Duration::from_secs(60),
        }
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self, PoolError> {
        let devices = std::env::var("WORKER_DEVICES").unwrap_or_else(|_| "cuda:0".into());
        let devices = parse_device_list(&devices)
            .map_err(|e| PoolError::Config(format!("WORKER_DEVICES: {e}")))?;

        Ok(Self {
            devices,
            inference_timeout: Duration::from_secs(env_u64("INFERENCE_TIMEOUT_SECS", 1800)),
            dequeue_wait: Duration::from_millis(env_u64("DEQUEUE_WAIT_MS", 1000)),
            storage_retry_delay: Duration::from_millis(env_u64("STORAGE_RETRY_DELAY_MS", 500)),
            stale_job_timeout: Duration::from_secs(env_u64("STALE_JOB_TIMEOUT_SECS", 3600)),
            reaper_interval: Duration::from_secs(env_u64("REAPER_INTERVAL_SECS", 60).max(1)),
        })
    }
}

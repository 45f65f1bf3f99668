use std::time::Duration;

use matte_core::retry::RetryPolicy;

/// Callback dispatcher settings loaded from environment variables.
///
/// | Env var                      | Default |
/// |------------------------------|---------|
/// | `CALLBACK_MAX_ATTEMPTS`      | `5`     |
/// | `CALLBACK_BASE_DELAY_MS`     | `1000`  |
/// | `CALLBACK_MAX_DELAY_MS`      | `60000` |
/// | `CALLBACK_TIMEOUT_SECS`      | `10`    |
/// | `CALLBACK_CONCURRENCY`       | `32`    |
/// | `CALLBACK_NOTIFY_PROCESSING` | `false` |
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub retry: RetryPolicy,
    /// Timeout for a single delivery attempt.
    pub request_timeout: Duration,
    /// Maximum number of jobs being delivered at once.
    pub concurrency: usize,
    /// Send a best-effort `processing` callback when a job is claimed.
    pub notify_processing: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            request_timeout: Duration::from_secs(10),
            concurrency: 32,
            notify_processing: false,
        }
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl DispatcherConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            retry: RetryPolicy {
                max_attempts: env_or("CALLBACK_MAX_ATTEMPTS", defaults.retry.max_attempts).max(1),
                base_delay: Duration::from_millis(env_or("CALLBACK_BASE_DELAY_MS", 1000)),
                max_delay: Duration::from_millis(env_or("CALLBACK_MAX_DELAY_MS", 60_000)),
            },
            request_timeout: Duration::from_secs(env_or("CALLBACK_TIMEOUT_SECS", 10)),
            concurrency: env_or("CALLBACK_CONCURRENCY", defaults.concurrency).max(1),
            notify_processing: env_or("CALLBACK_NOTIFY_PROCESSING", false),
        }
    }
}

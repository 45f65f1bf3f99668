use std::str::FromStr;

/// Error raised when an environment variable holds an unusable value.
#[derive(Debug, thiserror::Error)]
#[error("{name} is invalid: {reason}")]
pub struct ConfigError {
    pub name: &'static str,
    pub reason: String,
}

/// Server configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `8000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS`.
    /// `*` allows any origin.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// Largest accepted request body in bytes (default: 20 MiB).
    pub max_upload_bytes: usize,
    /// Run the worker pool, dispatcher and reaper inside the API process.
    pub embedded_workers: bool,
    /// A slot counts as live if it heartbeated within this window.
    pub health_slot_window_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8000,
            cors_origins: vec!["*".into()],
            request_timeout_secs: 30,
            max_upload_bytes: 20 * 1024 * 1024,
            embedded_workers: true,
            health_slot_window_secs: 30,
        }
    }
}

fn parse_var<T>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError {
            name,
            reason: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                   | Default    |
    /// |---------------------------|------------|
    /// | `HOST`                    | `0.0.0.0`  |
    /// | `PORT`                    | `8000`     |
    /// | `CORS_ORIGINS`            | `*`        |
    /// | `REQUEST_TIMEOUT_SECS`    | `30`       |
    /// | `MAX_UPLOAD_BYTES`        | `20971520` |
    /// | `EMBEDDED_WORKERS`        | `true`     |
    /// | `HEALTH_SLOT_WINDOW_SECS` | `30`       |
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let host = std::env::var("HOST").unwrap_or(defaults.host);

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or(defaults.cors_origins);

        Ok(Self {
            host,
            port: parse_var("PORT", defaults.port)?,
            cors_origins,
            request_timeout_secs: parse_var("REQUEST_TIMEOUT_SECS", defaults.request_timeout_secs)?,
            max_upload_bytes: parse_var("MAX_UPLOAD_BYTES", defaults.max_upload_bytes)?,
            embedded_workers: parse_var("EMBEDDED_WORKERS", defaults.embedded_workers)?,
            health_slot_window_secs: parse_var(
                "HEALTH_SLOT_WINDOW_SECS",
                defaults.health_slot_window_secs,
            )?,
        })
    }
}

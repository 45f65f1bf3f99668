use axum::extract::State;
use axum::{routing::get, Json, Router};
use chrono::{DateTime, Utc};
use matte_db::SlotHeartbeat;
use serde::Serialize;

use crate::state::AppState;

/// Health check response payload.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// `ok` when every component is healthy, `degraded` otherwise.
    pub status: &'static str,
    /// Crate version from Cargo.toml.
    pub version: &'static str,
    pub components: Components,
}

#[derive(Debug, Serialize)]
pub struct Components {
    pub store: ComponentHealth,
    pub queue: QueueHealth,
    pub workers: WorkersHealth,
}

#[derive(Debug, Serialize)]
pub struct ComponentHealth {
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct QueueHealth {
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub depth: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Slots that heartbeated within the configured window.
#[derive(Debug, Serialize)]
pub struct WorkersHealth {
    pub healthy: bool,
    pub live_slots: Vec<SlotHeartbeat>,
}

/// GET /health -- aggregate health of the job store, queue and worker slots.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let store = match state.backends.store.ping().await {
        Ok(()) => ComponentHealth {
            healthy: true,
            error: None,
        },
        Err(e) => {
            tracing::warn!(error = %e, "Health: job store unreachable");
            ComponentHealth {
                healthy: false,
                error: Some("unreachable".into()),
            }
        }
    };

    let queue = match state.backends.queue.ping().await {
        Ok(()) => QueueHealth {
            healthy: true,
            depth: state.backends.queue.depth().await.ok(),
            error: None,
        },
        Err(e) => {
            tracing::warn!(error = %e, "Health: job queue unreachable");
            QueueHealth {
                healthy: false,
                depth: None,
                error: Some("unreachable".into()),
            }
        }
    };

    let window_secs = i64::try_from(state.config.health_slot_window_secs)
        .unwrap_or(i64::MAX)
        .min(i64::MAX / 1000);
    let since = Utc::now()
        .checked_sub_signed(chrono::Duration::seconds(window_secs))
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
    let live_slots = match state.backends.store.live_slots(since).await {
        Ok(slots) => slots,
        Err(e) => {
            tracing::warn!(error = %e, "Health: could not read slot heartbeats");
            Vec::new()
        }
    };
    let workers = WorkersHealth {
        healthy: !live_slots.is_empty(),
        live_slots,
    };

    let all_healthy = store.healthy && queue.healthy && workers.healthy;

    Json(HealthResponse {
        status: if all_healthy { "ok" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        components: Components {
            store,
            queue,
            workers,
        },
    })
}

/// Mount health check routes (intended for root-level, NOT under `/api/v1`).
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}

use std::sync::Arc;

use matte_db::Backends;

use crate::config::ServerConfig;
use crate::gateway::SubmissionGateway;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable: everything is behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// Job store and queue, also probed by the health check.
    pub backends: Backends,
    pub gateway: Arc<SubmissionGateway>,
    pub config: Arc<ServerConfig>,
}

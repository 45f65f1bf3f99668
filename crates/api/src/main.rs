use std::net::SocketAddr;
use std::sync::Arc;

use matte_api::config::ServerConfig;
use matte_api::gateway::SubmissionGateway;
use matte_api::router::build_app_router;
use matte_api::state::AppState;
use matte_db::{Backends, QueueConfig};
use matte_events::DispatcherConfig;
use matte_pipeline::LumaKeyFactory;
use matte_storage::{InputStore, StorageConfig};
use matte_worker::logging::init_tracing;
use matte_worker::signal::shutdown_signal;
use matte_worker::{RuntimeParts, WorkerConfig, WorkerRuntime};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    init_tracing("matte_api=debug,matte_worker=debug,matte_events=info,tower_http=debug");

    // --- Configuration ---
    let config = ServerConfig::from_env().expect("Invalid server configuration");
    let storage = StorageConfig::from_env();
    tracing::info!(
        host = %config.host,
        port = config.port,
        embedded_workers = config.embedded_workers,
        "Loaded server configuration"
    );

    // --- Store and queue ---
    let queue_config = QueueConfig::from_env();
    let backends = match std::env::var("DATABASE_URL") {
        Ok(url) => Backends::postgres(&url, &queue_config)
            .await
            .expect("Failed to initialise database backends"),
        Err(_) => {
            assert!(
                config.embedded_workers,
                "EMBEDDED_WORKERS must be enabled when DATABASE_URL is unset"
            );
            tracing::warn!("DATABASE_URL not set, using in-memory store and queue");
            Backends::in_memory(&queue_config)
        }
    };

    let inputs = InputStore::new(&storage.upload_dir);

    // --- Embedded workers ---
    let runtime = if config.embedded_workers {
        let sink = matte_storage::build_sink(&storage)
            .await
            .expect("Failed to initialise result storage");
        tracing::info!(backend = sink.backend(), "Result storage ready");

        let runtime = WorkerRuntime::start(RuntimeParts {
            backends: backends.clone(),
            sink,
            inputs: inputs.clone(),
            factory: Arc::new(LumaKeyFactory::from_env()),
            worker: WorkerConfig::from_env().expect("Invalid worker configuration"),
            dispatcher: DispatcherConfig::from_env(),
        })
        .await
        .expect("Failed to start embedded workers");
        Some(runtime)
    } else {
        None
    };

    // --- App state ---
    let gateway = SubmissionGateway::new(
        Arc::clone(&backends.store),
        Arc::clone(&backends.queue),
        inputs,
    );
    let state = AppState {
        backends,
        gateway: Arc::new(gateway),
        config: Arc::new(config.clone()),
    };
    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");
    if let Some(runtime) = runtime {
        runtime.shutdown().await;
    }

    tracing::info!("Graceful shutdown complete");
}

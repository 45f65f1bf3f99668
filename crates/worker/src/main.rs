use std::sync::Arc;

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
    init_tracing("matte_worker=debug,matte_events=info,matte_db=info,matte_storage=info");

    // --- Configuration ---
    let worker = WorkerConfig::from_env().expect("Invalid worker configuration");
    let dispatcher = DispatcherConfig::from_env();
    let storage = StorageConfig::from_env();
    tracing::info!(
        devices = ?worker.devices,
        inference_timeout_secs = worker.inference_timeout.as_secs(),
        "Loaded worker configuration"
    );

    // --- Database ---
    // A standalone worker shares state with the API only through Postgres.
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let backends = Backends::postgres(&database_url, &QueueConfig::from_env())
        .await
        .expect("Failed to initialise database backends");

    // --- Storage ---
    let sink = matte_storage::build_sink(&storage)
        .await
        .expect("Failed to initialise result storage");
    tracing::info!(backend = sink.backend(), "Result storage ready");
    let inputs = InputStore::new(&storage.upload_dir);

    // --- Runtime ---
    let runtime = WorkerRuntime::start(RuntimeParts {
        backends,
        sink,
        inputs,
        factory: Arc::new(LumaKeyFactory::from_env()),
        worker,
        dispatcher,
    })
    .await
    .expect("Failed to start worker runtime");

    shutdown_signal().await;

    runtime.shutdown().await;
    tracing::info!("Graceful shutdown complete");
}

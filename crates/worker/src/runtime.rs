//! Wiring of the background services shared by both binaries: callback
//! dispatcher, worker pool and stale-job reaper.

use std::sync::Arc;
use std::time::Duration;

use matte_db::Backends;
use matte_events::{CallbackDispatcher, DispatchHandle, DispatcherConfig};
use matte_pipeline::EngineFactory;
use matte_storage::{InputStore, ResultSink};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::WorkerConfig;
use crate::error::PoolError;
use crate::pool::{SlotInfo, WorkerPool};
use crate::reaper::Reaper;
use crate::slot::SlotContext;

/// How long shutdown waits for in-flight callbacks.
const DISPATCHER_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Everything needed to start a [`WorkerRuntime`].
pub struct RuntimeParts {
    pub backends: Backends,
    pub sink: Arc<dyn ResultSink>,
    pub inputs: InputStore,
    pub factory: Arc<dyn EngineFactory>,
    pub worker: WorkerConfig,
    pub dispatcher: DispatcherConfig,
}

/// Running dispatcher, pool and reaper.
pub struct WorkerRuntime {
    pool: WorkerPool,
    dispatch: DispatchHandle,
    dispatcher_task: JoinHandle<()>,
    dispatcher_cancel: CancellationToken,
    reaper_task: JoinHandle<()>,
    reaper_cancel: CancellationToken,
}

impl WorkerRuntime {
    /// Start the dispatcher, re-dispatch unfinished notifications, then
    /// start the worker pool and the reaper.
    pub async fn start(parts: RuntimeParts) -> Result<Self, PoolError> {
        let RuntimeParts {
            backends,
            sink,
            inputs,
            factory,
            worker,
            dispatcher,
        } = parts;

        let dispatcher_cancel = CancellationToken::new();
        let dispatcher = Arc::new(CallbackDispatcher::new(
            Arc::clone(&backends.store),
            dispatcher,
            dispatcher_cancel.clone(),
        )?);
        let (dispatch, dispatcher_task) = Arc::clone(&dispatcher).spawn();
        let recovered = dispatcher.recover(&dispatch).await?;
        tracing::debug!(recovered, "Callback recovery scan finished");

        let reaper = Reaper::new(
            Arc::clone(&backends.store),
            Arc::clone(&backends.queue),
            worker.stale_job_timeout,
            worker.reaper_interval,
        );

        let ctx = SlotContext {
            store: backends.store,
            queue: backends.queue,
            sink,
            inputs,
            dispatch: dispatch.clone(),
            config: worker,
        };
        let pool = match WorkerPool::start(ctx, factory.as_ref()) {
            Ok(pool) => pool,
            Err(e) => {
                dispatcher_cancel.cancel();
                return Err(e);
            }
        };

        let reaper_cancel = CancellationToken::new();
        let reaper_task = tokio::spawn(reaper.run(reaper_cancel.clone()));

        Ok(Self {
            pool,
            dispatch,
            dispatcher_task,
            dispatcher_cancel,
            reaper_task,
            reaper_cancel,
        })
    }

    pub fn slots(&self) -> &[SlotInfo] {
        self.pool.slots()
    }

    /// Stop in dependency order: slots finish their current job and hand it
    /// off, then the dispatcher takes every queued hand-off and finishes its
    /// deliveries within the drain timeout, then the reaper stops.
    pub async fn shutdown(self) {
        self.pool.shutdown().await;

        drop(self.dispatch);
        self.dispatcher_cancel.cancel();
        if tokio::time::timeout(DISPATCHER_DRAIN_TIMEOUT, self.dispatcher_task)
            .await
            .is_err()
        {
            tracing::warn!("Callback dispatcher did not drain in time");
        }

        self.reaper_cancel.cancel();
        let _ = self.reaper_task.await;
        tracing::info!("Worker runtime stopped");
    }
}

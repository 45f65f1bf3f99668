use std::sync::Arc;

use matte_pipeline::{Device, EngineFactory};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::PoolError;
use crate::slot::{Slot, SlotContext};

/// Static description of a running slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotInfo {
    pub name: String,
    pub device: Device,
}

/// Fixed set of worker slots, one per configured device.
pub struct WorkerPool {
    slots: Vec<SlotInfo>,
    tasks: Vec<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl WorkerPool {
    /// Load one engine per device and start a task per slot.
    ///
    /// Fails without starting anything if any engine fails to load.
    pub fn start(ctx: SlotContext, factory: &dyn EngineFactory) -> Result<Self, PoolError> {
        if ctx.config.devices.is_empty() {
            return Err(PoolError::Config("At least one worker device is required".into()));
        }

        let ctx = Arc::new(ctx);
        let mut slots = Vec::with_capacity(ctx.config.devices.len());
        for (index, device) in ctx.config.devices.iter().copied().enumerate() {
            let engine = factory
                .load(device)
                .map_err(|source| PoolError::EngineLoad { device, source })?;
            slots.push(Slot::new(index, device, engine, Arc::clone(&ctx)));
        }

        let cancel = CancellationToken::new();
        let mut infos = Vec::with_capacity(slots.len());
        let mut tasks = Vec::with_capacity(slots.len());
        for slot in slots {
            infos.push(SlotInfo {
                name: slot.name().to_string(),
                device: slot.device(),
            });
            tasks.push(tokio::spawn(slot.run(cancel.child_token())));
        }

        tracing::info!(slots = infos.len(), "Worker pool started");
        Ok(Self {
            slots: infos,
            tasks,
            cancel,
        })
    }

    pub fn slots(&self) -> &[SlotInfo] {
        &self.slots
    }

    /// Stop taking new jobs and wait for every slot to finish its current
    /// job.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Worker slot task panicked");
            }
        }
        tracing::info!("Worker pool stopped");
    }
}

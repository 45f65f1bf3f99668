//! Worker pool runtime.
//!
//! A fixed set of slots, one per configured device, pulls job ids from the
//! shared queue and runs inference one job at a time. Finished jobs are
//! handed to the callback dispatcher. A periodic reaper returns jobs that
//! were abandoned mid-processing to the queue.

pub mod config;
pub mod error;
pub mod logging;
pub mod pool;
pub mod reaper;
pub mod runtime;
pub mod signal;
pub mod slot;

pub use config::WorkerConfig;
pub use error::PoolError;
pub use pool::{SlotInfo, WorkerPool};
pub use reaper::{Reaper, SweepReport};
pub use runtime::{RuntimeParts, WorkerRuntime};
pub use slot::SlotContext;

use std::sync::Arc;

use tracing::info;

use super::{Queue, ThreadPool};
use crate::TesseraCoreResult;
use crate::config::SchedulerConfig;

/// The pools shared by all components of one application.
///
/// Construct it once at startup and pass clones to whatever needs to schedule work.
#[derive(Clone, Debug)]
pub struct SchedulerContext {
    cpu_bound: ThreadPool,
    sequential: ThreadPool,
    reaper: ThreadPool,
}

impl SchedulerContext {
    /// Creates a CPU-bound pool sized by `config`, plus single-worker sequential and reaper pools.
    pub fn new(config: &SchedulerConfig) -> TesseraCoreResult<Self> {
        let threads = config.cpu_threads();
        info!("Starting scheduler with {threads} CPU-bound workers");
        Ok(Self {
            cpu_bound: ThreadPool::new("cpu", threads)?,
            sequential: ThreadPool::new("sequential", 1)?,
            reaper: ThreadPool::new("reaper", 1)?,
        })
    }

    /// Assembles a context from existing pools, e.g. worker-less pools in tests.
    #[must_use]
    pub fn with_pools(cpu_bound: ThreadPool, sequential: ThreadPool, reaper: ThreadPool) -> Self {
        Self {
            cpu_bound,
            sequential,
            reaper,
        }
    }

    /// Pool for tile work: fills, reductions, loads and cache computation.
    #[must_use]
    pub fn cpu_bound(&self) -> &ThreadPool {
        &self.cpu_bound
    }

    /// Single-worker pool for strictly ordered work such as pyramid loads.
    #[must_use]
    pub fn sequential(&self) -> &ThreadPool {
        &self.sequential
    }

    #[must_use]
    pub fn reaper(&self) -> &ThreadPool {
        &self.reaper
    }

    /// A fresh queue that drains on the reaper pool when dropped.
    #[must_use]
    pub fn async_queue(&self) -> Arc<Queue> {
        Queue::create_async(&self.reaper)
    }
}

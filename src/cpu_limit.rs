//! Tools for limiting the number of concurrent CPU-bound external processes.

use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::prelude::*;

/// Limits how many `pdftocairo` and `tesseract` processes run at once.
///
/// Cloning shares the same permits. The worker pool may be larger than this
/// limit, so that PNG decoding and file I/O overlap with the external
/// processes, but we never want more processes than cores each trying to use
/// 100% of a CPU.
#[derive(Clone, Debug)]
pub struct CpuLimit {
    semaphore: Arc<Semaphore>,
}

impl CpuLimit {
    /// Allow up to `permits` processes at once. Zero is treated as one.
    pub fn new(permits: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(permits.max(1))),
        }
    }

    /// Allow one process per CPU.
    pub fn per_cpu() -> Self {
        Self::new(num_cpus::get())
    }

    /// Call an async function while holding a permit.
    #[instrument(level = "trace", skip_all)]
    pub async fn run<Func, Fut, R>(&self, f: Func) -> Result<R>
    where
        Func: FnOnce() -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .context("Could not acquire CPU permit")?;
        f().await
    }

    /// Number of permits not currently held.
    #[cfg(test)]
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

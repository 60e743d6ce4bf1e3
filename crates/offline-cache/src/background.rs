//! Best-effort background writes
//!
//! Storage writes that must not delay a response are submitted here instead of
//! being awaited. Failures are logged and never reach the caller. Dropping the
//! set detaches whatever is still running instead of cancelling it.

use crate::error::Result;
use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use tokio::task::JoinSet;
use tracing::{debug, warn};

#[derive(Default)]
pub struct BackgroundWrites {
    tasks: Mutex<JoinSet<()>>,
}

impl BackgroundWrites {
    pub fn new() -> Self {
        Self::default()
    }

    fn tasks(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Spawn `write` on the runtime. Must be called from within a tokio runtime.
    pub fn submit<F>(&self, description: String, write: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let mut tasks = self.tasks();
        while tasks.try_join_next().is_some() {}

        tasks.spawn(async move {
            match write.await {
                Ok(()) => debug!(write = %description, "Background write finished"),
                Err(e) => warn!(write = %description, error = %e, "Background write failed"),
            }
        });
    }

    /// Writes submitted but not yet reaped
    pub fn pending(&self) -> usize {
        self.tasks().len()
    }

    /// Wait for every write submitted so far
    pub async fn flush(&self) {
        let mut drained = std::mem::take(&mut *self.tasks());
        while let Some(joined) = drained.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "Background write task panicked or was cancelled");
            }
        }
    }
}

impl Drop for BackgroundWrites {
    fn drop(&mut self) {
        self.tasks
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .detach_all();
    }
}

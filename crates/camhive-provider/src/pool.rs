use std::future::Future;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use tokio::sync::Semaphore;
use tokio::task::{AbortHandle, JoinError, JoinHandle};

/// Bounded set of permits shared by every classification call, so slow
/// network classifiers never occupy more than `size` tasks at once.
#[derive(Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Run `job` on its own task once a permit is free.
    pub fn spawn<F, R>(&self, job: F) -> JoinHandle<Result<R>>
    where
        F: Future<Output = Result<R>> + Send + 'static,
        R: Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        tokio::spawn(async move {
            let _permit = permits
                .acquire_owned()
                .await
                .map_err(|_| anyhow!("worker pool closed"))?;
            job.await
        })
    }
}

/// Aborts every tracked job when dropped. Aborting a finished job is a no-op,
/// so a caller can hold one for its whole lifetime.
#[derive(Default)]
pub struct AbortOnDrop {
    jobs: Vec<AbortHandle>,
}

impl AbortOnDrop {
    pub fn track<R>(&mut self, handle: &JoinHandle<R>) {
        self.jobs.push(handle.abort_handle());
    }
}

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        for job in &self.jobs {
            job.abort();
        }
    }
}

/// Flatten a joined job result, turning panics and cancellation into errors.
pub fn flatten<R>(joined: std::result::Result<Result<R>, JoinError>) -> Result<R> {
    match joined {
        Ok(result) => result,
        Err(err) if err.is_cancelled() => Err(anyhow!("classification task cancelled")),
        Err(err) => Err(anyhow!("classification task panicked: {err}")),
    }
}

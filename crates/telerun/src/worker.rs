//! Bounded pool for blocking work against remote targets.

use std::sync::Arc;

use tokio::sync::Semaphore;

pub const DEFAULT_WORKERS: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The job panicked; carries the panic message when it was a string.
    Panicked(String),
    /// The job was cancelled before it finished.
    Cancelled,
    /// The pool was shut down.
    Closed,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Panicked(msg) => write!(f, "worker panicked: {}", msg),
            Self::Cancelled => write!(f, "worker job cancelled"),
            Self::Closed => write!(f, "worker pool closed"),
        }
    }
}

impl std::error::Error for Error {}

/// Runs blocking closures on tokio's blocking threads, at most `size` at once.
#[derive(Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self { permits: Arc::new(Semaphore::new(size)), size }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Runs `job` on a blocking thread once a permit is free.
    pub async fn run<F, T>(&self, job: F) -> Result<T, Error>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let permit = self.permits.clone().acquire_owned().await.map_err(|_| Error::Closed)?;
        let handle = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            job()
        });
        match handle.await {
            Ok(out) => Ok(out),
            Err(e) if e.is_panic() => {
                let payload = e.into_panic();
                let msg = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "non-string panic payload".to_owned());
                Err(Error::Panicked(msg))
            }
            Err(_) => Err(Error::Cancelled),
        }
    }

    /// Refuses new jobs; running jobs finish.
    pub fn close(&self) {
        self.permits.close();
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(DEFAULT_WORKERS)
    }
}

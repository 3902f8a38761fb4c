//! # Session Registry
//!
//! Maps each client identity to the one live handle it opened.
//!
//! ## Invariants
//! - At most one entry per identity. `create` overwrites an existing entry
//!   without closing its handle.
//! - `destroy` removes the entry before closing the handle, so a failing close
//!   still ends the session.
//! - After `close_all` the registry is closed: no entry survives and `create`
//!   fails.
//! - Every mutation happens under one lock; handle I/O never does.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::time::Instant;

use telerpc::EncodedException;

use crate::identity::Identity;
use crate::target::Backend;
use crate::target::OpenOptions;
use crate::target::Resource;
use crate::target::TargetError;

/// Shared access to one live resource. Lock it only off the async runtime.
pub type Handle = Arc<Mutex<Box<dyn Resource>>>;

/// Locks a handle, recovering it if a previous holder panicked.
pub fn lock_handle(handle: &Handle) -> MutexGuard<'_, Box<dyn Resource>> {
    handle.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// No session exists for the identity.
    InvalidSession(Identity),
    /// The registry was closed by server shutdown.
    Closed,
    /// The backend or the handle failed.
    Target(TargetError),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidSession(id) => write!(f, "no open resource for session {}", id),
            Self::Closed => write!(f, "server is shutting down"),
            Self::Target(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for Error {}

impl From<TargetError> for Error {
    fn from(e: TargetError) -> Self {
        Self::Target(e)
    }
}

impl From<Error> for EncodedException {
    fn from(e: Error) -> Self {
        match e {
            Error::InvalidSession(_) => EncodedException::invalid_session(e.to_string()),
            Error::Closed => EncodedException::internal(e.to_string()),
            Error::Target(t) => t.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

struct SessionEntry {
    handle: Handle,
    resource_name: String,
    last_access: Instant,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<Identity, SessionEntry>,
    closed: bool,
}

pub struct SessionRegistry {
    backend: Arc<dyn Backend>,
    inner: Mutex<Inner>,
}

impl SessionRegistry {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend, inner: Mutex::new(Inner::default()) }
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The handle of `identity`'s session; refreshes its last-access time.
    pub fn get_or_fail(&self, identity: &Identity) -> Result<Handle> {
        let mut inner = self.inner();
        let entry = inner
            .entries
            .get_mut(identity)
            .ok_or_else(|| Error::InvalidSession(identity.clone()))?;
        entry.last_access = Instant::now();
        Ok(entry.handle.clone())
    }

    /// Opens a resource through the backend and binds it to `identity`.
    ///
    /// Blocks on the backend; call it from a worker.
    pub fn create(&self, identity: &Identity, resource_name: &str, options: &OpenOptions) -> Result<Handle> {
        if self.inner().closed {
            return Err(Error::Closed);
        }
        let resource = self.backend.open_resource(resource_name, options)?;
        let opened_name = resource.resource_name().to_owned();
        let handle: Handle = Arc::new(Mutex::new(resource));

        let mut inner = self.inner();
        if inner.closed {
            drop(inner);
            if let Err(e) = lock_handle(&handle).close() {
                tracing::warn!(%identity, error = %e, "closing handle opened during shutdown failed");
            }
            return Err(Error::Closed);
        }
        let entry = SessionEntry {
            handle: handle.clone(),
            resource_name: opened_name,
            last_access: Instant::now(),
        };
        if let Some(previous) = inner.entries.insert(identity.clone(), entry) {
            tracing::warn!(%identity, previous = %previous.resource_name, "session reopened, previous handle dropped without close");
        }
        Ok(handle)
    }

    /// Ends `identity`'s session and closes its handle.
    ///
    /// Blocks on the handle; call it from a worker.
    pub fn destroy(&self, identity: &Identity) -> Result<()> {
        let entry = self
            .inner()
            .entries
            .remove(identity)
            .ok_or_else(|| Error::InvalidSession(identity.clone()))?;
        lock_handle(&entry.handle).close()?;
        Ok(())
    }

    /// Closes every live handle and refuses new sessions. Idempotent.
    ///
    /// Individual close failures are logged and skipped.
    pub fn close_all(&self) {
        let entries: Vec<(Identity, SessionEntry)> = {
            let mut inner = self.inner();
            inner.closed = true;
            inner.entries.drain().collect()
        };
        for (identity, entry) in entries {
            if let Err(e) = lock_handle(&entry.handle).close() {
                tracing::warn!(%identity, resource = %entry.resource_name, error = %e, "close failed during shutdown");
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner().closed
    }

    pub fn len(&self) -> usize {
        self.inner().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, identity: &Identity) -> bool {
        self.inner().entries.contains_key(identity)
    }

    pub fn last_access(&self, identity: &Identity) -> Option<Instant> {
        self.inner().entries.get(identity).map(|e| e.last_access)
    }
}

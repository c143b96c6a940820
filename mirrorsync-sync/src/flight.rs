//! Single-flight lock shared by scheduled and manual triggers.

use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::SyncError;

/// At most one [`FlightGuard`] exists at a time. Acquisition never waits.
#[derive(Debug, Clone, Default)]
pub struct SingleFlight {
    lock: Arc<Mutex<()>>,
}

/// Held for the whole lifetime of one run; dropping it releases the lock.
#[derive(Debug)]
pub struct FlightGuard {
    _guard: OwnedMutexGuard<()>,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lock or fail immediately with [`SyncError::Busy`].
    pub fn try_acquire(&self) -> Result<FlightGuard, SyncError> {
        Arc::clone(&self.lock)
            .try_lock_owned()
            .map(|guard| FlightGuard { _guard: guard })
            .map_err(|_| SyncError::Busy)
    }

    pub fn is_busy(&self) -> bool {
        self.lock.try_lock().is_err()
    }
}

//! A minimal counting semaphore.

use parking_lot::{Condvar, Mutex};

/// Counting semaphore built from a mutex and condvar pair.
///
/// Used for startup accounting: each worker thread releases one permit
/// once it has entered its run loop, and shutdown acquires one permit per
/// thread ever created before tearing the inventory down.
#[derive(Debug, Default)]
pub(crate) struct Semaphore {
    permits: Mutex<usize>,
    available: Condvar,
}

impl Semaphore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Release `n` permits and wake waiters.
    pub fn release(&self, n: usize) {
        let mut permits = self.permits.lock();
        *permits += n;
        self.available.notify_all();
    }

    /// Block until `n` permits can be taken at once.
    pub fn acquire(&self, n: usize) {
        let mut permits = self.permits.lock();
        while *permits < n {
            self.available.wait(&mut permits);
        }
        *permits -= n;
    }
}

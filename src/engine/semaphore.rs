//! Counting semaphore bounding how many targets run at once.

use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;

use super::cancel::CancellationToken;

/// How often a blocked `acquire` re-checks cancellation.
const CANCEL_POLL: Duration = Duration::from_millis(20);

/// A counting semaphore built on [`Mutex`] and [`Condvar`].
#[derive(Debug)]
pub struct Semaphore {
    available: Mutex<usize>,
    released: Condvar,
}

/// A held permit; released on drop.
#[derive(Debug)]
pub struct Permit<'a> {
    semaphore: &'a Semaphore,
}

impl Semaphore {
    /// Create a semaphore with `permits` permits (at least one).
    #[must_use]
    pub fn new(permits: usize) -> Self {
        Self {
            available: Mutex::new(permits.max(1)),
            released: Condvar::new(),
        }
    }

    /// Block until a permit is free.
    ///
    /// Returns `None` if `cancel` fires while waiting (or had already fired).
    pub fn acquire(&self, cancel: &CancellationToken) -> Option<Permit<'_>> {
        let mut available = self
            .available
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        loop {
            if cancel.is_cancelled() {
                return None;
            }
            if *available > 0 {
                *available -= 1;
                return Some(Permit { semaphore: self });
            }
            available = self
                .released
                .wait_timeout(available, CANCEL_POLL)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Permits currently free.
    #[must_use]
    pub fn available(&self) -> usize {
        *self
            .available
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn release(&self) {
        let mut available = self
            .available
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *available += 1;
        drop(available);
        self.released.notify_one();
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        self.semaphore.release();
    }
}

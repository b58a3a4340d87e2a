//! Counting semaphore
//!
//! std has no semaphore, so this is the classic mutex + condvar pair.
//! Used to gate admission into the resource pool and to signal queue
//! depth to the worker threads.

use parking_lot::{Condvar, Mutex};
use std::time::Duration;

/// Counting semaphore dengan permit awal tertentu
pub struct Semaphore {
    permits: Mutex<usize>,
    cond: Condvar,
}

impl Semaphore {
    pub fn new(permits: usize) -> Self {
        Self {
            permits: Mutex::new(permits),
            cond: Condvar::new(),
        }
    }

    /// Block sampai ada permit, lalu ambil satu
    pub fn wait(&self) {
        let mut permits = self.permits.lock();
        while *permits == 0 {
            self.cond.wait(&mut permits);
        }
        *permits -= 1;
    }

    /// Like [`wait`](Self::wait) but gives up after `timeout`.
    ///
    /// Returns `true` if a permit was taken.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut permits = self.permits.lock();
        while *permits == 0 {
            if self.cond.wait_for(&mut permits, timeout).timed_out() && *permits == 0 {
                return false;
            }
        }
        *permits -= 1;
        true
    }

    /// Non-blocking acquire
    pub fn try_wait(&self) -> bool {
        let mut permits = self.permits.lock();
        if *permits == 0 {
            return false;
        }
        *permits -= 1;
        true
    }

    /// Kembalikan satu permit dan bangunkan satu waiter
    pub fn post(&self) {
        let mut permits = self.permits.lock();
        *permits += 1;
        self.cond.notify_one();
    }

    /// Current permit count (snapshot)
    pub fn available(&self) -> usize {
        *self.permits.lock()
    }
}

//! Bounded pool of reusable backend handles
//!
//! Prinsip desain:
//! - Eager bootstrap: semua handle dibuat saat init, tidak ada alokasi di hot path
//! - Admission gate: semaphore di-seed dengan `total`, wait lalu pop
//! - Scoped acquisition: [`PooledHandle`] selalu release di `Drop`
//!
//! Invariant: `free + in_use == total` at every observable point, and a
//! handle is never handed out twice while outstanding.

use parking_lot::Mutex;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::time::Duration;

use super::Semaphore;
use crate::error::{ServerError, ServerResult};

struct PoolState<H> {
    free: Vec<H>,
    in_use: usize,
}

/// Fixed-size pool of backend handles
pub struct ResourcePool<H> {
    state: Mutex<PoolState<H>>,
    reserve: Semaphore,
    total: usize,
}

impl<H> ResourcePool<H> {
    /// Bootstrap pool dengan `total` handle dari `factory`.
    ///
    /// Fails if `total` is zero or any handle cannot be created; the
    /// handles built so far are dropped.
    pub fn bootstrap<F, E>(total: usize, mut factory: F) -> ServerResult<Self>
    where
        F: FnMut(usize) -> Result<H, E>,
        E: fmt::Display,
    {
        if total == 0 {
            return Err(ServerError::Construction(
                "resource pool size must be positive".to_string(),
            ));
        }

        let mut free = Vec::with_capacity(total);
        for index in 0..total {
            let handle = factory(index).map_err(|e| {
                ServerError::Construction(format!("failed to create backend handle {index}: {e}"))
            })?;
            free.push(handle);
        }

        tracing::info!(total, "resource pool bootstrapped");

        Ok(Self {
            state: Mutex::new(PoolState { free, in_use: 0 }),
            reserve: Semaphore::new(total),
            total,
        })
    }

    /// Block sampai ada handle bebas, lalu ambil
    ///
    /// The returned handle is exclusively owned by the caller until it is
    /// passed back to [`release`](Self::release).
    pub fn acquire(&self) -> H {
        self.reserve.wait();
        self.pop_free()
    }

    /// Bounded variant of [`acquire`](Self::acquire).
    pub fn acquire_timeout(&self, timeout: Duration) -> Option<H> {
        if self.reserve.wait_timeout(timeout) {
            Some(self.pop_free())
        } else {
            None
        }
    }

    fn pop_free(&self) -> H {
        let mut state = self.state.lock();
        // The semaphore admitted us, so the free set cannot be empty.
        let handle = match state.free.pop() {
            Some(handle) => handle,
            None => unreachable!("semaphore admitted an acquire with an empty free set"),
        };
        state.in_use += 1;
        handle
    }

    /// Kembalikan handle ke free set. Callable dari thread manapun.
    pub fn release(&self, handle: H) {
        {
            let mut state = self.state.lock();
            debug_assert!(state.in_use > 0, "release without matching acquire");
            state.in_use = state.in_use.saturating_sub(1);
            state.free.push(handle);
        }
        self.reserve.post();
    }

    /// Scoped acquisition: handle dikembalikan otomatis saat guard di-drop.
    pub fn scoped(&self) -> PooledHandle<'_, H> {
        PooledHandle {
            handle: Some(self.acquire()),
            pool: self,
        }
    }

    /// Snapshot of idle handles
    pub fn free_count(&self) -> usize {
        self.state.lock().free.len()
    }

    /// Snapshot of outstanding handles
    pub fn in_use_count(&self) -> usize {
        self.state.lock().in_use
    }

    pub fn total(&self) -> usize {
        self.total
    }

    /// Drop every idle handle and return how many went.
    ///
    /// Outstanding handles are left alone: releasing one afterwards puts it
    /// back in the free set, where the next `destroy` picks it up.
    pub fn destroy(&self) -> usize {
        let mut state = self.state.lock();
        let mut drained = 0;
        // Only drop handles whose admission permit we can retire too.
        while self.reserve.try_wait() {
            if state.free.pop().is_none() {
                self.reserve.post();
                break;
            }
            drained += 1;
        }
        drained
    }
}

/// RAII guard untuk handle dari [`ResourcePool`]
pub struct PooledHandle<'a, H> {
    handle: Option<H>,
    pool: &'a ResourcePool<H>,
}

impl<H> Deref for PooledHandle<'_, H> {
    type Target = H;

    fn deref(&self) -> &H {
        match &self.handle {
            Some(handle) => handle,
            None => unreachable!("pooled handle used after release"),
        }
    }
}

impl<H> DerefMut for PooledHandle<'_, H> {
    fn deref_mut(&mut self) -> &mut H {
        match &mut self.handle {
            Some(handle) => handle,
            None => unreachable!("pooled handle used after release"),
        }
    }
}

impl<H> Drop for PooledHandle<'_, H> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.pool.release(handle);
        }
    }
}

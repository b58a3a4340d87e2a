//! Core module: shared structures di bawah dispatcher dan worker
//!
//! Prinsip desain:
//! - Self-synchronized: pool dan semaphore aman dipakai lintas thread
//! - Single-owner: timer list hanya dimutasi oleh dispatcher, tanpa lock
//! - No-Allocation: handle dan slot timer di-reuse, bukan dialokasi ulang

mod resource_pool;
mod semaphore;
mod timer_list;

pub use resource_pool::{PooledHandle, ResourcePool};
pub use semaphore::Semaphore;
pub use timer_list::{TimerId, TimerList};

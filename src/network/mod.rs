//! Network Layer: event-driven dispatcher + worker pool
//!
//! Menggunakan mio untuk readiness notification (epoll/kqueue).
//!
//! Fitur:
//! - Satu dispatcher thread pemilik semua socket
//! - Reactor (worker melakukan I/O) atau Proactor (dispatcher melakukan I/O)
//! - Idle eviction lewat timer list yang di-sweep secara periodik
//! - Sinyal proses disalurkan ke readiness set lewat loopback socket

mod connection;
mod server;
mod signal;
mod task;
mod worker_pool;

pub use connection::{route, HttpConnection, Next, WriteOutcome};
pub use server::Server;
pub use signal::{ServerHandle, SignalFlags};
pub use task::{Completion, Direction, Task};
pub use worker_pool::{RejectReason, Rejected, WorkerPool};

//! TinyWeb - Event-Driven HTTP/1.1 Server Core
//!
//! Arsitektur:
//! - Single dispatcher: satu thread memiliki readiness set, listener dan timer
//! - Worker pool: bounded FIFO queue, Reactor atau Proactor
//! - Zero-Copy: file statis di-mmap dan dikirim lewat vectored write
//! - Idle eviction: timer list terurut, di-sweep oleh alarm periodik
//!
//! ```no_run
//! use tinyweb::{Server, ServerConfig, ServerContext};
//!
//! let config = ServerConfig::default();
//! let ctx = ServerContext::from_config(&config)?;
//! let mut server = Server::bind(config, ctx)?;
//! server.run()?;
//! # Ok::<(), tinyweb::ServerError>(())
//! ```

pub mod backend;
pub mod config;
pub mod context;
pub mod core;
pub mod error;
pub mod logging;
pub mod network;
pub mod protocol;

pub use backend::{BackendHandle, BackendPool, CredentialStore};
pub use config::{ActorModel, CommandLine, LogConfig, LogMode, ServerConfig, Trigger, TriggerMode};
pub use context::ServerContext;
pub use error::{BackendError, ServerError, ServerResult};
pub use logging::{setup_logging, LogGuard};
pub use network::{Server, ServerHandle};

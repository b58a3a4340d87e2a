//! Server configuration
//!
//! [`ServerConfig`] is what the core consumes; [`CommandLine`] is the clap
//! surface the binary maps onto it. The numeric flags keep their historical
//! meaning (`-m 3` = ET listen + ET connections, `-a 1` = Reactor, ...).

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{ServerError, ServerResult};

/// Readiness notification style untuk satu jenis socket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// handle once per event, re-armed afterwards
    Level,
    /// drain until WouldBlock on every event
    Edge,
}

/// Listen + connection trigger combination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerMode {
    pub listen: Trigger,
    pub conn: Trigger,
}

impl TriggerMode {
    pub fn from_code(code: u8) -> ServerResult<Self> {
        use Trigger::*;
        let (listen, conn) = match code {
            0 => (Level, Level),
            1 => (Level, Edge),
            2 => (Edge, Level),
            3 => (Edge, Edge),
            other => {
                return Err(ServerError::Config(format!(
                    "trigger mode must be 0..=3, got {other}"
                )))
            }
        };
        Ok(Self { listen, conn })
    }
}

impl Default for TriggerMode {
    fn default() -> Self {
        Self {
            listen: Trigger::Level,
            conn: Trigger::Level,
        }
    }
}

/// Concurrency discipline of the worker pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActorModel {
    /// dispatcher performs the I/O, workers only run protocol logic
    #[default]
    Proactor,
    /// workers perform the I/O themselves
    Reactor,
}

impl ActorModel {
    pub fn from_code(code: u8) -> ServerResult<Self> {
        match code {
            0 => Ok(Self::Proactor),
            1 => Ok(Self::Reactor),
            other => Err(ServerError::Config(format!(
                "actor model must be 0 or 1, got {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogMode {
    #[default]
    Sync,
    /// buffered through a background writer thread
    Async,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub mode: LogMode,
    pub disabled: bool,
    pub dir: PathBuf,
    pub file_prefix: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            mode: LogMode::Sync,
            disabled: false,
            dir: PathBuf::from("./ServerLog"),
            file_prefix: "tinyweb.log".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub bind_ip: String,
    pub doc_root: PathBuf,
    /// credential file, `None` keeps the table in memory
    pub users_file: Option<PathBuf>,
    pub trigger: TriggerMode,
    /// SO_LINGER {on, 1s} on close
    pub linger: bool,
    pub backend_pool_size: usize,
    pub worker_threads: usize,
    pub queue_capacity: usize,
    pub max_connections: usize,
    pub actor_model: ActorModel,
    /// alarm period; idle timeout is three of these
    pub timeslot: Duration,
    pub read_buffer_size: usize,
    pub log: LogConfig,
}

pub const IDLE_TIMESLOTS: u32 = 3;

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 9006,
            bind_ip: "0.0.0.0".to_string(),
            doc_root: PathBuf::from("./root"),
            users_file: None,
            trigger: TriggerMode::default(),
            linger: false,
            backend_pool_size: 8,
            worker_threads: 8,
            queue_capacity: 10_000,
            max_connections: 65_536,
            actor_model: ActorModel::Proactor,
            timeslot: Duration::from_secs(5),
            read_buffer_size: 2048,
            log: LogConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn idle_timeout(&self) -> Duration {
        self.timeslot * IDLE_TIMESLOTS
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind_ip, self.port)
    }

    /// Reject values the core cannot run with
    pub fn validate(&self) -> ServerResult<()> {
        if self.worker_threads == 0 {
            return Err(ServerError::Config("worker threads must be positive".into()));
        }
        if self.queue_capacity == 0 {
            return Err(ServerError::Config("queue capacity must be positive".into()));
        }
        if self.backend_pool_size == 0 {
            return Err(ServerError::Config("backend pool size must be positive".into()));
        }
        if self.max_connections == 0 {
            return Err(ServerError::Config("max connections must be positive".into()));
        }
        if self.timeslot.is_zero() {
            return Err(ServerError::Config("timeslot must be positive".into()));
        }
        if self.read_buffer_size < 64 {
            return Err(ServerError::Config("read buffer too small".into()));
        }
        Ok(())
    }
}

#[derive(Parser, Debug)]
#[command(version, about = "Event-driven HTTP/1.1 server")]
pub struct CommandLine {
    /// listen port
    #[arg(short = 'p', long, default_value_t = 9006)]
    pub port: u16,
    /// log write mode (0: sync, 1: async)
    #[arg(short = 'l', long = "log-write", default_value_t = 0)]
    pub log_write: u8,
    /// trigger combination (0: LT+LT, 1: LT+ET, 2: ET+LT, 3: ET+ET)
    #[arg(short = 'm', long = "trig-mode", default_value_t = 0)]
    pub trig_mode: u8,
    /// graceful close via SO_LINGER (0: off, 1: on)
    #[arg(short = 'o', long = "opt-linger", default_value_t = 0)]
    pub opt_linger: u8,
    /// backend pool size
    #[arg(short = 's', long = "sql-num", default_value_t = 8)]
    pub sql_num: usize,
    /// worker threads
    #[arg(short = 't', long = "thread-num", default_value_t = 8)]
    pub thread_num: usize,
    /// disable logging (0: keep, 1: close)
    #[arg(short = 'c', long = "close-log", default_value_t = 0)]
    pub close_log: u8,
    /// actor model (0: proactor, 1: reactor)
    #[arg(short = 'a', long = "actor-model", default_value_t = 0)]
    pub actor_model: u8,
    /// document root
    #[arg(long, default_value = "./root")]
    pub root: PathBuf,
    /// credential file (`user:password` per line)
    #[arg(long)]
    pub users: Option<PathBuf>,
    #[arg(long, default_value_t = 65_536)]
    pub max_connections: usize,
    #[arg(long, default_value_t = 10_000)]
    pub queue_capacity: usize,
    /// alarm period in seconds
    #[arg(long, default_value_t = 5)]
    pub timeslot: u64,
    #[arg(long, default_value = "./ServerLog")]
    pub log_dir: PathBuf,
}

impl CommandLine {
    pub fn into_config(self) -> ServerResult<ServerConfig> {
        let config = ServerConfig {
            port: self.port,
            doc_root: self.root,
            users_file: self.users,
            trigger: TriggerMode::from_code(self.trig_mode)?,
            linger: self.opt_linger == 1,
            backend_pool_size: self.sql_num,
            worker_threads: self.thread_num,
            queue_capacity: self.queue_capacity,
            max_connections: self.max_connections,
            actor_model: ActorModel::from_code(self.actor_model)?,
            timeslot: Duration::from_secs(self.timeslot),
            log: LogConfig {
                mode: if self.log_write == 1 {
                    LogMode::Async
                } else {
                    LogMode::Sync
                },
                disabled: self.close_log == 1,
                dir: self.log_dir,
                ..LogConfig::default()
            },
            ..ServerConfig::default()
        };
        config.validate()?;
        Ok(config)
    }
}

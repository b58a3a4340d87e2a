//! TinyWeb Server Binary
//!
//! Usage:
//!   cargo run --release --bin tinyweb -- [OPTIONS]
//!
//! Options (lihat `--help`):
//!   -p <PORT>   listen port (default 9006)
//!   -m <0..3>   trigger combination listen+conn (LT/ET)
//!   -a <0|1>    actor model (0: proactor, 1: reactor)
//!   -t <N>      worker threads
//!   -c 1        disable logging

use clap::Parser;
use std::process::ExitCode;

use tinyweb::{setup_logging, CommandLine, Server, ServerContext, ServerResult};

fn main() -> ExitCode {
    let config = match CommandLine::parse().into_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("tinyweb: {e}");
            return ExitCode::FAILURE;
        }
    };

    // guard harus hidup sampai main selesai supaya log async ter-flush
    let _guard = match setup_logging(&config.log) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("tinyweb: {e}");
            return ExitCode::FAILURE;
        }
    };

    match serve(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("server failed: {e}");
            eprintln!("tinyweb: {e}");
            ExitCode::FAILURE
        }
    }
}

fn serve(config: tinyweb::ServerConfig) -> ServerResult<()> {
    let ctx = ServerContext::from_config(&config)?;
    tracing::info!(
        root = %config.doc_root.display(),
        backend = config.backend_pool_size,
        workers = config.worker_threads,
        "starting tinyweb"
    );

    let mut server = Server::bind(config, ctx)?;
    server.install_signal_handlers()?;
    println!("tinyweb listening on {}", server.local_addr()?);
    server.run()
}

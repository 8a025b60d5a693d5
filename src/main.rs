//! clientecho: a WebSocket smoke-test server
//!
//! Waits for a client to connect and announce it is ready, sends it a burst
//! of text messages and waits for it to send back as many messages before a
//! deadline. The exit status reports the result:
//! - `0` when every message arrived in time
//! - `1` when the deadline elapsed first (or the server failed to start)
//!
//! Configuration via CLI arguments or TOML file.

mod config;
mod exchange;
mod server;

use config::Config;
use server::{Server, ServerError};
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        addr = %config.addr,
        messages = config.exchange.messages,
        timeout_secs = config.exchange.deadline.as_secs(),
        on_write_error = ?config.exchange.on_write_error,
        workers = ?config.workers,
        "Starting clientecho server"
    );

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if let Some(workers) = config.workers {
        builder.worker_threads(workers);
    }
    let runtime = builder.build()?;

    let outcome = runtime.block_on(async {
        let server = Server::bind(config)?;
        Ok::<_, ServerError>(server.run().await)
    })?;

    // Sender and receiver tasks of the finished exchange are not waited for
    runtime.shutdown_background();

    if outcome.is_success() {
        println!("SUCCESS!");
    } else {
        println!("FAILED!");
    }

    Ok(outcome.exit_code())
}

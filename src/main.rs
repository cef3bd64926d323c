//! caret-echo: a thread-per-connection TCP server
//!
//! Every accepted client gets its own execution unit running the caret
//! framing protocol:
//! - The server greets each client with a single `*` byte
//! - Bytes between `^` and `$` are answered with the byte plus one
//! - Everything else is silently dropped
//!
//! Features:
//! - Unbounded, detached thread (or tokio task) per connection
//! - Process exit on socket-layer failures, per-connection isolation on send failures
//! - Configuration via CLI arguments or TOML file

mod config;
mod fatal;
mod protocol;
mod runtime;

use config::Config;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stdout)
        .init();

    info!(
        host = %config.host,
        port = config.port,
        backlog = config.backlog,
        runtime = ?config.runtime,
        "Starting caret-echo server"
    );

    match runtime::run(config) {
        Ok(never) => match never {},
        Err(e) => e.exit(),
    }
}

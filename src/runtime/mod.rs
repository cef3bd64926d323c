//! Connection runtimes.
//!
//! Both runtimes share the same shape: a listener that never waits on a
//! connection, and one independent, detached execution unit per accepted
//! peer running the caret protocol from ack to close.
//!
//! - `threaded`: one OS thread per connection (default)
//! - `tasks`: one tokio task per connection

mod connection;
mod tasks;
mod threaded;

pub(crate) use connection::Connection;

use crate::config::{Config, RuntimeType};
use crate::fatal::FatalError;
use std::convert::Infallible;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

/// Size of the per-connection receive buffer.
pub const RECV_BUFFER_SIZE: usize = 1024;

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(0);

/// How a handler finished when nothing fatal happened.
#[derive(Debug)]
pub enum SessionEnd {
    /// The peer closed its write side.
    PeerClosed,
    /// Sending a reply byte failed; only this connection is affected.
    SendFailed(io::Error),
}

/// Bind the listening socket and serve forever.
///
/// Only returns on a fatal error.
pub fn run(config: Config) -> Result<Infallible, FatalError> {
    info!(port = config.port, "Serving on port {}", config.port);

    let listener = bind_listener(config.listen_addr(), config.backlog)?;

    match config.runtime {
        RuntimeType::Threads => threaded::serve(listener),
        RuntimeType::Tasks => tasks::serve(listener),
    }
}

/// Create a bound, listening, blocking TCP socket.
pub(crate) fn bind_listener(
    addr: SocketAddr,
    backlog: i32,
) -> Result<std::net::TcpListener, FatalError> {
    create_listener(addr, backlog).map_err(FatalError::Setup)
}

fn create_listener(addr: SocketAddr, backlog: i32) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        socket2::Domain::for_address(addr),
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;

    Ok(socket.into())
}

/// Number used to name a new connection's execution unit.
fn next_conn_id() -> u64 {
    NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed)
}

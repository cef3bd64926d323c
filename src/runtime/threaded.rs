//! Thread-per-connection runtime.
//!
//! The accept loop runs on the main thread. Every accepted connection is
//! moved into its own named OS thread whose `JoinHandle` is dropped right
//! away, so the thread is detached and cleans up after itself. There is no
//! cap on the number of threads.

use crate::fatal::FatalError;
use crate::runtime::{next_conn_id, Connection, SessionEnd};
use std::convert::Infallible;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread;
use tracing::{debug, info};

/// Accept connections forever, handing each one to `dispatch`.
pub fn serve(listener: TcpListener) -> Result<Infallible, FatalError> {
    loop {
        let (stream, peer) = listener.accept().map_err(FatalError::Accept)?;
        info!(peer = %peer, "Peer connected");
        dispatch(stream, peer)?;
    }
}

/// Start a detached handler thread that owns `stream`.
pub fn dispatch(stream: TcpStream, peer: SocketAddr) -> Result<(), FatalError> {
    let conn_id = next_conn_id();

    thread::Builder::new()
        .name(format!("conn-{conn_id}"))
        .spawn(move || handle(stream, peer, conn_id))
        .map_err(FatalError::Spawn)?;

    Ok(())
}

fn handle(stream: TcpStream, peer: SocketAddr, conn_id: u64) {
    let thread_id = thread::current().id();
    info!(thread = ?thread_id, conn_id, peer = %peer, "Thread created to handle connection");

    // Nobody joins this thread, so a fatal error is escalated from here.
    match Connection::new(stream, peer).serve() {
        Ok(SessionEnd::PeerClosed) => {}
        Ok(SessionEnd::SendFailed(e)) => debug!(conn_id, error = %e, "Connection dropped"),
        Err(e) => e.exit(),
    }

    info!(thread = ?thread_id, conn_id, "Thread done");
}

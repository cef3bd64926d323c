//! Blocking per-connection handler.
//!
//! A `Connection` is created at accept time and consumed by `serve`, so
//! the socket is closed exactly once when `serve` returns, whatever the
//! exit path.

use crate::fatal::FatalError;
use crate::protocol::{ConnectionState, ACK};
use crate::runtime::{SessionEnd, RECV_BUFFER_SIZE};
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use tracing::{debug, trace, warn};

/// A single client connection.
pub struct Connection<S> {
    /// Socket for this peer.
    stream: S,
    /// Peer address, for logging only.
    peer: SocketAddr,
    /// Private receive buffer.
    buf: [u8; RECV_BUFFER_SIZE],
    /// Framing state.
    state: ConnectionState,
}

impl<S: Read + Write> Connection<S> {
    /// Wrap a freshly accepted stream.
    pub fn new(stream: S, peer: SocketAddr) -> Self {
        Self {
            stream,
            peer,
            buf: [0u8; RECV_BUFFER_SIZE],
            state: ConnectionState::default(),
        }
    }

    /// Run the protocol until the peer closes, a send fails, or a fatal
    /// error occurs.
    pub fn serve(mut self) -> Result<SessionEnd, FatalError> {
        self.stream.write_all(&[ACK]).map_err(FatalError::Handshake)?;

        loop {
            let len = match self.stream.read(&mut self.buf) {
                Ok(0) => {
                    debug!(peer = %self.peer, "Connection closed by client");
                    return Ok(SessionEnd::PeerClosed);
                }
                Ok(len) => len,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(FatalError::Receive(e)),
            };

            trace!(peer = %self.peer, len, "Received chunk");

            for &byte in &self.buf[..len] {
                let Some(reply) = self.state.feed(byte) else {
                    continue;
                };
                if let Err(e) = self.stream.write_all(&[reply]) {
                    warn!(peer = %self.peer, error = %e, "send failed");
                    return Ok(SessionEnd::SendFailed(e));
                }
            }
        }
    }
}

//! Process-level errors.
//!
//! Some failures mean the socket layer itself is broken rather than a
//! single peer misbehaving. Those are reported as `FatalError` and end
//! the whole process through [`FatalError::exit`]. Per-connection send
//! failures are not fatal and never become a `FatalError`.

use std::io;
use tracing::error;

/// Exit status used for every fatal error.
pub const EXIT_FAILURE: i32 = 1;

/// An error that terminates the server process.
#[derive(Debug)]
pub enum FatalError {
    /// Creating, binding or listening on the server socket failed.
    Setup(io::Error),
    /// `accept` on the listening socket failed.
    Accept(io::Error),
    /// A handler for a new connection could not be started.
    Spawn(io::Error),
    /// The ack byte could not be sent to a new peer.
    Handshake(io::Error),
    /// Receiving from a connected peer failed.
    Receive(io::Error),
}

impl FatalError {
    /// Log the error and terminate the process.
    pub fn exit(self) -> ! {
        error!(error = %self, "Fatal error, shutting down");
        std::process::exit(EXIT_FAILURE)
    }
}

impl std::fmt::Display for FatalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FatalError::Setup(e) => write!(f, "listen socket setup failed: {e}"),
            FatalError::Accept(e) => write!(f, "accept failed: {e}"),
            FatalError::Spawn(e) => write!(f, "failed to start connection handler: {e}"),
            FatalError::Handshake(e) => write!(f, "send of ack byte failed: {e}"),
            FatalError::Receive(e) => write!(f, "recv failed: {e}"),
        }
    }
}

impl std::error::Error for FatalError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FatalError::Setup(e)
            | FatalError::Accept(e)
            | FatalError::Spawn(e)
            | FatalError::Handshake(e)
            | FatalError::Receive(e) => Some(e),
        }
    }
}

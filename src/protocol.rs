//! Caret framing protocol.
//!
//! A connection starts with the server sending a single ack byte. After
//! that the client streams raw bytes; everything between `^` and `$` is
//! a message, and each message byte is answered with the same byte plus
//! one (wrapping). Bytes outside a message are dropped.
//!
//! ```text
//! Server:  *
//! Client:  xx^ab$yy^cd$
//! Server:  bcde
//! ```
//!
//! This module is pure: it knows nothing about sockets, so both runtimes
//! share it.

/// Sent once to every peer before any other traffic.
pub const ACK: u8 = b'*';

/// Opens a message.
pub const MSG_START: u8 = b'^';

/// Closes a message.
pub const MSG_END: u8 = b'$';

/// Framing state of one connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    /// Outside a message; everything except `^` is discarded.
    #[default]
    WaitingForMessage,
    /// Inside a message; every byte except `$` is answered.
    InMessage,
}

impl ConnectionState {
    /// Advance the state machine by one input byte.
    ///
    /// Returns the byte to send back to the peer, if any. Markers are
    /// consumed and never produce output.
    pub fn feed(&mut self, byte: u8) -> Option<u8> {
        match *self {
            ConnectionState::WaitingForMessage => {
                if byte == MSG_START {
                    *self = ConnectionState::InMessage;
                }
                None
            }
            ConnectionState::InMessage => {
                if byte == MSG_END {
                    *self = ConnectionState::WaitingForMessage;
                    None
                } else {
                    Some(transform(byte))
                }
            }
        }
    }
}

/// The reply for one in-message byte.
#[inline]
pub fn transform(byte: u8) -> u8 {
    byte.wrapping_add(1)
}

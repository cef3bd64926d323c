//! Task-per-connection runtime on tokio.
//!
//! Same model as the threaded runtime with tokio tasks as the execution
//! unit: the accept loop spawns one task per peer and drops its
//! `JoinHandle`. Protocol state stays private to each task.

use crate::fatal::FatalError;
use crate::protocol::{ConnectionState, ACK};
use crate::runtime::{next_conn_id, SessionEnd, RECV_BUFFER_SIZE};
use bytes::BytesMut;
use std::convert::Infallible;
use std::io;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, trace, warn};

/// Build a multi-threaded tokio runtime and accept connections forever.
pub fn serve(listener: std::net::TcpListener) -> Result<Infallible, FatalError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("caret-worker")
        .build()
        .map_err(FatalError::Setup)?;

    runtime.block_on(async move {
        listener.set_nonblocking(true).map_err(FatalError::Setup)?;
        let listener = TcpListener::from_std(listener).map_err(FatalError::Setup)?;
        accept_loop(listener).await
    })
}

/// Accept connections forever, spawning a detached task for each.
pub async fn accept_loop(listener: TcpListener) -> Result<Infallible, FatalError> {
    loop {
        let (stream, peer) = listener.accept().await.map_err(FatalError::Accept)?;
        info!(peer = %peer, "Peer connected");
        dispatch(stream, peer);
    }
}

fn dispatch(stream: TcpStream, peer: SocketAddr) {
    let conn_id = next_conn_id();

    tokio::spawn(async move {
        info!(conn_id, peer = %peer, "Task created to handle connection");

        match handle_connection(stream, peer).await {
            Ok(SessionEnd::PeerClosed) => {}
            Ok(SessionEnd::SendFailed(e)) => debug!(conn_id, error = %e, "Connection dropped"),
            Err(e) => e.exit(),
        }

        info!(conn_id, "Task done");
    });
}

/// Handle a single client connection.
///
/// The stream is dropped, and so closed, when this returns.
pub async fn handle_connection<S>(mut stream: S, peer: SocketAddr) -> Result<SessionEnd, FatalError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(&[ACK]).await.map_err(FatalError::Handshake)?;

    let mut buffer = BytesMut::with_capacity(RECV_BUFFER_SIZE);
    let mut state = ConnectionState::default();

    loop {
        buffer.clear();
        let n = match stream.read_buf(&mut buffer).await {
            Ok(0) => {
                debug!(peer = %peer, "Connection closed by client");
                return Ok(SessionEnd::PeerClosed);
            }
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(FatalError::Receive(e)),
        };

        trace!(peer = %peer, len = n, "Received chunk");

        for &byte in &buffer[..n] {
            let Some(reply) = state.feed(byte) else {
                continue;
            };
            if let Err(e) = stream.write_all(&[reply]).await {
                warn!(peer = %peer, error = %e, "send failed");
                return Ok(SessionEnd::SendFailed(e));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    fn peer() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    #[tokio::test]
    async fn test_two_messages() {
        let mock = Builder::new()
            .write(b"*")
            .read(b"^ab$^cd$")
            .write(b"b")
            .write(b"c")
            .write(b"d")
            .write(b"e")
            .build();

        let end = handle_connection(mock, peer()).await.unwrap();
        assert!(matches!(end, SessionEnd::PeerClosed));
    }

    #[tokio::test]
    async fn test_unframed_bytes_dropped() {
        let mock = Builder::new().write(b"*").read(b"hello").read(b"^$").build();
        let end = handle_connection(mock, peer()).await.unwrap();
        assert!(matches!(end, SessionEnd::PeerClosed));
    }

    #[tokio::test]
    async fn test_state_carries_across_reads() {
        let mock = Builder::new()
            .write(b"*")
            .read(b"xx^a")
            .write(b"b")
            .read(b"\xff$q")
            .write(b"\x00")
            .build();

        let end = handle_connection(mock, peer()).await.unwrap();
        assert!(matches!(end, SessionEnd::PeerClosed));
    }

    #[tokio::test]
    async fn test_handshake_failure_is_fatal() {
        let mock = Builder::new()
            .write_error(io::Error::from(io::ErrorKind::BrokenPipe))
            .build();

        let err = handle_connection(mock, peer()).await.unwrap_err();
        assert!(matches!(err, FatalError::Handshake(_)));
    }

    #[tokio::test]
    async fn test_receive_failure_is_fatal() {
        let mock = Builder::new()
            .write(b"*")
            .read_error(io::Error::from(io::ErrorKind::ConnectionReset))
            .build();

        let err = handle_connection(mock, peer()).await.unwrap_err();
        assert!(matches!(err, FatalError::Receive(_)));
    }

    #[tokio::test]
    async fn test_send_failure_ends_session() {
        let mock = Builder::new()
            .write(b"*")
            .read(b"^abc$")
            .write(b"b")
            .write_error(io::Error::from(io::ErrorKind::BrokenPipe))
            .build();

        match handle_connection(mock, peer()).await {
            Ok(SessionEnd::SendFailed(e)) => assert_eq!(e.kind(), io::ErrorKind::BrokenPipe),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_accept_loop_serves_concurrent_peers() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = accept_loop(listener).await;
        });

        let mut a = TcpStream::connect(addr).await.unwrap();
        let mut b = TcpStream::connect(addr).await.unwrap();

        let mut ack = [0u8; 1];
        a.read_exact(&mut ack).await.unwrap();
        assert_eq!(&ack, b"*");
        b.read_exact(&mut ack).await.unwrap();
        assert_eq!(&ack, b"*");

        a.write_all(b"^ab").await.unwrap();
        b.write_all(b"cd^e").await.unwrap();

        let mut out = [0u8; 2];
        a.read_exact(&mut out).await.unwrap();
        assert_eq!(&out, b"bc");
        let mut out = [0u8; 1];
        b.read_exact(&mut out).await.unwrap();
        assert_eq!(&out, b"f");

        a.write_all(b"$").await.unwrap();
        a.shutdown().await.unwrap();
        let mut rest = Vec::new();
        a.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());

        b.write_all(b"$^cd$").await.unwrap();
        b.shutdown().await.unwrap();
        let mut rest = Vec::new();
        b.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest, b"de");
    }
}

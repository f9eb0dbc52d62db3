//! Listener abstraction and accept error classification.
//!
//! # Responsibilities
//! - Bind to the configured host and port
//! - Yield raw connections through the `Accept` trait
//! - Classify accept errors as transient (retry) or fatal

use std::future::Future;
use std::io;
use std::net::SocketAddr;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};

/// A bound endpoint capable of yielding raw connections.
pub trait Accept: Send + 'static {
    /// The raw connection type.
    type Io: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Accept the next connection and its peer address.
    fn accept(&mut self) -> impl Future<Output = io::Result<(Self::Io, SocketAddr)>> + Send;

    /// The address this endpoint is bound to.
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

impl Accept for TcpListener {
    type Io = TcpStream;

    fn accept(&mut self) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send {
        TcpListener::accept(self)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        TcpListener::local_addr(self)
    }
}

/// Bind a TCP listener on `hostname:port`.
pub async fn bind(hostname: &str, port: u16) -> io::Result<TcpListener> {
    let listener = TcpListener::bind((hostname, port)).await?;
    tracing::debug!(address = %listener.local_addr()?, "Listener bound");
    Ok(listener)
}

// Descriptor and buffer exhaustion.
#[cfg(unix)]
const RESOURCE_EXHAUSTION: &[i32] = &[libc::ENOMEM, libc::ENFILE, libc::EMFILE, libc::ENOBUFS];
#[cfg(not(unix))]
const RESOURCE_EXHAUSTION: &[i32] = &[];

/// Whether an accept error is expected under load and worth retrying.
///
/// Transient: resource exhaustion, malformed incoming data, unexpected EOF,
/// reset, aborted and not-connected conditions. Anything else is fatal.
pub fn is_transient(err: &io::Error) -> bool {
    if let Some(code) = err.raw_os_error() {
        if RESOURCE_EXHAUSTION.contains(&code) {
            return true;
        }
    }
    matches!(
        err.kind(),
        io::ErrorKind::OutOfMemory
            | io::ErrorKind::InvalidData
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
    )
}

/// Short label for metrics.
pub(crate) fn error_kind_label(err: &io::Error) -> &'static str {
    if is_transient(err) {
        "transient"
    } else {
        "fatal"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_transient_errors() {
        for kind in [
            io::ErrorKind::InvalidData,
            io::ErrorKind::UnexpectedEof,
            io::ErrorKind::ConnectionReset,
            io::ErrorKind::ConnectionAborted,
            io::ErrorKind::NotConnected,
            io::ErrorKind::OutOfMemory,
        ] {
            assert!(is_transient(&io::Error::from(kind)), "{:?}", kind);
        }
    }

    #[cfg(unix)]
    #[test]
    fn descriptor_exhaustion_is_transient() {
        for code in [libc::EMFILE, libc::ENFILE, libc::ENOBUFS, libc::ENOMEM] {
            assert!(is_transient(&io::Error::from_raw_os_error(code)), "errno {code}");
        }
    }

    #[test]
    fn other_errors_are_fatal() {
        for kind in [
            io::ErrorKind::PermissionDenied,
            io::ErrorKind::AddrInUse,
            io::ErrorKind::InvalidInput,
            io::ErrorKind::Other,
        ] {
            assert!(!is_transient(&io::Error::from(kind)), "{:?}", kind);
        }
        assert_eq!(error_kind_label(&io::Error::from(io::ErrorKind::Other)), "fatal");
    }

    #[tokio::test]
    async fn tcp_listener_accepts() {
        let mut listener = bind("127.0.0.1", 0).await.unwrap();
        let addr = Accept::local_addr(&listener).unwrap();

        let client = tokio::spawn(async move { TcpStream::connect(addr).await.unwrap() });
        let (_stream, peer) = Accept::accept(&mut listener).await.unwrap();
        let client = client.await.unwrap();
        assert_eq!(peer, client.local_addr().unwrap());
    }
}

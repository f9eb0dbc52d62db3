//! HTTP server: accept loop, session multiplexing and shutdown.
//!
//! # Responsibilities
//! - Accept connections on any number of listeners
//! - Back off on transient accept errors, stop on fatal ones
//! - Upgrade each connection to an HTTP/1.1 or HTTP/2 session (optionally TLS)
//! - Serve every exchange of a session concurrently via the dispatcher
//! - Close every listener and session on `close()` or an abort signal

use std::convert::Infallible;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{broadcast, watch};
use tokio_rustls::TlsAcceptor;
use tracing::Instrument;

use crate::config::ListenerConfig;
use crate::http::dispatch::{default_error_handler, dispatch, ConnInfo, ErrorHandler, Handler};
use crate::net::listener::{self, error_kind_label, is_transient, Accept};
use crate::net::tls::load_tls_acceptor;
use crate::net::{Registry, TrackedGuard};
use crate::observability::metrics;
use crate::resilience::backoff::{self, AcceptBackoff, INITIAL_ACCEPT_BACKOFF, MAX_ACCEPT_BACKOFF};

/// Error type for server operations.
#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    /// The server was already closed.
    #[error("Server closed")]
    Closed,

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to accept: {0}")]
    Accept(#[source] io::Error),

    #[error("Failed to load TLS configuration: {0}")]
    Tls(#[source] io::Error),
}

/// Construction options for a [`Server`].
pub struct ServerOptions<H> {
    pub port: u16,
    pub hostname: String,
    pub handler: H,
    /// Fallback for handler failures; defaults to a fixed 500 response.
    pub on_error: Option<ErrorHandler>,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl<H> ServerOptions<H> {
    /// Options for `0.0.0.0:8000` with default backoff.
    pub fn new(handler: H) -> Self {
        Self {
            port: 8000,
            hostname: "0.0.0.0".to_string(),
            handler,
            on_error: None,
            initial_backoff: INITIAL_ACCEPT_BACKOFF,
            max_backoff: MAX_ACCEPT_BACKOFF,
        }
    }

    /// Options taken from the listener section of the config.
    pub fn from_config(config: &ListenerConfig, handler: H) -> Self {
        Self {
            port: config.port,
            hostname: config.hostname.clone(),
            handler,
            on_error: None,
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }

    pub fn on_error(mut self, on_error: ErrorHandler) -> Self {
        self.on_error = Some(on_error);
        self
    }

    pub fn backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self
    }
}

struct Shared<H> {
    port: u16,
    hostname: String,
    handler: Arc<H>,
    on_error: ErrorHandler,
    closed: watch::Sender<bool>,
    registry: Arc<Registry>,
    initial_backoff: Duration,
    max_backoff: Duration,
}

/// How an accepted connection becomes a session.
#[derive(Clone)]
enum Upgrade {
    Plain,
    Tls(TlsAcceptor),
}

/// An HTTP server that can serve any number of listeners until closed.
///
/// Cloning yields another handle to the same server.
pub struct Server<H> {
    inner: Arc<Shared<H>>,
}

impl<H> Clone for Server<H> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<H: Handler> Server<H> {
    /// Create a new server. Nothing is bound until a serve call.
    pub fn new(options: ServerOptions<H>) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            inner: Arc::new(Shared {
                port: options.port,
                hostname: options.hostname,
                handler: Arc::new(options.handler),
                on_error: options.on_error.unwrap_or_else(default_error_handler),
                closed,
                registry: Arc::new(Registry::new()),
                initial_backoff: options.initial_backoff,
                max_backoff: options.max_backoff,
            }),
        }
    }

    /// Whether `close` has run.
    pub fn is_closed(&self) -> bool {
        *self.inner.closed.borrow()
    }

    /// Local addresses of the listeners currently being served.
    pub fn addrs(&self) -> Vec<SocketAddr> {
        self.inner.registry.listener_addrs()
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.inner.registry.session_count()
    }

    /// Close every listener and session. Fails if already closed.
    pub fn close(&self) -> Result<(), ServeError> {
        let first = self.inner.closed.send_if_modified(|closed| {
            if *closed {
                false
            } else {
                *closed = true;
                true
            }
        });
        if !first {
            return Err(ServeError::Closed);
        }

        tracing::info!(
            listeners = self.inner.registry.listener_count(),
            sessions = self.inner.registry.session_count(),
            "Server closing"
        );
        self.inner.registry.close_all();
        Ok(())
    }

    /// Close the server when `signal` completes.
    pub fn close_on<F>(&self, signal: F)
    where
        F: Future + Send + 'static,
    {
        let server = self.clone();
        let mut closed = self.inner.closed.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                _ = signal => {
                    tracing::info!("Abort signal received");
                    let _ = server.close();
                }
                _ = closed.wait_for(|closed| *closed) => {}
            }
        });
    }

    /// Bind the configured address and serve it.
    pub async fn listen_and_serve(&self) -> Result<(), ServeError> {
        self.ensure_open()?;
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Bind the configured address and serve it over TLS.
    pub async fn listen_and_serve_tls(&self, cert_path: &Path, key_path: &Path) -> Result<(), ServeError> {
        self.ensure_open()?;
        let acceptor = load_tls_acceptor(cert_path, key_path)
            .await
            .map_err(ServeError::Tls)?;
        let listener = self.bind().await?;
        self.serve_tls(listener, acceptor).await
    }

    /// Serve plain HTTP on `listener` until the server closes or accept fails fatally.
    pub async fn serve<L: Accept>(&self, listener: L) -> Result<(), ServeError> {
        self.serve_with(listener, Upgrade::Plain).await
    }

    /// Serve HTTPS on `listener`, handshaking each connection with `acceptor`.
    pub async fn serve_tls<L: Accept>(&self, listener: L, acceptor: TlsAcceptor) -> Result<(), ServeError> {
        self.serve_with(listener, Upgrade::Tls(acceptor)).await
    }

    fn ensure_open(&self) -> Result<(), ServeError> {
        if self.is_closed() {
            Err(ServeError::Closed)
        } else {
            Ok(())
        }
    }

    async fn bind(&self) -> Result<tokio::net::TcpListener, ServeError> {
        listener::bind(&self.inner.hostname, self.inner.port)
            .await
            .map_err(|source| ServeError::Bind {
                addr: format!("{}:{}", self.inner.hostname, self.inner.port),
                source,
            })
    }

    async fn serve_with<L: Accept>(&self, mut listener: L, upgrade: Upgrade) -> Result<(), ServeError> {
        self.ensure_open()?;
        let local_addr = listener.local_addr().map_err(ServeError::Accept)?;
        let tracked = self.inner.registry.track_listener(local_addr);

        tracing::info!(
            address = %local_addr,
            tls = matches!(upgrade, Upgrade::Tls(_)),
            "Listening for connections"
        );

        let result = self.accept_loop(&mut listener, local_addr, &upgrade, &tracked).await;

        // Deregister, then close the socket by dropping it.
        drop(tracked);
        drop(listener);
        tracing::debug!(address = %local_addr, "Listener closed");
        result
    }

    async fn accept_loop<L: Accept>(
        &self,
        listener: &mut L,
        local_addr: SocketAddr,
        upgrade: &Upgrade,
        tracked: &TrackedGuard,
    ) -> Result<(), ServeError> {
        let mut closed = self.inner.closed.subscribe();
        let mut backoff = AcceptBackoff::new(self.inner.initial_backoff, self.inner.max_backoff);

        while !*closed.borrow() {
            let accepted = tokio::select! {
                biased;
                _ = tracked.handle().closed() => break,
                _ = closed.wait_for(|closed| *closed) => break,
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((io, remote_addr)) => {
                    if let Some(last) = backoff.current() {
                        tracing::info!(last_delay_ms = last.as_millis() as u64, "Accept recovered");
                        backoff.reset();
                    }
                    if self.is_closed() {
                        break;
                    }
                    metrics::record_accept();
                    tracing::debug!(peer_addr = %remote_addr, "Connection accepted");

                    let session = self.inner.registry.track_session(remote_addr);
                    let info = ConnInfo {
                        local_addr,
                        remote_addr,
                    };
                    tokio::spawn(self.clone().run_session(io, info, session, upgrade.clone()));
                }
                Err(e) if is_transient(&e) => {
                    metrics::record_accept_error(error_kind_label(&e));
                    let wait = backoff.next_delay();
                    tracing::warn!(
                        error = %e,
                        delay_ms = wait.as_millis() as u64,
                        "Transient accept error, backing off"
                    );
                    if backoff::delay(wait, &mut closed).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    metrics::record_accept_error(error_kind_label(&e));
                    tracing::error!(address = %local_addr, error = %e, "Fatal accept error");
                    return Err(ServeError::Accept(e));
                }
            }
        }

        Ok(())
    }

    async fn run_session<I>(self, io: I, info: ConnInfo, session: TrackedGuard, upgrade: Upgrade)
    where
        I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let span = tracing::debug_span!(
            "session",
            connection_id = %session.id(),
            peer_addr = %info.remote_addr,
        );

        async move {
            match upgrade {
                Upgrade::Plain => self.drive_session(io, info, &session).await,
                Upgrade::Tls(acceptor) => {
                    let handshake = tokio::select! {
                        biased;
                        _ = session.handle().closed() => return,
                        handshake = acceptor.accept(io) => handshake,
                    };
                    match handshake {
                        Ok(stream) => self.drive_session(stream, info, &session).await,
                        Err(e) => tracing::debug!(error = %e, "TLS handshake failed, dropping connection"),
                    }
                }
            }
            // `session` drops here: deregistered and closed.
        }
        .instrument(span)
        .await
    }

    async fn drive_session<I>(&self, io: I, info: ConnInfo, session: &TrackedGuard)
    where
        I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let handler = Arc::clone(&self.inner.handler);
        let on_error = Arc::clone(&self.inner.on_error);
        let service = service_fn(move |request: Request<Incoming>| {
            let handler = Arc::clone(&handler);
            let on_error = Arc::clone(&on_error);
            async move { Ok::<_, Infallible>(dispatch(handler, on_error, request, info).await) }
        });

        let builder = auto::Builder::new(TokioExecutor::new());
        let connection = builder.serve_connection(TokioIo::new(io), service);
        tokio::pin!(connection);

        let mut closed = self.inner.closed.subscribe();
        tokio::select! {
            result = connection.as_mut() => match result {
                Ok(()) => tracing::debug!("Session ended"),
                Err(e) => tracing::debug!(error = %e, "Session ended with error"),
            },
            _ = session.handle().closed() => tracing::debug!("Session closed"),
            _ = closed.wait_for(|closed| *closed) => tracing::debug!("Session closed by shutdown"),
        }
    }
}

/// Options for [`serve`].
pub struct ServeOptions {
    pub port: u16,
    pub hostname: String,
    pub on_error: Option<ErrorHandler>,
    /// Closes the server when a message arrives or the sender is dropped.
    pub signal: Option<broadcast::Receiver<()>>,
}

impl Default for ServeOptions {
    fn default() -> Self {
        Self {
            port: 8000,
            hostname: "0.0.0.0".to_string(),
            on_error: None,
            signal: None,
        }
    }
}

/// Serve `handler` on the given address until the signal fires.
pub async fn serve<H: Handler>(handler: H, options: ServeOptions) -> Result<(), ServeError> {
    let mut server_options = ServerOptions::new(handler);
    server_options.port = options.port;
    server_options.hostname = options.hostname;
    server_options.on_error = options.on_error;

    let server = Server::new(server_options);
    if let Some(mut signal) = options.signal {
        server.close_on(async move {
            let _ = signal.recv().await;
        });
    }
    server.listen_and_serve().await
}

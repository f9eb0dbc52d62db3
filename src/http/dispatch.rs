//! Request dispatch.
//!
//! # Responsibilities
//! - Invoke the handler once per exchange, isolated in its own task
//! - Convert handler errors and panics into a fallback response
//! - Tag each exchange with an ID for log correlation
//!
//! # Design Decisions
//! - The handler task is aborted if the exchange is dropped (client gone)
//! - A failure to send the response is reported by the session, which
//!   then ends; it never reaches the handler or sibling sessions

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::http::{Request, Response};
use futures_util::future::BoxFuture;
use hyper::body::Incoming;
use tokio::task::JoinHandle;
use tracing::Instrument;
use uuid::Uuid;

use crate::http::response;
use crate::observability::metrics;

/// Boxed error returned by handlers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Addresses of the connection an exchange arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnInfo {
    pub local_addr: SocketAddr,
    pub remote_addr: SocketAddr,
}

/// Produces a response for each exchange.
pub trait Handler: Send + Sync + 'static {
    fn call(&self, request: Request<Body>, info: ConnInfo) -> BoxFuture<'static, Result<Response<Body>, BoxError>>;
}

impl<F, Fut, E> Handler for F
where
    F: Fn(Request<Body>, ConnInfo) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response<Body>, E>> + Send + 'static,
    E: Into<BoxError>,
{
    fn call(&self, request: Request<Body>, info: ConnInfo) -> BoxFuture<'static, Result<Response<Body>, BoxError>> {
        let fut = self(request, info);
        Box::pin(async move { fut.await.map_err(Into::into) })
    }
}

/// Why a handler produced no response.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("handler failed: {0}")]
    Handler(#[source] BoxError),

    #[error("handler panicked: {0}")]
    Panicked(String),
}

impl DispatchError {
    /// The handler's error, if it is of type `T`.
    pub fn downcast_ref<T: std::error::Error + 'static>(&self) -> Option<&T> {
        match self {
            DispatchError::Handler(e) => e.downcast_ref::<T>(),
            DispatchError::Panicked(_) => None,
        }
    }
}

/// Maps a handler failure to the response sent instead.
pub type ErrorHandler = Arc<dyn Fn(&DispatchError) -> Response<Body> + Send + Sync>;

/// Logs the failure and answers `500 Internal Server Error`.
pub fn default_error_handler() -> ErrorHandler {
    Arc::new(|error: &DispatchError| {
        tracing::error!(error = %error, "Handler failed");
        response::internal_error()
    })
}

/// Aborts the spawned handler if the exchange is abandoned.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Run the handler for one exchange and always yield a response.
pub(crate) async fn dispatch<H: Handler>(
    handler: Arc<H>,
    on_error: ErrorHandler,
    request: Request<Incoming>,
    info: ConnInfo,
) -> Response<Body> {
    let start = Instant::now();
    let exchange_id = Uuid::new_v4();
    let span = tracing::debug_span!(
        "exchange",
        exchange_id = %exchange_id,
        method = %request.method(),
        path = %request.uri().path(),
    );

    let request = request.map(Body::new);
    let mut task = AbortOnDrop(tokio::spawn(
        handler.call(request, info).instrument(span.clone()),
    ));

    let outcome = match (&mut task.0).await {
        Ok(Ok(response)) => Ok(response),
        Ok(Err(e)) => {
            metrics::record_handler_failure("error");
            Err(DispatchError::Handler(e))
        }
        Err(e) if e.is_panic() => {
            metrics::record_handler_failure("panic");
            Err(DispatchError::Panicked(panic_message(e.into_panic())))
        }
        Err(e) => Err(DispatchError::Panicked(e.to_string())),
    };

    let response = span.in_scope(|| match outcome {
        Ok(response) => response,
        Err(error) => on_error(&error),
    });

    span.in_scope(|| {
        tracing::debug!(
            status = response.status().as_u16(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Exchange handled"
        )
    });
    metrics::record_request(response.status().as_u16(), start);
    response
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

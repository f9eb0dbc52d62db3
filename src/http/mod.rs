//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! Listener (plain or TLS)
//!     → server.rs (accept loop, backoff, registry membership)
//!     → server.rs (session: HTTP/1.1 or HTTP/2 via hyper-util auto)
//!     → dispatch.rs (one handler task per exchange, fallback on failure)
//!     → response.rs (default error response)
//!     → Send to client
//! ```
//!
//! # Design Decisions
//! - Acceptance never waits on a session; a session never waits on an exchange
//! - A handler failure never ends the session; a send failure ends only that session
//! - `close()` is not silently idempotent: a second call reports `ServeError::Closed`

pub mod dispatch;
pub mod response;
pub mod server;

pub use dispatch::{default_error_handler, BoxError, ConnInfo, DispatchError, ErrorHandler, Handler};
pub use server::{serve, ServeError, ServeOptions, Server, ServerOptions};

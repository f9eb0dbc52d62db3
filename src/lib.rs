//! Rewriting reverse proxy library.
//!
//! A long-running HTTP server (accept loop with backoff, per-connection
//! sessions, per-exchange dispatch, total shutdown) paired with a reverse
//! proxy handler that forwards to an upstream and rewrites eligible bodies.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod proxy;
pub mod resilience;
pub mod routing;

pub use config::ProxyConfig;
pub use http::{serve, ServeError, ServeOptions, Server, ServerOptions};
pub use lifecycle::Shutdown;
pub use proxy::ReverseProxy;

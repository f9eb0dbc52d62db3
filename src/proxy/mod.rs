//! Reverse proxy
//!
//! Forwards each request to the upstream chosen by the [`Router`](crate::routing::Router),
//! then either streams the upstream body back untouched or buffers it and
//! rewrites it as text.
//!
//! # Design Decisions
//! - Header policy lives in [`headers`], the rewrite decision in [`filter`]
//! - Rules are compiled once per request host and cached, since `<DOMAIN>` tracks it
//! - Inspection reads body copies from [`tee`] off the response path
//! - Redirects are returned to the client, never followed

pub mod filter;
pub mod forward;
pub mod headers;
pub mod inspect;
pub mod rewrite;
pub mod tee;

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;

use crate::http::response::{internal_error, plain_text};
use crate::http::{BoxError, ErrorHandler};

pub use forward::ReverseProxy;

/// Failures forwarding one request.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("failed to build upstream client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("invalid upstream target {target:?}: {reason}")]
    InvalidTarget { target: String, reason: String },

    #[error("upstream unreachable: {0}")]
    Unreachable(#[source] reqwest::Error),

    #[error("upstream did not respond within {0:?}")]
    Timeout(Duration),

    #[error("failed to read upstream body: {0}")]
    Body(#[source] BoxError),
}

impl ProxyError {
    /// Status returned to the client for this failure.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Client(_) | Self::InvalidTarget { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Unreachable(_) | Self::Body(_) => StatusCode::BAD_GATEWAY,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }
}

/// Error handler mapping [`ProxyError`]s to gateway statuses.
///
/// Anything else, panics included, gets the plain 500.
pub fn error_handler() -> ErrorHandler {
    Arc::new(|err| {
        tracing::warn!(error = %err, "Request failed");
        match err.downcast_ref::<ProxyError>() {
            Some(proxy_err) => match proxy_err.status() {
                StatusCode::INTERNAL_SERVER_ERROR => internal_error(),
                status => plain_text(status, "Upstream request failed"),
            },
            None => internal_error(),
        }
    })
}

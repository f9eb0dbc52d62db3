//! Out-of-band body inspection.
//!
//! For requests whose path matches an inspection entry, a copy of the
//! request body and of the upstream response body is read in the background
//! and handed to a [`BodyInspector`]. Inspection never delays the response.

use axum::http::{Method, StatusCode};
use bytes::Bytes;

/// Bodies captured for one exchange.
#[derive(Debug, Clone)]
pub struct Inspection {
    pub method: Method,
    /// Request path and query.
    pub path: String,
    pub status: StatusCode,
    /// Request body copy, truncated to the configured limit.
    pub request_body: Bytes,
    /// Response body copy, truncated to the configured limit.
    pub response_body: Bytes,
}

/// Receives inspected exchanges.
pub trait BodyInspector: Send + Sync + 'static {
    fn inspect(&self, inspection: Inspection);
}

/// Logs the size of each inspected body and nothing of its content.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogInspector;

impl BodyInspector for LogInspector {
    fn inspect(&self, inspection: Inspection) {
        tracing::debug!(
            method = %inspection.method,
            path = %inspection.path,
            status = inspection.status.as_u16(),
            request_bytes = inspection.request_body.len(),
            response_bytes = inspection.response_body.len(),
            "Exchange inspected"
        );
    }
}

/// Whether `path` is covered by any inspection entry.
pub fn should_inspect(path: &str, entries: &[String]) -> bool {
    entries.iter().any(|e| !e.is_empty() && path.contains(e.as_str()))
}

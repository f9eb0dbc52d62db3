//! Rewrite decision.
//!
//! A pure predicate over the upstream response deciding whether its body
//! must be rewritten before being returned.

use axum::http::StatusCode;

use crate::config::FilterConfig;

/// What the decision looks at.
#[derive(Debug, Clone, Copy)]
pub struct FilterInput<'a> {
    /// Host of the resolved upstream URL.
    pub host: &'a str,
    /// Request path (query allowed).
    pub path: &'a str,
    /// Upstream `content-type`, if any.
    pub content_type: Option<&'a str>,
    /// Upstream `content-encoding`, if any.
    pub content_encoding: Option<&'a str>,
    pub status: StatusCode,
}

/// `true` if the body needs text rewriting, `false` to pass it through untouched.
pub fn needs_rewrite(input: &FilterInput<'_>, config: &FilterConfig) -> bool {
    if config
        .passthrough_paths
        .iter()
        .any(|p| !p.is_empty() && input.path.contains(p.as_str()))
    {
        return false;
    }

    if let Some(ext) = extension(input.path) {
        if config
            .whitelisted_extensions
            .iter()
            .any(|w| w.trim_start_matches('.').eq_ignore_ascii_case(ext))
        {
            return false;
        }
    }

    if config.whitelisted_status.contains(&input.status.as_u16()) {
        return false;
    }

    if config
        .whitelisted_hosts
        .iter()
        .any(|h| h.eq_ignore_ascii_case(input.host))
    {
        return false;
    }

    if let Some(content_type) = input.content_type {
        let content_type = content_type.to_ascii_lowercase();
        if config
            .whitelisted_content
            .iter()
            .any(|w| !w.is_empty() && content_type.contains(&w.to_ascii_lowercase()))
        {
            return false;
        }
    }

    // Compressed bodies cannot be rewritten as text.
    if input
        .content_encoding
        .is_some_and(|enc| !enc.trim().eq_ignore_ascii_case("identity"))
    {
        return false;
    }

    true
}

/// Extension of the last path segment, ignoring the query.
fn extension(path: &str) -> Option<&str> {
    let path = path.split(['?', '#']).next().unwrap_or(path);
    let segment = path.rsplit('/').next()?;
    let (stem, ext) = segment.rsplit_once('.')?;
    (!stem.is_empty() && !ext.is_empty()).then_some(ext)
}

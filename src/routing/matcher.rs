//! Forwarding rule matching.
//!
//! # Responsibilities
//! - Match the request host against subdomain rules (case-insensitive)
//! - Match the request path against prefix rules (case-sensitive)
//! - Produce the forwarding URL for a matching rule
//!
//! # Design Decisions
//! - Host matching is case-insensitive
//! - Path prefixes match on segment boundaries: `/api` matches `/api` and
//!   `/api/x`, never `/apix`
//! - No regex to guarantee O(n) matching

use crate::config::{PathRule, SubdomainRule};

/// The parts of a request that forwarding depends on.
#[derive(Debug, Clone, Copy)]
pub struct RouteInput<'a> {
    /// Request host, optionally with port or scheme.
    pub host: &'a str,
    /// Path and query, starting with `/`.
    pub path: &'a str,
}

/// A forwarding rule.
pub trait Matcher: Send + Sync + std::fmt::Debug {
    /// The forwarding URL if this rule applies.
    fn resolve(&self, input: &RouteInput<'_>) -> Option<String>;
}

/// Forwards `<subdomain>.anything` to `url` + path.
#[derive(Debug, Clone)]
pub struct SubdomainMatcher {
    label: String,
    url: String,
}

impl SubdomainMatcher {
    /// The subdomain is normalized to lowercase for case-insensitive matching.
    pub fn new(subdomain: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            label: format!("{}.", subdomain.into().to_lowercase()),
            url: trim_base(url.into()),
        }
    }
}

impl From<&SubdomainRule> for SubdomainMatcher {
    fn from(rule: &SubdomainRule) -> Self {
        Self::new(rule.subdomain.as_str(), rule.url.as_str())
    }
}

impl Matcher for SubdomainMatcher {
    fn resolve(&self, input: &RouteInput<'_>) -> Option<String> {
        let host = strip_scheme(input.host).to_lowercase();
        host.starts_with(&self.label)
            .then(|| format!("{}{}", self.url, input.path))
    }
}

/// Forwards paths under a prefix to `url` + the rest of the path.
#[derive(Debug, Clone)]
pub struct PathPrefixMatcher {
    prefix: String,
    url: String,
}

impl PathPrefixMatcher {
    /// A trailing `/` on the prefix is ignored.
    pub fn new(prefix: impl Into<String>, url: impl Into<String>) -> Self {
        let prefix = prefix.into();
        Self {
            prefix: prefix.trim_end_matches('/').to_string(),
            url: trim_base(url.into()),
        }
    }
}

impl From<&PathRule> for PathPrefixMatcher {
    fn from(rule: &PathRule) -> Self {
        Self::new(rule.path.as_str(), rule.url.as_str())
    }
}

impl Matcher for PathPrefixMatcher {
    fn resolve(&self, input: &RouteInput<'_>) -> Option<String> {
        let rest = input.path.strip_prefix(&self.prefix)?;
        match rest.chars().next() {
            None => Some(format!("{}/", self.url)),
            Some('/') => Some(format!("{}{}", self.url, rest)),
            Some('?') => Some(format!("{}/{}", self.url, rest)),
            Some(_) => None,
        }
    }
}

fn strip_scheme(host: &str) -> &str {
    host.strip_prefix("https://")
        .or_else(|| host.strip_prefix("http://"))
        .unwrap_or(host)
}

fn trim_base(url: String) -> String {
    url.trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input<'a>(host: &'a str, path: &'a str) -> RouteInput<'a> {
        RouteInput { host, path }
    }

    #[test]
    fn test_subdomain_matcher() {
        let matcher = SubdomainMatcher::new("cdn", "https://cdn.up.example/");

        assert_eq!(
            matcher.resolve(&input("cdn.mirror.test", "/a.js?v=1")).as_deref(),
            Some("https://cdn.up.example/a.js?v=1")
        );
        assert_eq!(
            matcher.resolve(&input("https://CDN.mirror.test:8443", "/a.js")).as_deref(),
            Some("https://cdn.up.example/a.js")
        );
        assert!(matcher.resolve(&input("cdnx.mirror.test", "/")).is_none());
        assert!(matcher.resolve(&input("mirror.test", "/")).is_none());
    }

    #[test]
    fn test_path_matcher() {
        let matcher = PathPrefixMatcher::new("/api", "https://up.example");

        assert_eq!(
            matcher.resolve(&input("mirror.test", "/api/ping")).as_deref(),
            Some("https://up.example/ping")
        );
        assert_eq!(
            matcher.resolve(&input("mirror.test", "/api")).as_deref(),
            Some("https://up.example/")
        );
        assert_eq!(
            matcher.resolve(&input("mirror.test", "/api?x=1")).as_deref(),
            Some("https://up.example/?x=1")
        );
        assert!(matcher.resolve(&input("mirror.test", "/apix")).is_none());
        assert!(matcher.resolve(&input("mirror.test", "/v2/api")).is_none());
    }

    #[test]
    fn trailing_slash_prefix_is_equivalent() {
        let matcher = PathPrefixMatcher::new("/api/", "https://up.example");
        assert_eq!(
            matcher.resolve(&input("mirror.test", "/api/ping")).as_deref(),
            Some("https://up.example/ping")
        );
    }
}

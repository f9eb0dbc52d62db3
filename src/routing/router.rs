//! Forwarding target lookup.
//!
//! # Responsibilities
//! - Store compiled forwarding rules in evaluation order
//! - Resolve a request's host and path to an upstream URL
//! - Fall back to the default upstream when no rule applies
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - Subdomain rules first, then path rules, each in config order
//! - Pure: no network access, same input always yields the same URL

use crate::config::ProxyConfig;
use crate::routing::matcher::{Matcher, PathPrefixMatcher, RouteInput, SubdomainMatcher};

/// Compiled forwarding table.
#[derive(Debug)]
pub struct Router {
    matchers: Vec<Box<dyn Matcher>>,
    default_url: String,
}

impl Router {
    /// Compile the subdomain and path tables of `config`.
    pub fn from_config(config: &ProxyConfig) -> Self {
        let subdomains = config
            .subdomains
            .iter()
            .map(|rule| Box::new(SubdomainMatcher::from(rule)) as Box<dyn Matcher>);
        let paths = config
            .paths
            .iter()
            .map(|rule| Box::new(PathPrefixMatcher::from(rule)) as Box<dyn Matcher>);

        Self {
            matchers: subdomains.chain(paths).collect(),
            default_url: config.upstream.default_url.trim_end_matches('/').to_string(),
        }
    }

    /// The upstream URL for a request. `path` must start with `/`.
    pub fn resolve(&self, host: &str, path: &str) -> String {
        let input = RouteInput { host, path };
        self.matchers
            .iter()
            .find_map(|m| m.resolve(&input))
            .unwrap_or_else(|| format!("{}{}", self.default_url, path))
    }
}

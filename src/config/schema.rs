//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the rewriting proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (port, host, TLS, accept backoff).
    pub listener: ListenerConfig,

    /// Upstream origin and transport settings.
    pub upstream: UpstreamConfig,

    /// Whitelists deciding which responses skip body rewriting.
    pub filter: FilterConfig,

    /// Ordered body rewrite rules.
    pub rewrite: Vec<RewriteRule>,

    /// Host-based forwarding rules, checked first.
    pub subdomains: Vec<SubdomainRule>,

    /// Path-prefix forwarding rules, checked after subdomains.
    pub paths: Vec<PathRule>,

    /// Out-of-band body inspection.
    pub inspection: InspectionConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ListenerConfig {
    /// Port to bind.
    pub port: u16,

    /// Host or IP to bind.
    pub hostname: String,

    /// Optional TLS termination.
    pub tls: Option<TlsConfig>,

    /// First delay after a transient accept error, in milliseconds.
    pub initial_backoff_ms: u64,

    /// Ceiling for the accept backoff, in milliseconds.
    pub max_backoff_ms: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            port: 8000,
            hostname: "0.0.0.0".to_string(),
            tls: None,
            initial_backoff_ms: 5,
            max_backoff_ms: 1000,
        }
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

/// Upstream configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Origin used when no subdomain or path rule matches.
    pub default_url: String,

    /// Value forced into the forwarded `origin` header.
    /// Defaults to the origin of `default_url`.
    pub origin: Option<String>,

    /// Value forced into the forwarded `referer` header.
    /// Defaults to the origin of `default_url`.
    pub referer: Option<String>,

    /// Time allowed for the upstream response head, in seconds.
    pub timeout_secs: u64,

    /// Chunks buffered per copy when a body is duplicated.
    pub tee_capacity: usize,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            default_url: "http://127.0.0.1:3000".to_string(),
            origin: None,
            referer: None,
            timeout_secs: 30,
            tee_capacity: 64,
        }
    }
}

/// Responses matching any of these skip rewriting.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct FilterConfig {
    /// Path substrings that are always passed through.
    pub passthrough_paths: Vec<String>,

    /// File extensions (without the dot) passed through.
    pub whitelisted_extensions: Vec<String>,

    /// Upstream status codes passed through.
    #[serde(alias = "status")]
    pub whitelisted_status: Vec<u16>,

    /// Upstream hosts passed through.
    #[serde(alias = "whitelisted_urls")]
    pub whitelisted_hosts: Vec<String>,

    /// Content-type fragments passed through (e.g. `image/`).
    pub whitelisted_content: Vec<String>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            passthrough_paths: vec!["assets/adaf93e1611d7934016a.js".to_string()],
            whitelisted_extensions: Vec::new(),
            whitelisted_status: Vec::new(),
            whitelisted_hosts: Vec::new(),
            whitelisted_content: Vec::new(),
        }
    }
}

/// A body rewrite rule. `<DOMAIN>` in either field is replaced by the request host.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RewriteRule {
    /// Regular expression to match.
    pub pattern: String,

    /// Replacement text (`$1` style group references allowed).
    #[serde(default)]
    pub replacement: String,
}

/// Forward hosts starting with `<subdomain>.` to `url`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct SubdomainRule {
    pub subdomain: String,
    pub url: String,
}

/// Forward paths under `path` to `url`, with the prefix removed.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct PathRule {
    pub path: String,
    pub url: String,
}

/// Out-of-band inspection configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct InspectionConfig {
    /// Path substrings whose bodies are handed to the inspector.
    pub paths: Vec<String>,

    /// Bytes retained per inspected body; the rest is drained and discarded.
    pub max_body_bytes: usize,
}

impl Default for InspectionConfig {
    fn default() -> Self {
        Self {
            paths: Vec::new(),
            max_body_bytes: 64 * 1024,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

impl ProxyConfig {
    /// Origin of the default upstream, e.g. `https://example.com`.
    pub fn upstream_origin(&self) -> String {
        url::Url::parse(&self.upstream.default_url)
            .map(|u| u.origin().ascii_serialization())
            .unwrap_or_else(|_| self.upstream.default_url.trim_end_matches('/').to_string())
    }

    /// The forced `origin` header value.
    pub fn forced_origin(&self) -> String {
        self.upstream.origin.clone().unwrap_or_else(|| self.upstream_origin())
    }

    /// The forced `referer` header value.
    pub fn forced_referer(&self) -> String {
        self.upstream.referer.clone().unwrap_or_else(|| self.upstream_origin())
    }
}

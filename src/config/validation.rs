//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check that every forwarding URL parses
//! - Check that every rewrite pattern compiles
//! - Validate value ranges (backoff bounds, capacities)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use crate::config::schema::ProxyConfig;
use crate::proxy::rewrite::compile_rule;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("{field}: invalid URL {url:?}: {reason}")]
    InvalidUrl {
        field: String,
        url: String,
        reason: String,
    },

    #[error("rewrite[{index}]: invalid pattern {pattern:?}: {reason}")]
    InvalidPattern {
        index: usize,
        pattern: String,
        reason: String,
    },

    #[error("{field}: {reason}")]
    OutOfRange { field: &'static str, reason: String },

    #[error("{field}[{index}]: must not be empty")]
    Empty { field: &'static str, index: usize },
}

/// Validate a parsed configuration, collecting every error found.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_url(&mut errors, "upstream.default_url", &config.upstream.default_url);
    for (i, rule) in config.subdomains.iter().enumerate() {
        if rule.subdomain.is_empty() {
            errors.push(ValidationError::Empty { field: "subdomains", index: i });
        }
        check_url(&mut errors, &format!("subdomains[{}].url", i), &rule.url);
    }
    for (i, rule) in config.paths.iter().enumerate() {
        if rule.path.trim_matches('/').is_empty() {
            errors.push(ValidationError::Empty { field: "paths", index: i });
        }
        check_url(&mut errors, &format!("paths[{}].url", i), &rule.url);
    }

    for (i, rule) in config.rewrite.iter().enumerate() {
        if rule.pattern.is_empty() {
            errors.push(ValidationError::Empty { field: "rewrite", index: i });
            continue;
        }
        if let Err(e) = compile_rule(rule, "example.com") {
            errors.push(ValidationError::InvalidPattern {
                index: i,
                pattern: rule.pattern.clone(),
                reason: e.to_string(),
            });
        }
    }

    let listener = &config.listener;
    if listener.initial_backoff_ms == 0 {
        errors.push(ValidationError::OutOfRange {
            field: "listener.initial_backoff_ms",
            reason: "must be greater than zero".into(),
        });
    }
    if listener.initial_backoff_ms > listener.max_backoff_ms {
        errors.push(ValidationError::OutOfRange {
            field: "listener.max_backoff_ms",
            reason: format!(
                "{} is below initial_backoff_ms {}",
                listener.max_backoff_ms, listener.initial_backoff_ms
            ),
        });
    }
    if config.upstream.tee_capacity == 0 {
        errors.push(ValidationError::OutOfRange {
            field: "upstream.tee_capacity",
            reason: "must be greater than zero".into(),
        });
    }
    if config.upstream.timeout_secs == 0 {
        errors.push(ValidationError::OutOfRange {
            field: "upstream.timeout_secs",
            reason: "must be greater than zero".into(),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_url(errors: &mut Vec<ValidationError>, field: &str, raw: &str) {
    match url::Url::parse(raw) {
        Ok(u) if matches!(u.scheme(), "http" | "https") => {}
        Ok(u) => errors.push(ValidationError::InvalidUrl {
            field: field.to_string(),
            url: raw.to_string(),
            reason: format!("unsupported scheme {}", u.scheme()),
        }),
        Err(e) => errors.push(ValidationError::InvalidUrl {
            field: field.to_string(),
            url: raw.to_string(),
            reason: e.to_string(),
        }),
    }
}

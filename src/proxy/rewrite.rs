//! Body text rewriting.

use std::sync::{Arc, LazyLock};

use dashmap::DashMap;
use regex::Regex;

use crate::config::RewriteRule;

/// Placeholder replaced by the request host in rule patterns and replacements.
pub const DOMAIN_PLACEHOLDER: &str = "<DOMAIN>";

/// Per-proxy bound on domains with compiled rules; the cache is emptied when reached.
const MAX_CACHED_DOMAINS: usize = 64;

// `integrity=` and its quoted value; a backslash escapes the next character.
static INTEGRITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"integrity=(?:"(?:[^"\\\n]|\\.)*"|'(?:[^'\\\n]|\\.)*')"#).expect("integrity pattern is valid")
});

/// A rule with its placeholder substituted, ready to apply.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pattern: Regex,
    replacement: String,
}

/// Substitute `domain` into `rule` and compile it. The domain is escaped in the pattern.
pub fn compile_rule(rule: &RewriteRule, domain: &str) -> Result<CompiledRule, regex::Error> {
    let pattern = rule.pattern.replace(DOMAIN_PLACEHOLDER, &regex::escape(domain));
    Ok(CompiledRule {
        pattern: Regex::new(&pattern)?,
        replacement: rule.replacement.replace(DOMAIN_PLACEHOLDER, domain),
    })
}

/// Compile every usable rule for `domain`, skipping (and logging) broken ones.
pub fn compile_rules(rules: &[RewriteRule], domain: &str) -> Vec<CompiledRule> {
    rules
        .iter()
        .filter(|rule| !rule.pattern.is_empty())
        .filter_map(|rule| match compile_rule(rule, domain) {
            Ok(compiled) => Some(compiled),
            Err(e) => {
                tracing::warn!(pattern = %rule.pattern, error = %e, "Skipping invalid rewrite rule");
                None
            }
        })
        .collect()
}

/// Usable rules plus their compiled form per request domain.
///
/// Rules that cannot compile are dropped once, when the cache is built.
#[derive(Debug, Default)]
pub struct RuleCache {
    rules: Vec<RewriteRule>,
    compiled: DashMap<String, Arc<[CompiledRule]>>,
}

impl RuleCache {
    pub fn new(rules: &[RewriteRule]) -> Self {
        // The domain is escaped before substitution, so validity does not depend on it.
        let rules = rules
            .iter()
            .filter(|rule| !rule.pattern.is_empty())
            .filter(|rule| match compile_rule(rule, "localhost") {
                Ok(_) => true,
                Err(e) => {
                    tracing::warn!(pattern = %rule.pattern, error = %e, "Skipping invalid rewrite rule");
                    false
                }
            })
            .cloned()
            .collect();
        Self {
            rules,
            compiled: DashMap::new(),
        }
    }

    /// Rules compiled for `domain`, reused across requests.
    pub fn for_domain(&self, domain: &str) -> Arc<[CompiledRule]> {
        if let Some(rules) = self.compiled.get(domain) {
            return Arc::clone(&rules);
        }
        if self.compiled.len() >= MAX_CACHED_DOMAINS {
            self.compiled.clear();
        }
        let rules: Arc<[CompiledRule]> = compile_rules(&self.rules, domain).into();
        self.compiled.insert(domain.to_string(), Arc::clone(&rules));
        rules
    }

    /// Number of usable rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Remove every `integrity="..."` attribute.
pub fn strip_integrity(text: &str) -> String {
    INTEGRITY.replace_all(text, "").into_owned()
}

/// Strip integrity attributes, then apply `rules` in order.
pub fn rewrite_body(text: &str, rules: &[CompiledRule]) -> String {
    rules.iter().fold(strip_integrity(text), |text, rule| {
        rule.pattern
            .replace_all(&text, rule.replacement.as_str())
            .into_owned()
    })
}

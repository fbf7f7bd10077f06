mod compile;
mod matcher;

use std::sync::Arc;
use std::time::Duration;

use regex::Regex;

pub use compile::compile_rules;
pub use matcher::RuleMatcher;

use crate::config::Strategy;

/// A compiled caching rule. Rules are immutable for the lifetime of a running
/// generation; changing them ships as a new generation.
#[derive(Debug, Clone)]
pub struct CacheRule {
    pub id: Arc<str>,
    pub strategy: Strategy,
    pub max_age: Option<Duration>,
    pub max_entries: Option<usize>,
    pattern: Option<Regex>,
}

impl CacheRule {
    pub(super) fn new(
        id: Arc<str>,
        pattern: Regex,
        strategy: Strategy,
        max_age: Option<Duration>,
        max_entries: Option<usize>,
    ) -> Self {
        Self {
            id,
            strategy,
            max_age,
            max_entries,
            pattern: Some(pattern),
        }
    }

    /// The rule applied when no configured pattern matches a path.
    pub(super) fn fallback() -> Self {
        Self {
            id: Arc::<str>::from("default"),
            strategy: Strategy::NetworkFirst,
            max_age: None,
            max_entries: None,
            pattern: None,
        }
    }

    pub fn matches(&self, path: &str) -> bool {
        match &self.pattern {
            Some(pattern) => pattern.is_match(path),
            None => true,
        }
    }

    pub fn pattern_str(&self) -> &str {
        self.pattern.as_ref().map(Regex::as_str).unwrap_or("")
    }
}

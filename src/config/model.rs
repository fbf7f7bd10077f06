use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// The five ways a matched request may be served. The set is closed: the
/// strategy engine matches on it exhaustively, so adding a variant is a
/// compile-time event, not a string comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    CacheFirst,
    NetworkFirst,
    StaleWhileRevalidate,
    NetworkOnly,
    CacheOnly,
}

impl Strategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Strategy::CacheFirst => "cache-first",
            Strategy::NetworkFirst => "network-first",
            Strategy::StaleWhileRevalidate => "stale-while-revalidate",
            Strategy::NetworkOnly => "network-only",
            Strategy::CacheOnly => "cache-only",
        }
    }
}

/// One caching rule as configured: an ordered pattern over request paths plus
/// the strategy and retention limits applied to matching requests.
#[derive(Debug, Clone)]
pub struct RuleSpec {
    pub id: Arc<str>,
    pub pattern: Arc<str>,
    pub strategy: Strategy,
    pub max_age_ms: Option<u64>,
    pub max_entries: Option<usize>,
}

/// The ordered application-shell asset list fetched at install time.
#[derive(Debug, Clone)]
pub struct ShellManifest {
    pub assets: Arc<[Arc<str>]>,
}

impl ShellManifest {
    /// The document served for offline navigations: the first manifest entry.
    pub fn shell_document(&self) -> &Arc<str> {
        &self.assets[0]
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub rules: Vec<RuleSpec>,
    pub manifest: ShellManifest,
}

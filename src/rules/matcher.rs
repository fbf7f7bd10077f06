use std::sync::Arc;

use super::CacheRule;

/// Selects the caching rule for a request path. Evaluation order is the
/// configured order and the first match wins; an unmatched path is not an
/// error, it gets the network-first fallback rule.
#[derive(Debug, Clone)]
pub struct RuleMatcher {
    rules: Arc<[CacheRule]>,
    fallback: CacheRule,
}

impl RuleMatcher {
    pub fn new(rules: Arc<[CacheRule]>) -> Self {
        Self {
            rules,
            fallback: CacheRule::fallback(),
        }
    }

    pub fn matches(&self, path: &str) -> &CacheRule {
        self.rules
            .iter()
            .find(|rule| rule.matches(path))
            .unwrap_or(&self.fallback)
    }

    pub fn rules(&self) -> &[CacheRule] {
        &self.rules
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, RuleSpec, ShellManifest, Strategy, ValidatedConfig};
    use crate::rules::compile_rules;

    fn matcher_for(specs: Vec<(&str, Strategy)>) -> RuleMatcher {
        let rules = specs
            .into_iter()
            .enumerate()
            .map(|(index, (pattern, strategy))| RuleSpec {
                id: Arc::<str>::from(format!("rule#{index}")),
                pattern: Arc::<str>::from(pattern),
                strategy,
                max_age_ms: None,
                max_entries: None,
            })
            .collect();
        let manifest = ShellManifest {
            assets: Arc::from(vec![Arc::<str>::from("/")].into_boxed_slice()),
        };
        let config = ValidatedConfig::new(Config { rules, manifest }).expect("validate config");
        RuleMatcher::new(compile_rules(&config).expect("compile rules"))
    }

    #[test]
    fn first_matching_rule_wins() {
        let matcher = matcher_for(vec![
            (r"\.(js|css)$", Strategy::StaleWhileRevalidate),
            (r"\.js$", Strategy::CacheOnly),
        ]);

        let rule = matcher.matches("/js/main.js");
        assert_eq!(rule.id.as_ref(), "rule#0");
        assert_eq!(rule.strategy, Strategy::StaleWhileRevalidate);
    }

    #[test]
    fn unmatched_path_gets_network_first_fallback() {
        let matcher = matcher_for(vec![(r"/api/", Strategy::NetworkFirst)]);

        let rule = matcher.matches("/about.html");
        assert_eq!(rule.id.as_ref(), "default");
        assert_eq!(rule.strategy, Strategy::NetworkFirst);
        assert!(rule.max_age.is_none());
        assert!(rule.max_entries.is_none());
    }

    #[test]
    fn later_rules_still_reachable() {
        let matcher = matcher_for(vec![
            (r"\.(png|jpg)$", Strategy::CacheFirst),
            (r"/api/", Strategy::NetworkFirst),
        ]);

        assert_eq!(matcher.matches("/api/items").id.as_ref(), "rule#1");
        assert_eq!(matcher.matches("/img/a.png").id.as_ref(), "rule#0");
    }
}

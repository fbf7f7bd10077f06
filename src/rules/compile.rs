use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use regex::Regex;

use super::CacheRule;
use crate::config::ValidatedConfig;

/// Compiles the configured rule list into its runtime form, preserving the
/// declaration order the matcher depends on.
pub fn compile_rules(config: &ValidatedConfig) -> Result<Arc<[CacheRule]>> {
    let mut compiled = Vec::with_capacity(config.rules.len());
    for spec in &config.rules {
        let pattern = Regex::new(spec.pattern.as_ref()).with_context(|| {
            format!(
                "rule '{}' has an invalid path pattern {:?}",
                spec.id, spec.pattern
            )
        })?;
        compiled.push(CacheRule::new(
            spec.id.clone(),
            pattern,
            spec.strategy,
            spec.max_age_ms.map(Duration::from_millis),
            spec.max_entries,
        ));
    }
    Ok(Arc::from(compiled.into_boxed_slice()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, RuleSpec, ShellManifest, Strategy};

    fn config_with(rules: Vec<RuleSpec>) -> ValidatedConfig {
        let manifest = ShellManifest {
            assets: Arc::from(vec![Arc::<str>::from("/")].into_boxed_slice()),
        };
        ValidatedConfig::new(Config { rules, manifest }).expect("validate config")
    }

    fn spec(pattern: &str) -> RuleSpec {
        RuleSpec {
            id: Arc::<str>::from("rule#0"),
            pattern: Arc::<str>::from(pattern),
            strategy: Strategy::CacheFirst,
            max_age_ms: Some(1_000),
            max_entries: Some(10),
        }
    }

    #[test]
    fn compiles_patterns_and_durations() -> Result<()> {
        let rules = compile_rules(&config_with(vec![spec(r"\.(png|jpg)$")]))?;
        assert_eq!(rules.len(), 1);
        assert!(rules[0].matches("/img/logo.png"));
        assert!(!rules[0].matches("/js/main.js"));
        assert_eq!(rules[0].max_age, Some(Duration::from_millis(1_000)));
        Ok(())
    }

    #[test]
    fn invalid_pattern_names_the_rule() {
        let err = compile_rules(&config_with(vec![spec(r"(unclosed")])
            .expect_err("pattern should fail to compile");
        assert!(err.to_string().contains("rule#0"), "got: {err:#}");
    }
}

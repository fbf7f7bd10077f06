mod loader;
pub mod model;

use std::collections::HashSet;
use std::ops::Deref;

use anyhow::{Result, bail, ensure};

pub use loader::load_config;
pub use model::{Config, RuleSpec, ShellManifest, Strategy};

/// Shared by the loader and programmatic construction so both paths get
/// identical guarantees.
pub fn validate_rules(rules: &[RuleSpec]) -> Result<()> {
    for rule in rules {
        if let Some(max_entries) = rule.max_entries {
            ensure!(
                max_entries > 0,
                "rule '{}' (pattern {:?}) must set max_entries to at least 1",
                rule.id,
                rule.pattern
            );
        }
    }
    Ok(())
}

pub fn validate_manifest(manifest: &ShellManifest) -> Result<()> {
    ensure!(
        !manifest.assets.is_empty(),
        "shell manifest must list at least one asset"
    );
    let mut seen = HashSet::new();
    for asset in manifest.assets.iter() {
        if !asset.starts_with('/') {
            bail!("shell asset '{asset}' must be an absolute path");
        }
        if !seen.insert(asset.as_ref()) {
            bail!("shell asset '{asset}' is listed more than once");
        }
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct ValidatedConfig {
    inner: Config,
}

impl ValidatedConfig {
    pub fn new(config: Config) -> Result<Self> {
        validate_rules(&config.rules)?;
        validate_manifest(&config.manifest)?;
        Ok(Self { inner: config })
    }

    pub fn into_inner(self) -> Config {
        self.inner
    }
}

impl AsRef<Config> for ValidatedConfig {
    fn as_ref(&self) -> &Config {
        &self.inner
    }
}

impl Deref for ValidatedConfig {
    type Target = Config;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn manifest(assets: &[&str]) -> ShellManifest {
        let assets = assets
            .iter()
            .map(|asset| Arc::<str>::from(*asset))
            .collect::<Vec<_>>();
        ShellManifest {
            assets: Arc::from(assets.into_boxed_slice()),
        }
    }

    #[test]
    fn empty_manifest_is_rejected() {
        assert!(validate_manifest(&manifest(&[])).is_err());
    }

    #[test]
    fn relative_asset_is_rejected() {
        assert!(validate_manifest(&manifest(&["/", "index.html"])).is_err());
    }

    #[test]
    fn duplicate_asset_is_rejected() {
        assert!(validate_manifest(&manifest(&["/", "/css/main.css", "/"])).is_err());
    }

    #[test]
    fn zero_entry_bound_is_rejected() {
        let rule = RuleSpec {
            id: Arc::<str>::from("rule#0"),
            pattern: Arc::<str>::from("/api/"),
            strategy: Strategy::NetworkFirst,
            max_age_ms: None,
            max_entries: Some(0),
        };
        assert!(validate_rules(&[rule]).is_err());
    }
}

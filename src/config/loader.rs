use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use super::ValidatedConfig;
use super::model::{Config, RuleSpec, ShellManifest, Strategy};

pub fn load_config<P: AsRef<Path>, Q: AsRef<Path>>(
    rules_path: P,
    manifest_path: Q,
) -> Result<ValidatedConfig> {
    let rules = load_rules(rules_path.as_ref())?;
    let manifest = load_manifest(manifest_path.as_ref())?;
    ValidatedConfig::new(Config { rules, manifest })
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RulesDoc {
    #[serde(default)]
    rules: Vec<RawRule>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRule {
    pattern: String,
    strategy: Strategy,
    max_age_ms: Option<u64>,
    max_entries: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ManifestDoc {
    #[serde(default)]
    assets: Vec<String>,
}

fn load_rules(path: &Path) -> Result<Vec<RuleSpec>> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("failed to read rules config {}", path.display()))?;
    let doc: RulesDoc = toml::from_str(&data)
        .with_context(|| format!("failed to parse rules config {}", path.display()))?;

    let mut rules = Vec::with_capacity(doc.rules.len());
    for (index, raw) in doc.rules.into_iter().enumerate() {
        if raw.pattern.is_empty() {
            bail!("rule #{index} has an empty pattern");
        }
        rules.push(RuleSpec {
            id: Arc::<str>::from(format!("rule#{index}")),
            pattern: Arc::<str>::from(raw.pattern.as_str()),
            strategy: raw.strategy,
            max_age_ms: raw.max_age_ms,
            max_entries: raw.max_entries,
        });
    }
    Ok(rules)
}

fn load_manifest(path: &Path) -> Result<ShellManifest> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("failed to read shell manifest {}", path.display()))?;
    let doc: ManifestDoc = toml::from_str(&data)
        .with_context(|| format!("failed to parse shell manifest {}", path.display()))?;

    let assets = doc
        .assets
        .iter()
        .map(|asset| Arc::<str>::from(asset.as_str()))
        .collect::<Vec<_>>();
    Ok(ShellManifest {
        assets: Arc::from(assets.into_boxed_slice()),
    })
}

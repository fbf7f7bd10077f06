use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Result, bail, ensure};
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::cli::{Cli, LogFormat};
use crate::config as runtime_config;
use crate::lifecycle::{GenerationTag, Origin};

fn default_log_format() -> LogFormat {
    LogFormat::Json
}

fn default_skip_waiting() -> bool {
    true
}

fn default_sync_task() -> String {
    "flush-submissions".to_string()
}

fn default_max_entry_size() -> u64 {
    10 * 1024 * 1024 // 10 MiB
}

fn default_sweeper_interval() -> u64 {
    300
}

fn default_sweeper_batch_size() -> usize {
    1000
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Root directory holding all named caches.
    pub cache_root: PathBuf,
    /// Path to the cache-rule configuration file.
    pub rules: PathBuf,
    /// Path to the shell-manifest configuration file.
    pub manifest: PathBuf,
    /// Origin this generation serves, e.g. "https://shop.example".
    pub origin: String,
    /// Cache-name prefix identifying this application's caches.
    pub cache_prefix: String,
    /// Version token identifying this generation.
    pub version: String,
    #[serde(default = "default_log_format")]
    pub log: LogFormat,
    #[serde(default = "default_skip_waiting")]
    pub skip_waiting: bool,
    #[serde(default = "default_sync_task")]
    pub sync_task: String,
    #[serde(default = "default_max_entry_size")]
    pub max_entry_size: u64,
    #[serde(default = "default_sweeper_interval")]
    pub sweeper_interval: u64,
    #[serde(default = "default_sweeper_batch_size")]
    pub sweeper_batch_size: usize,
    #[serde(default)]
    pub metrics_listen: Option<SocketAddr>,
}

impl Settings {
    pub fn load(cli: &Cli) -> Result<Self> {
        let mut builder = Config::builder();
        let config_path = resolve_config_path(cli)?;

        builder = builder.add_source(File::from(config_path.clone()).required(true));

        builder = builder.add_source(
            Environment::with_prefix("SHELLCACHE")
                .separator("__")
                .try_parsing(true),
        );

        let cfg = builder.build().map_err(to_anyhow)?;
        let mut settings: Settings = cfg.try_deserialize().map_err(to_anyhow)?;
        settings.apply_base_dir(&config_path);
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings together with the validated rule/manifest configuration,
    /// so preflight fails fast before touching the cache directory.
    pub fn load_with_config(cli: &Cli) -> Result<(Self, runtime_config::ValidatedConfig)> {
        let settings = Self::load(cli)?;
        let runtime = settings.load_runtime_config()?;
        Ok((settings, runtime))
    }

    pub fn load_runtime_config(&self) -> Result<runtime_config::ValidatedConfig> {
        runtime_config::load_config(&self.rules, &self.manifest)
    }

    pub fn generation_tag(&self) -> GenerationTag {
        GenerationTag::new(self.cache_prefix.as_str(), self.version.as_str())
    }

    pub fn parse_origin(&self) -> Result<Origin> {
        Origin::parse(&self.origin)
    }

    pub fn sweeper_interval(&self) -> Duration {
        Duration::from_secs(self.sweeper_interval)
    }

    fn apply_base_dir(&mut self, config_path: &Path) {
        let base_dir = config_path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        self.cache_root = absolutize(&self.cache_root, base_dir);
        self.rules = absolutize(&self.rules, base_dir);
        self.manifest = absolutize(&self.manifest, base_dir);
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            is_cache_name_part(&self.cache_prefix),
            "cache_prefix {:?} must be non-empty and limited to ASCII letters, digits, '.', '_' and '-'",
            self.cache_prefix
        );
        ensure!(
            is_cache_name_part(&self.version),
            "version {:?} must be non-empty and limited to ASCII letters, digits, '.', '_' and '-'",
            self.version
        );
        ensure!(
            !self.sync_task.is_empty(),
            "sync_task must not be empty"
        );
        ensure!(
            self.max_entry_size > 0,
            "max_entry_size must be greater than 0 (got {})",
            self.max_entry_size
        );
        ensure!(
            self.sweeper_interval > 0,
            "sweeper_interval must be greater than 0 seconds (got {})",
            self.sweeper_interval
        );
        ensure!(
            self.sweeper_batch_size > 0,
            "sweeper_batch_size must be greater than 0 (got {})",
            self.sweeper_batch_size
        );
        self.parse_origin()?;
        Ok(())
    }
}

fn is_cache_name_part(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= 64
        && !value.starts_with('.')
        && value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'))
}

fn to_anyhow(err: ConfigError) -> anyhow::Error {
    anyhow::anyhow!(err)
}

impl Cli {
    pub fn config_path(&self) -> Option<&Path> {
        self.config.as_deref()
    }
}

fn resolve_config_path(cli: &Cli) -> Result<PathBuf> {
    if let Some(path) = cli.config_path() {
        return Ok(path.to_path_buf());
    }

    for candidate in default_config_candidates() {
        if candidate.exists() {
            return Ok(candidate);
        }
    }

    bail!(
        "no configuration file provided via --config and none found in default locations: {}",
        default_config_candidates()
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(", ")
    );
}

fn default_config_candidates() -> [PathBuf; 2] {
    [
        PathBuf::from("/etc/shellcache/shellcache.toml"),
        PathBuf::from("shellcache.toml"),
    ]
}

fn absolutize(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

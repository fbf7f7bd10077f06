pub mod cli;
pub mod config;
pub mod expiry;
pub mod fallback;
pub mod fetch;
pub mod lifecycle;
pub mod logging;
pub mod metrics;
pub mod push;
pub mod rules;
pub mod settings;
pub mod store;
pub mod strategy;
pub mod sync;

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use crate::{
    fetch::Fetch,
    lifecycle::{Generation, GenerationOptions},
    rules::{RuleMatcher, compile_rules},
    settings::Settings,
    store::CacheStorage,
};

/// Wires a generation from settings and the host-supplied network fetcher:
/// rules compiled, storage opened, shell fallback keyed to the manifest.
pub async fn build_generation(
    settings: &Settings,
    fetcher: Arc<dyn Fetch>,
) -> Result<Generation> {
    let runtime = settings.load_runtime_config()?;
    let matcher = Arc::new(RuleMatcher::new(compile_rules(&runtime)?));
    let storage = Arc::new(
        CacheStorage::new(settings.cache_root.clone(), settings.max_entry_size).await?,
    );
    let options = GenerationOptions {
        skip_waiting: settings.skip_waiting,
        sync_task: Arc::from(settings.sync_task.as_str()),
    };
    let generation = Generation::new(
        settings.generation_tag(),
        settings.parse_origin()?,
        matcher,
        runtime.manifest.clone(),
        storage,
        fetcher,
        options,
    )
    .await?;
    generation.spawn_expiry_sweeper(settings.sweeper_interval(), settings.sweeper_batch_size);
    Ok(generation)
}

/// Preflight: validate the full configuration, open the cache root
/// (rebuilding indexes from disk) and report what is persisted. The fetch
/// transport belongs to the hosting environment, so there is no serving loop
/// here; this exists so deployments fail fast on bad configuration.
pub async fn run(settings: Settings) -> Result<()> {
    let settings = Arc::new(settings);
    if let Some(addr) = settings.metrics_listen {
        let path = "/metrics".to_string();
        tokio::spawn(async move {
            tracing::info!(address = %addr, "metrics endpoint starting");
            if let Err(err) = crate::metrics::serve(addr, path).await {
                tracing::error!(error = %err, "metrics endpoint failed");
            }
        });
    }

    let runtime = settings.load_runtime_config()?;
    let compiled = compile_rules(&runtime)?;
    info!(
        rule_count = compiled.len(),
        shell_assets = runtime.manifest.assets.len(),
        "configuration loaded"
    );

    let storage =
        CacheStorage::new(settings.cache_root.clone(), settings.max_entry_size).await?;
    let tag = settings.generation_tag();

    let static_store = storage.open(&tag.static_name()).await?;
    let dynamic_store = storage.open(&tag.dynamic_name()).await?;
    info!(
        cache = static_store.name(),
        entries = static_store.len(),
        "static cache opened"
    );
    info!(
        cache = dynamic_store.name(),
        entries = dynamic_store.len(),
        "dynamic cache opened"
    );

    let names = storage.list_names().await?;
    let obsolete: Vec<&String> = names
        .iter()
        .filter(|name| tag.owns(name) && !tag.is_current(name))
        .collect();
    for name in &obsolete {
        info!(cache = %name, "obsolete generation cache present; deleted at next activation");
    }
    info!(
        generation = %tag.version(),
        persisted_caches = names.len(),
        obsolete_caches = obsolete.len(),
        "preflight complete"
    );
    Ok(())
}

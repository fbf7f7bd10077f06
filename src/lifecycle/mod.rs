mod clients;

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use http::{Method, StatusCode, Uri};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info, warn};

pub use clients::{ClientHub, ClientId, ClientMessage};

use crate::config::ShellManifest;
use crate::fallback::{FallbackError, OfflineFallback};
use crate::fetch::{Fetch, NetworkError, Request, ResourceKind, Response};
use crate::logging::RequestLogBuilder;
use crate::rules::RuleMatcher;
use crate::store::{CacheKey, CacheStorage, StorageError, StoreHandle};
use crate::strategy::StrategyEngine;
use crate::sync::{FlushReport, QueueError, SubmissionQueue};

/// Names the current deployment's caches. Every named cache beginning with
/// the prefix belongs to this application; the version token separates
/// generations.
#[derive(Debug, Clone)]
pub struct GenerationTag {
    prefix: Arc<str>,
    version: Arc<str>,
}

impl GenerationTag {
    pub fn new(prefix: impl Into<Arc<str>>, version: impl Into<Arc<str>>) -> Self {
        Self {
            prefix: prefix.into(),
            version: version.into(),
        }
    }

    pub fn version(&self) -> &Arc<str> {
        &self.version
    }

    pub fn static_name(&self) -> String {
        format!("{}-static-{}", self.prefix, self.version)
    }

    pub fn dynamic_name(&self) -> String {
        format!("{}-dynamic-{}", self.prefix, self.version)
    }

    /// Whether a persisted cache name belongs to this application at all,
    /// current generation or not.
    pub fn owns(&self, name: &str) -> bool {
        name.strip_prefix(self.prefix.as_ref())
            .map(|rest| rest.starts_with('-'))
            .unwrap_or(false)
    }

    pub fn is_current(&self, name: &str) -> bool {
        name == self.static_name() || name == self.dynamic_name()
    }
}

/// The origin this generation serves. Requests elsewhere bypass the cache
/// entirely.
#[derive(Debug, Clone)]
pub struct Origin {
    scheme: String,
    authority: String,
}

impl Origin {
    pub fn parse(origin: &str) -> anyhow::Result<Self> {
        let uri: Uri = origin
            .parse()
            .map_err(|err| anyhow::anyhow!("invalid origin {origin:?}: {err}"))?;
        let scheme = uri
            .scheme_str()
            .ok_or_else(|| anyhow::anyhow!("origin {origin:?} must include a scheme"))?
            .to_string();
        let authority = uri
            .authority()
            .ok_or_else(|| anyhow::anyhow!("origin {origin:?} must include a host"))?
            .to_string();
        anyhow::ensure!(
            uri.path() == "/" || uri.path().is_empty(),
            "origin {origin:?} must not carry a path"
        );
        Ok(Self { scheme, authority })
    }

    pub fn matches(&self, uri: &Uri) -> bool {
        uri.scheme_str() == Some(self.scheme.as_str())
            && uri.authority().map(|a| a.as_str()) == Some(self.authority.as_str())
    }

    pub fn uri_for_path(&self, path: &str) -> Uri {
        format!("{}://{}{}", self.scheme, self.authority, path)
            .parse()
            .expect("origin plus validated absolute path forms a valid uri")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationState {
    Uninstalled,
    Installing,
    Installed,
    Activating,
    Active,
}

#[derive(Debug, Error)]
pub enum InstallError {
    #[error("shell asset {path} could not be fetched: {source}")]
    AssetFetch {
        path: Arc<str>,
        #[source]
        source: NetworkError,
    },
    #[error("shell asset {path} fetched with status {status}")]
    AssetStatus { path: Arc<str>, status: StatusCode },
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("install attempted from state {0:?}")]
    InvalidState(GenerationState),
}

#[derive(Debug, Error)]
pub enum ActivationError {
    #[error("obsolete cache cleanup failed: {0}")]
    Cleanup(#[from] StorageError),
    #[error("activation attempted from state {0:?}")]
    InvalidState(GenerationState),
}

/// Failure of a handled request after every fallback was exhausted.
#[derive(Debug, Error)]
pub enum ServeError {
    #[error(transparent)]
    Network(#[from] NetworkError),
    #[error(transparent)]
    Offline(#[from] FallbackError),
}

/// Policy knobs for one generation.
#[derive(Debug, Clone)]
pub struct GenerationOptions {
    /// Activate immediately after a successful install instead of waiting
    /// for the previous generation's clients to go away.
    pub skip_waiting: bool,
    /// Sync task name that triggers a queued-submission flush.
    pub sync_task: Arc<str>,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            skip_waiting: true,
            sync_task: Arc::from("flush-submissions"),
        }
    }
}

/// One versioned deployment of the caching logic. Owns its store handles,
/// rule matcher, strategy engine and client hub; nothing is shared through
/// globals, so two generations can coexist while one drains.
pub struct Generation {
    tag: GenerationTag,
    origin: Origin,
    rules: Arc<RuleMatcher>,
    manifest: ShellManifest,
    storage: Arc<CacheStorage>,
    fetcher: Arc<dyn Fetch>,
    engine: StrategyEngine,
    fallback: OfflineFallback,
    static_store: Arc<StoreHandle>,
    dynamic_store: Arc<StoreHandle>,
    clients: ClientHub,
    state: Mutex<GenerationState>,
    options: GenerationOptions,
}

impl Generation {
    pub async fn new(
        tag: GenerationTag,
        origin: Origin,
        rules: Arc<RuleMatcher>,
        manifest: ShellManifest,
        storage: Arc<CacheStorage>,
        fetcher: Arc<dyn Fetch>,
        options: GenerationOptions,
    ) -> Result<Self, StorageError> {
        let static_store = storage.open(&tag.static_name()).await?;
        let dynamic_store = storage.open(&tag.dynamic_name()).await?;
        let engine = StrategyEngine::new(dynamic_store.clone(), fetcher.clone());
        let shell_uri = origin.uri_for_path(manifest.shell_document());
        let fallback = OfflineFallback::new(
            static_store.clone(),
            CacheKey::new(&Method::GET, &shell_uri),
        );
        Ok(Self {
            tag,
            origin,
            rules,
            manifest,
            storage,
            fetcher,
            engine,
            fallback,
            static_store,
            dynamic_store,
            clients: ClientHub::new(),
            state: Mutex::new(GenerationState::Uninstalled),
            options,
        })
    }

    pub fn tag(&self) -> &GenerationTag {
        &self.tag
    }

    pub fn state(&self) -> GenerationState {
        *self.state.lock()
    }

    pub fn clients(&self) -> &ClientHub {
        &self.clients
    }

    pub fn static_store(&self) -> &Arc<StoreHandle> {
        &self.static_store
    }

    pub fn dynamic_store(&self) -> &Arc<StoreHandle> {
        &self.dynamic_store
    }

    fn begin(&self, from: GenerationState, to: GenerationState) -> Result<(), GenerationState> {
        let mut guard = self.state.lock();
        if *guard == from {
            *guard = to;
            Ok(())
        } else {
            Err(*guard)
        }
    }

    fn set_state(&self, to: GenerationState) {
        *self.state.lock() = to;
    }

    /// Pre-populates the Static cache with the shell manifest, all or
    /// nothing: every asset is fetched before anything is written, and a
    /// write failure rolls back what was already persisted.
    pub async fn install(&self) -> Result<(), InstallError> {
        self.begin(GenerationState::Uninstalled, GenerationState::Installing)
            .map_err(InstallError::InvalidState)?;
        info!(generation = %self.tag.version(), "installing generation");

        let mut fetched = Vec::with_capacity(self.manifest.assets.len());
        for asset in self.manifest.assets.iter() {
            let request = Request::get(
                self.origin.uri_for_path(asset),
                ResourceKind::for_path(asset),
            );
            match self.fetcher.fetch(&request).await {
                Ok(response) if response.is_cacheable() => fetched.push((asset.clone(), response)),
                Ok(response) => {
                    self.set_state(GenerationState::Uninstalled);
                    crate::metrics::record_install("failure");
                    return Err(InstallError::AssetStatus {
                        path: asset.clone(),
                        status: response.status,
                    });
                }
                Err(source) => {
                    self.set_state(GenerationState::Uninstalled);
                    crate::metrics::record_install("failure");
                    return Err(InstallError::AssetFetch {
                        path: asset.clone(),
                        source,
                    });
                }
            }
        }

        let mut written: Vec<CacheKey> = Vec::with_capacity(fetched.len());
        for (asset, response) in &fetched {
            let key = CacheKey::new(&Method::GET, &self.origin.uri_for_path(asset));
            if let Err(err) = self.static_store.put(&key, response).await {
                warn!(asset = asset.as_ref(), error = %err, "shell pre-cache write failed; rolling back");
                for key in &written {
                    let _ = self.static_store.remove(key).await;
                }
                self.set_state(GenerationState::Uninstalled);
                crate::metrics::record_install("failure");
                return Err(err.into());
            }
            written.push(key);
        }

        self.set_state(GenerationState::Installed);
        crate::metrics::record_install("success");
        info!(
            generation = %self.tag.version(),
            assets = written.len(),
            "generation installed"
        );

        if self.options.skip_waiting
            && let Err(err) = self.activate().await
        {
            warn!(error = %err, "immediate activation failed; generation remains waiting");
        }
        Ok(())
    }

    /// Takes control of connected clients and deletes every persisted cache
    /// belonging to an older generation. Only after both does the generation
    /// serve requests.
    pub async fn activate(&self) -> Result<(), ActivationError> {
        self.begin(GenerationState::Installed, GenerationState::Activating)
            .map_err(ActivationError::InvalidState)?;
        info!(generation = %self.tag.version(), "activating generation");

        let claimed = self.clients.claim(self.tag.version());

        match self.collect_obsolete_caches().await {
            Ok(deleted) => {
                self.set_state(GenerationState::Active);
                crate::metrics::record_activation("success");
                crate::metrics::record_generation_caches_deleted(deleted);
                self.clients.broadcast(ClientMessage::GenerationActivated {
                    version: self.tag.version().to_string(),
                });
                info!(
                    generation = %self.tag.version(),
                    claimed,
                    deleted_caches = deleted,
                    "generation active"
                );
                Ok(())
            }
            Err(err) => {
                self.set_state(GenerationState::Installed);
                crate::metrics::record_activation("failure");
                Err(ActivationError::Cleanup(err))
            }
        }
    }

    async fn collect_obsolete_caches(&self) -> Result<u64, StorageError> {
        let names = self.storage.list_names().await?;
        let mut deleted = 0u64;
        for name in names {
            if self.tag.owns(&name) && !self.tag.is_current(&name) && self.storage.delete(&name).await? {
                debug!(cache = %name, "deleted obsolete generation cache");
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    /// Steady-state request interception. Non-GET and cross-origin requests
    /// pass straight through to the network, as does everything while the
    /// generation is not yet active.
    pub async fn handle_request(&self, request: &Request) -> Result<Response, ServeError> {
        let started = Instant::now();

        if self.state() != GenerationState::Active
            || request.method != Method::GET
            || !self.origin.matches(&request.uri)
        {
            return Ok(self.fetcher.fetch(request).await?);
        }

        let rule = self.rules.matches(request.path());
        let log = RequestLogBuilder::new(request.method.as_str(), request.path())
            .rule(rule.id.as_ref())
            .strategy(rule.strategy.as_str());

        match self.engine.execute(rule, request).await {
            Ok(response) => {
                log.status(response.status)
                    .outcome("SERVED")
                    .elapsed(started.elapsed())
                    .log();
                Ok(response)
            }
            Err(err) => {
                debug!(
                    path = request.path(),
                    strategy = rule.strategy.as_str(),
                    error = %err,
                    "strategy failed; consulting offline fallback"
                );
                match self.fallback.fallback_for(request).await {
                    Ok(response) => {
                        log.status(response.status)
                            .outcome("FALLBACK")
                            .fallback(request.kind.as_str())
                            .error_reason(err.to_string())
                            .elapsed(started.elapsed())
                            .log();
                        Ok(response)
                    }
                    Err(fallback_err) => {
                        log.status(StatusCode::SERVICE_UNAVAILABLE)
                            .outcome("FAILED")
                            .error_reason(err.to_string())
                            .elapsed(started.elapsed())
                            .log();
                        Err(fallback_err.into())
                    }
                }
            }
        }
    }

    /// Entry point for the external sync scheduler. Unrecognized task names
    /// are ignored.
    pub async fn run_sync(
        &self,
        task: &str,
        queue: &dyn SubmissionQueue,
    ) -> Result<Option<FlushReport>, QueueError> {
        if task != self.options.sync_task.as_ref() {
            debug!(task, "ignoring unrecognized sync task");
            return Ok(None);
        }
        let report = crate::sync::flush_pending(queue, self.fetcher.as_ref(), &self.clients).await?;
        Ok(Some(report))
    }

    /// Background removal of dynamic entries that outlived their matched
    /// rule's max age.
    pub fn spawn_expiry_sweeper(&self, interval: Duration, batch_size: usize) {
        let rules = self.rules.clone();
        let expired: Arc<dyn Fn(&str, SystemTime) -> bool + Send + Sync> =
            Arc::new(move |path, stored_at| {
                let rule = rules.matches(path);
                crate::expiry::is_expired(stored_at, rule.max_age, SystemTime::now())
            });
        crate::store::spawn_expiry_sweeper(
            self.dynamic_store.clone(),
            interval,
            batch_size,
            expired,
        );
    }
}

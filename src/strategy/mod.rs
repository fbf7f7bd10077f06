use std::sync::Arc;
use std::time::SystemTime;

use thiserror::Error;
use tracing::{debug, warn};

use crate::config::Strategy;
use crate::expiry::is_expired;
use crate::fetch::{Fetch, NetworkError, Request, Response};
use crate::rules::CacheRule;
use crate::store::{CacheKey, StorageError, StoreHandle};

/// Failure of one strategy execution, surfaced to the request boundary.
#[derive(Debug, Error)]
pub enum StrategyError {
    #[error(transparent)]
    Network(#[from] NetworkError),
    #[error("resource not found in cache")]
    NotInCache,
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Executes the matched rule's fetch strategy against the dynamic cache and
/// the network collaborator. Callers guarantee the request is a GET; non-GET
/// requests never reach the engine. The engine holds nothing across requests
/// beyond its store handle and fetcher.
#[derive(Clone)]
pub struct StrategyEngine {
    dynamic: Arc<StoreHandle>,
    fetcher: Arc<dyn Fetch>,
}

impl StrategyEngine {
    pub fn new(dynamic: Arc<StoreHandle>, fetcher: Arc<dyn Fetch>) -> Self {
        Self { dynamic, fetcher }
    }

    pub async fn execute(
        &self,
        rule: &CacheRule,
        request: &Request,
    ) -> Result<Response, StrategyError> {
        crate::metrics::record_strategy(rule.strategy.as_str());
        let key = CacheKey::new(&request.method, &request.uri);
        match rule.strategy {
            Strategy::CacheFirst => self.cache_first(rule, request, &key).await,
            Strategy::NetworkFirst => self.network_first(rule, request, &key).await,
            Strategy::StaleWhileRevalidate => {
                self.stale_while_revalidate(rule, request, &key).await
            }
            Strategy::NetworkOnly => Ok(self.fetcher.fetch(request).await?),
            Strategy::CacheOnly => self.cache_only(&key).await,
        }
    }

    /// Serve from cache when present, even if stale; staleness only triggers
    /// an unawaited background refresh. A miss fetches synchronously.
    async fn cache_first(
        &self,
        rule: &CacheRule,
        request: &Request,
        key: &CacheKey,
    ) -> Result<Response, StrategyError> {
        let cached = match self.dynamic.get(key).await {
            Ok(cached) => cached,
            Err(err) => return self.network_only_degraded(request, err).await,
        };

        if let Some(cached) = cached {
            if is_expired(cached.stored_at, rule.max_age, SystemTime::now()) {
                self.spawn_refresh(rule, request);
            }
            return Ok(cached.into_response());
        }

        let response = self.fetcher.fetch(request).await?;
        self.store_if_cacheable(rule, key, &response).await;
        Ok(response)
    }

    /// Try the network; a successful response is stored and returned, a
    /// connectivity failure falls back to whatever the cache holds.
    async fn network_first(
        &self,
        rule: &CacheRule,
        request: &Request,
        key: &CacheKey,
    ) -> Result<Response, StrategyError> {
        match self.fetcher.fetch(request).await {
            Ok(response) => {
                self.store_if_cacheable(rule, key, &response).await;
                Ok(response)
            }
            Err(net_err) => match self.dynamic.get(key).await {
                Ok(Some(cached)) => {
                    debug!(uri = %request.uri, "network unavailable; serving cached response");
                    Ok(cached.into_response())
                }
                Ok(None) => Err(net_err.into()),
                Err(storage_err) => {
                    warn!(
                        uri = %request.uri,
                        error = %storage_err,
                        "cache fallback unavailable after network failure"
                    );
                    Err(net_err.into())
                }
            },
        }
    }

    /// Serve the cached response immediately and refresh in the background;
    /// only a cold cache waits on the network.
    async fn stale_while_revalidate(
        &self,
        rule: &CacheRule,
        request: &Request,
        key: &CacheKey,
    ) -> Result<Response, StrategyError> {
        let cached = match self.dynamic.get(key).await {
            Ok(cached) => cached,
            Err(err) => return self.network_only_degraded(request, err).await,
        };

        if let Some(cached) = cached {
            self.spawn_refresh(rule, request);
            return Ok(cached.into_response());
        }

        let response = self.fetcher.fetch(request).await?;
        self.store_if_cacheable(rule, key, &response).await;
        Ok(response)
    }

    async fn cache_only(&self, key: &CacheKey) -> Result<Response, StrategyError> {
        match self.dynamic.get(key).await? {
            Some(cached) => Ok(cached.into_response()),
            None => Err(StrategyError::NotInCache),
        }
    }

    /// Storage failed mid-strategy: log it and run the request as if the
    /// rule were network-only, skipping the write path too.
    async fn network_only_degraded(
        &self,
        request: &Request,
        err: StorageError,
    ) -> Result<Response, StrategyError> {
        warn!(
            uri = %request.uri,
            error = %err,
            "cache storage unavailable; degrading request to network-only"
        );
        Ok(self.fetcher.fetch(request).await?)
    }

    /// Write path shared by all cacheable strategies: persist successful
    /// responses only, then enforce the rule's entry bound by evicting
    /// oldest-inserted entries. Write failures never fail the request.
    async fn store_if_cacheable(&self, rule: &CacheRule, key: &CacheKey, response: &Response) {
        if !response.is_cacheable() {
            return;
        }
        if let Err(err) = self.dynamic.put(key, response).await {
            warn!(key = key.key_base(), error = %err, "failed to store response in cache");
            return;
        }
        if let Some(max_entries) = rule.max_entries
            && let Err(err) = self.dynamic.evict_to(max_entries).await
        {
            warn!(
                cache = self.dynamic.name(),
                error = %err,
                "failed to enforce cache entry bound"
            );
        }
    }

    /// Unawaited refresh: fetch, store on success, log and drop on failure.
    /// Never retried; concurrent refreshes for one key race benignly since
    /// writes are atomic and last-write-wins.
    fn spawn_refresh(&self, rule: &CacheRule, request: &Request) {
        let engine = self.clone();
        let rule = rule.clone();
        let request = request.clone();
        tokio::spawn(async move {
            let key = CacheKey::new(&request.method, &request.uri);
            match engine.fetcher.fetch(&request).await {
                Ok(response) => {
                    engine.store_if_cacheable(&rule, &key, &response).await;
                }
                Err(err) => {
                    debug!(uri = %request.uri, error = %err, "background refresh failed");
                }
            }
        });
    }
}

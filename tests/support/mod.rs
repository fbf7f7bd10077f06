#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode, Uri};
use parking_lot::Mutex;
use tempfile::TempDir;

use shellcache::{
    config::{Config, RuleSpec, ShellManifest, Strategy, ValidatedConfig},
    fetch::{Fetch, NetworkError, Request, ResourceKind, Response},
    lifecycle::{Generation, GenerationOptions, GenerationTag, Origin},
    rules::{RuleMatcher, compile_rules},
    store::{CacheKey, CacheStorage, StoreHandle},
    strategy::StrategyEngine,
};

pub const ORIGIN: &str = "https://shop.example";

pub fn uri(path: &str) -> Uri {
    format!("{ORIGIN}{path}").parse().expect("test uri")
}

pub fn get(path: &str, kind: ResourceKind) -> Request {
    Request::get(uri(path), kind)
}

pub fn key_for(path: &str) -> CacheKey {
    CacheKey::new(&Method::GET, &uri(path))
}

/// Programmable fetch collaborator: per-path responses, an offline switch,
/// and per-path request counting.
pub struct MockFetcher {
    routes: Mutex<HashMap<String, (StatusCode, Bytes)>>,
    offline: AtomicBool,
    counts: Mutex<HashMap<String, usize>>,
}

impl MockFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            routes: Mutex::new(HashMap::new()),
            offline: AtomicBool::new(false),
            counts: Mutex::new(HashMap::new()),
        })
    }

    pub fn respond(&self, path: &str, status: StatusCode, body: &[u8]) {
        self.routes
            .lock()
            .insert(path.to_string(), (status, Bytes::copy_from_slice(body)));
    }

    pub fn respond_ok(&self, path: &str, body: &[u8]) {
        self.respond(path, StatusCode::OK, body);
    }

    pub fn remove_route(&self, path: &str) {
        self.routes.lock().remove(path);
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn requests_for(&self, path: &str) -> usize {
        self.counts.lock().get(path).copied().unwrap_or(0)
    }

    pub fn total_requests(&self) -> usize {
        self.counts.lock().values().sum()
    }
}

#[async_trait]
impl Fetch for MockFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, NetworkError> {
        let path = request.uri.path().to_string();
        *self.counts.lock().entry(path.clone()).or_insert(0) += 1;

        if self.offline.load(Ordering::SeqCst) {
            return Err(NetworkError::new(request.uri.clone(), "offline"));
        }

        match self.routes.lock().get(&path) {
            Some((status, body)) => {
                let mut headers = HeaderMap::new();
                headers.insert("content-type", "application/octet-stream".parse().unwrap());
                Ok(Response::new(*status, headers, body.clone()))
            }
            None => Ok(Response::new(
                StatusCode::NOT_FOUND,
                HeaderMap::new(),
                Bytes::new(),
            )),
        }
    }
}

pub type RuleRow = (&'static str, Strategy, Option<u64>, Option<usize>);

pub fn validated_config(rules: &[RuleRow], assets: &[&str]) -> ValidatedConfig {
    let rules = rules
        .iter()
        .enumerate()
        .map(|(index, (pattern, strategy, max_age_ms, max_entries))| RuleSpec {
            id: Arc::<str>::from(format!("rule#{index}")),
            pattern: Arc::<str>::from(*pattern),
            strategy: *strategy,
            max_age_ms: *max_age_ms,
            max_entries: *max_entries,
        })
        .collect();
    let assets = assets
        .iter()
        .map(|asset| Arc::<str>::from(*asset))
        .collect::<Vec<_>>();
    let manifest = ShellManifest {
        assets: Arc::from(assets.into_boxed_slice()),
    };
    ValidatedConfig::new(Config { rules, manifest }).expect("validate test config")
}

pub fn matcher(rules: &[RuleRow]) -> Arc<RuleMatcher> {
    let config = validated_config(rules, &["/"]);
    Arc::new(RuleMatcher::new(compile_rules(&config).expect("compile test rules")))
}

pub const MAX_ENTRY_SIZE: u64 = 1024 * 1024;

pub async fn storage(dir: &TempDir) -> Arc<CacheStorage> {
    Arc::new(
        CacheStorage::new(dir.path().to_path_buf(), MAX_ENTRY_SIZE)
            .await
            .expect("create cache storage"),
    )
}

/// A strategy engine over a fresh dynamic store plus the handles the tests
/// poke at directly.
pub struct EngineHarness {
    pub dir: TempDir,
    pub fetcher: Arc<MockFetcher>,
    pub dynamic: Arc<StoreHandle>,
    pub engine: StrategyEngine,
}

pub async fn engine_harness() -> EngineHarness {
    let dir = TempDir::new().expect("tempdir");
    let storage = storage(&dir).await;
    let dynamic = storage
        .open("shop-dynamic-v1.0.0")
        .await
        .expect("open dynamic store");
    let fetcher = MockFetcher::new();
    let engine = StrategyEngine::new(dynamic.clone(), fetcher.clone());
    EngineHarness {
        dir,
        fetcher,
        dynamic,
        engine,
    }
}

/// A full generation wired over the mock fetcher.
pub struct GenerationHarness {
    pub dir: TempDir,
    pub fetcher: Arc<MockFetcher>,
    pub storage: Arc<CacheStorage>,
    pub generation: Generation,
}

pub async fn generation_harness(
    rules: &[RuleRow],
    assets: &[&str],
    options: GenerationOptions,
) -> GenerationHarness {
    let dir = TempDir::new().expect("tempdir");
    let storage_handle = storage(&dir).await;
    let config = validated_config(rules, assets);
    let rule_matcher = Arc::new(RuleMatcher::new(
        compile_rules(&config).expect("compile test rules"),
    ));
    let fetcher = MockFetcher::new();
    // Every shell asset resolves by default; tests break routes on purpose.
    for asset in assets {
        fetcher.respond_ok(asset, format!("shell:{asset}").as_bytes());
    }
    let generation = Generation::new(
        GenerationTag::new("shop", "v1.0.0"),
        Origin::parse(ORIGIN).expect("parse test origin"),
        rule_matcher,
        config.manifest.clone(),
        storage_handle.clone(),
        fetcher.clone(),
        options,
    )
    .await
    .expect("build generation");
    GenerationHarness {
        dir,
        fetcher,
        storage: storage_handle,
        generation,
    }
}

pub fn wait_options() -> GenerationOptions {
    GenerationOptions {
        skip_waiting: false,
        ..GenerationOptions::default()
    }
}

/// Polls an async condition until it holds, failing the test if it never
/// does. Background refreshes settle quickly but not synchronously.
pub async fn eventually<F, Fut>(what: &str, mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..100 {
        if condition().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition never held: {what}");
}

mod support;

use std::time::Duration;

use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use shellcache::{
    config::Strategy,
    fetch::Response,
    strategy::StrategyError,
};

use support::*;

fn stored(body: &[u8]) -> Response {
    Response::new(StatusCode::OK, HeaderMap::new(), Bytes::copy_from_slice(body))
}

#[tokio::test]
async fn cache_first_warm_cache_makes_no_network_calls() {
    let harness = engine_harness().await;
    let rules = matcher(&[(r"\.js$", Strategy::CacheFirst, None, None)]);
    let key = key_for("/js/main.js");
    harness.dynamic.put(&key, &stored(b"cached-js")).await.unwrap();

    let response = harness
        .engine
        .execute(
            rules.matches("/js/main.js"),
            &get("/js/main.js", shellcache::fetch::ResourceKind::Script),
        )
        .await
        .unwrap();

    assert_eq!(response.body.as_ref(), b"cached-js");
    assert_eq!(harness.fetcher.total_requests(), 0);
}

#[tokio::test]
async fn cache_first_miss_fetches_stores_and_returns() {
    let harness = engine_harness().await;
    let rules = matcher(&[(r"\.png$", Strategy::CacheFirst, None, None)]);
    harness.fetcher.respond_ok("/img/logo.png", b"png-bytes");

    let request = get("/img/logo.png", shellcache::fetch::ResourceKind::Image);
    let response = harness
        .engine
        .execute(rules.matches("/img/logo.png"), &request)
        .await
        .unwrap();

    assert_eq!(response.body.as_ref(), b"png-bytes");
    assert_eq!(harness.fetcher.requests_for("/img/logo.png"), 1);

    let cached = harness
        .dynamic
        .get(&key_for("/img/logo.png"))
        .await
        .unwrap()
        .expect("response should be cached");
    assert_eq!(cached.body.as_ref(), b"png-bytes");
}

#[tokio::test]
async fn cache_first_serves_stale_entry_and_refreshes_in_background() {
    let harness = engine_harness().await;
    let rules = matcher(&[(r"\.css$", Strategy::CacheFirst, Some(1), None)]);
    let key = key_for("/css/main.css");
    harness.dynamic.put(&key, &stored(b"old-css")).await.unwrap();
    harness.fetcher.respond_ok("/css/main.css", b"new-css");

    tokio::time::sleep(Duration::from_millis(10)).await;

    let request = get("/css/main.css", shellcache::fetch::ResourceKind::Style);
    let response = harness
        .engine
        .execute(rules.matches("/css/main.css"), &request)
        .await
        .unwrap();

    // The stale entry is returned immediately.
    assert_eq!(response.body.as_ref(), b"old-css");

    let dynamic = harness.dynamic.clone();
    eventually("background refresh replaces stale entry", || {
        let dynamic = dynamic.clone();
        let key = key_for("/css/main.css");
        async move {
            dynamic
                .get(&key)
                .await
                .unwrap()
                .map(|cached| cached.body.as_ref() == b"new-css")
                .unwrap_or(false)
        }
    })
    .await;
    assert_eq!(harness.fetcher.requests_for("/css/main.css"), 1);
}

#[tokio::test]
async fn network_first_stores_successful_response() {
    let harness = engine_harness().await;
    let rules = matcher(&[(r"/api/", Strategy::NetworkFirst, None, None)]);
    harness.fetcher.respond_ok("/api/data", b"fresh");

    let request = get("/api/data", shellcache::fetch::ResourceKind::Other);
    let response = harness
        .engine
        .execute(rules.matches("/api/data"), &request)
        .await
        .unwrap();

    assert_eq!(response.body.as_ref(), b"fresh");
    let cached = harness
        .dynamic
        .get(&key_for("/api/data"))
        .await
        .unwrap()
        .expect("successful response should be cached");
    assert_eq!(cached.body.as_ref(), b"fresh");
}

#[tokio::test]
async fn network_first_serves_cache_when_offline() {
    let harness = engine_harness().await;
    let rules = matcher(&[(r"/api/", Strategy::NetworkFirst, None, None)]);
    let key = key_for("/api/data");
    harness.dynamic.put(&key, &stored(b"stale-but-here")).await.unwrap();
    harness.fetcher.set_offline(true);

    let request = get("/api/data", shellcache::fetch::ResourceKind::Other);
    let response = harness
        .engine
        .execute(rules.matches("/api/data"), &request)
        .await
        .unwrap();

    assert_eq!(response.body.as_ref(), b"stale-but-here");
}

#[tokio::test]
async fn network_first_cold_cache_propagates_network_failure() {
    let harness = engine_harness().await;
    let rules = matcher(&[(r"/api/", Strategy::NetworkFirst, None, None)]);
    harness.fetcher.set_offline(true);

    let request = get("/api/missing", shellcache::fetch::ResourceKind::Other);
    let result = harness
        .engine
        .execute(rules.matches("/api/missing"), &request)
        .await;

    assert!(matches!(result, Err(StrategyError::Network(_))));
}

#[tokio::test]
async fn stale_while_revalidate_returns_stale_then_updates_store() {
    let harness = engine_harness().await;
    let rules = matcher(&[(r"\.js$", Strategy::StaleWhileRevalidate, None, None)]);
    let key = key_for("/js/app.js");
    harness.dynamic.put(&key, &stored(b"payload-a")).await.unwrap();
    harness.fetcher.respond_ok("/js/app.js", b"payload-b");

    let request = get("/js/app.js", shellcache::fetch::ResourceKind::Script);
    let response = harness
        .engine
        .execute(rules.matches("/js/app.js"), &request)
        .await
        .unwrap();

    assert_eq!(response.body.as_ref(), b"payload-a");

    let dynamic = harness.dynamic.clone();
    eventually("revalidation settles into the store", || {
        let dynamic = dynamic.clone();
        let key = key_for("/js/app.js");
        async move {
            dynamic
                .get(&key)
                .await
                .unwrap()
                .map(|cached| cached.body.as_ref() == b"payload-b")
                .unwrap_or(false)
        }
    })
    .await;
}

#[tokio::test]
async fn stale_while_revalidate_cold_cache_waits_for_network() {
    let harness = engine_harness().await;
    let rules = matcher(&[(r"\.js$", Strategy::StaleWhileRevalidate, None, None)]);
    harness.fetcher.respond_ok("/js/cold.js", b"network-js");

    let request = get("/js/cold.js", shellcache::fetch::ResourceKind::Script);
    let response = harness
        .engine
        .execute(rules.matches("/js/cold.js"), &request)
        .await
        .unwrap();

    assert_eq!(response.body.as_ref(), b"network-js");
    let cached = harness.dynamic.get(&key_for("/js/cold.js")).await.unwrap();
    assert!(cached.is_some());
}

#[tokio::test]
async fn stale_while_revalidate_cold_cache_surfaces_network_failure() {
    let harness = engine_harness().await;
    let rules = matcher(&[(r"\.js$", Strategy::StaleWhileRevalidate, None, None)]);
    harness.fetcher.set_offline(true);

    let request = get("/js/cold.js", shellcache::fetch::ResourceKind::Script);
    let result = harness
        .engine
        .execute(rules.matches("/js/cold.js"), &request)
        .await;

    assert!(matches!(result, Err(StrategyError::Network(_))));
}

#[tokio::test]
async fn network_only_never_reads_or_writes_cache() {
    let harness = engine_harness().await;
    let rules = matcher(&[(r"/live/", Strategy::NetworkOnly, None, None)]);
    let key = key_for("/live/feed");
    harness.dynamic.put(&key, &stored(b"cached-copy")).await.unwrap();
    harness.fetcher.respond_ok("/live/feed", b"live-copy");

    let request = get("/live/feed", shellcache::fetch::ResourceKind::Other);
    let response = harness
        .engine
        .execute(rules.matches("/live/feed"), &request)
        .await
        .unwrap();

    assert_eq!(response.body.as_ref(), b"live-copy");
    // The cached copy is untouched.
    let cached = harness.dynamic.get(&key).await.unwrap().unwrap();
    assert_eq!(cached.body.as_ref(), b"cached-copy");

    // Offline, the cached copy does not save a network-only request.
    harness.fetcher.set_offline(true);
    let result = harness
        .engine
        .execute(rules.matches("/live/feed"), &request)
        .await;
    assert!(matches!(result, Err(StrategyError::Network(_))));
}

#[tokio::test]
async fn cache_only_miss_fails_without_network_call() {
    let harness = engine_harness().await;
    let rules = matcher(&[(r"/offline-resource", Strategy::CacheOnly, None, None)]);

    let request = get("/offline-resource", shellcache::fetch::ResourceKind::Other);
    let result = harness
        .engine
        .execute(rules.matches("/offline-resource"), &request)
        .await;

    assert!(matches!(result, Err(StrategyError::NotInCache)));
    assert_eq!(harness.fetcher.total_requests(), 0);
}

#[tokio::test]
async fn cache_only_hit_serves_cache() {
    let harness = engine_harness().await;
    let rules = matcher(&[(r"/pinned", Strategy::CacheOnly, None, None)]);
    let key = key_for("/pinned");
    harness.dynamic.put(&key, &stored(b"pinned-bytes")).await.unwrap();

    let request = get("/pinned", shellcache::fetch::ResourceKind::Other);
    let response = harness
        .engine
        .execute(rules.matches("/pinned"), &request)
        .await
        .unwrap();

    assert_eq!(response.body.as_ref(), b"pinned-bytes");
    assert_eq!(harness.fetcher.total_requests(), 0);
}

#[tokio::test]
async fn error_responses_are_returned_but_never_persisted() {
    let harness = engine_harness().await;
    let rules = matcher(&[(r"/api/", Strategy::NetworkFirst, None, None)]);
    harness
        .fetcher
        .respond("/api/broken", StatusCode::INTERNAL_SERVER_ERROR, b"boom");

    let request = get("/api/broken", shellcache::fetch::ResourceKind::Other);
    let response = harness
        .engine
        .execute(rules.matches("/api/broken"), &request)
        .await
        .unwrap();

    assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(
        harness
            .dynamic
            .get(&key_for("/api/broken"))
            .await
            .unwrap()
            .is_none(),
        "error responses must not be cached"
    );
}

#[tokio::test]
async fn entry_bound_evicts_earliest_inserted_after_writes() {
    let harness = engine_harness().await;
    let rules = matcher(&[(r"/api/", Strategy::NetworkFirst, None, Some(2))]);

    for path in ["/api/a", "/api/b", "/api/c", "/api/d"] {
        harness.fetcher.respond_ok(path, path.as_bytes());
        let request = get(path, shellcache::fetch::ResourceKind::Other);
        harness
            .engine
            .execute(rules.matches(path), &request)
            .await
            .unwrap();
    }

    assert_eq!(harness.dynamic.len(), 2);
    assert!(harness.dynamic.get(&key_for("/api/a")).await.unwrap().is_none());
    assert!(harness.dynamic.get(&key_for("/api/b")).await.unwrap().is_none());
    assert!(harness.dynamic.get(&key_for("/api/c")).await.unwrap().is_some());
    assert!(harness.dynamic.get(&key_for("/api/d")).await.unwrap().is_some());
}

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use http::StatusCode;
use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::TcpListener,
    time::timeout,
};

static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

static REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let opts = Opts::new("requests_total", "Handled requests by outcome");
    let vec = IntCounterVec::new(opts, &["outcome"]).expect("create counter vec");
    REGISTRY
        .register(Box::new(vec.clone()))
        .expect("register requests_total");
    vec
});

static REQUEST_STATUS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let opts = Opts::new("requests_status_total", "Handled requests by status class");
    let vec = IntCounterVec::new(opts, &["status_class"]).expect("create counter vec");
    REGISTRY
        .register(Box::new(vec.clone()))
        .expect("register requests_status_total");
    vec
});

static STRATEGY_EXECUTIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let opts = Opts::new("strategy_executions_total", "Strategy runs by strategy");
    let vec = IntCounterVec::new(opts, &["strategy"]).expect("create counter vec");
    REGISTRY
        .register(Box::new(vec.clone()))
        .expect("register strategy_executions_total");
    vec
});

static CACHE_LOOKUP_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let opts = Opts::new("cache_lookup_total", "Cache lookups by result");
    let vec = IntCounterVec::new(opts, &["result"]).expect("create counter vec");
    REGISTRY
        .register(Box::new(vec.clone()))
        .expect("register cache_lookup_total");
    vec
});

static CACHE_STORE_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter =
        IntCounter::new("cache_store_total", "Cache store calls").expect("create counter");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("register cache_store_total");
    counter
});

static CACHE_STORE_ERRORS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter =
        IntCounter::new("cache_store_errors_total", "Cache store errors").expect("create counter");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("register cache_store_errors_total");
    counter
});

static CACHE_EVICTIONS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter =
        IntCounter::new("cache_evictions_total", "Cache evictions").expect("create counter");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("register cache_evictions_total");
    counter
});

static CACHE_SWEEP_RUNS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter =
        IntCounter::new("cache_sweep_runs_total", "Expiry sweeper runs").expect("create counter");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("register cache_sweep_runs_total");
    counter
});

static CACHE_SWEEP_EXPIRED_ENTRIES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new(
        "cache_sweep_expired_entries_total",
        "Expired cache entries removed by the sweeper",
    )
    .expect("create counter");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("register cache_sweep_expired_entries_total");
    counter
});

static FALLBACK_RESPONSES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let opts = Opts::new("fallback_responses_total", "Offline fallbacks by kind");
    let vec = IntCounterVec::new(opts, &["kind"]).expect("create counter vec");
    REGISTRY
        .register(Box::new(vec.clone()))
        .expect("register fallback_responses_total");
    vec
});

static INSTALLS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let opts = Opts::new("installs_total", "Generation installs by result");
    let vec = IntCounterVec::new(opts, &["result"]).expect("create counter vec");
    REGISTRY
        .register(Box::new(vec.clone()))
        .expect("register installs_total");
    vec
});

static ACTIVATIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let opts = Opts::new("activations_total", "Generation activations by result");
    let vec = IntCounterVec::new(opts, &["result"]).expect("create counter vec");
    REGISTRY
        .register(Box::new(vec.clone()))
        .expect("register activations_total");
    vec
});

static GENERATION_CACHES_DELETED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new(
        "generation_caches_deleted_total",
        "Obsolete generation caches removed at activation",
    )
    .expect("create counter");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("register generation_caches_deleted_total");
    counter
});

static SYNC_SUBMISSIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let opts = Opts::new(
        "sync_submissions_total",
        "Background sync deliveries by result",
    );
    let vec = IntCounterVec::new(opts, &["result"]).expect("create counter vec");
    REGISTRY
        .register(Box::new(vec.clone()))
        .expect("register sync_submissions_total");
    vec
});

const METRICS_MAX_REQUEST_BYTES: usize = 8192;
const METRICS_READ_TIMEOUT: Duration = Duration::from_secs(5);

fn status_class(status: u16) -> &'static str {
    match status {
        200..=299 => "2xx",
        300..=399 => "3xx",
        400..=499 => "4xx",
        500..=599 => "5xx",
        _ => "other",
    }
}

pub fn record_request(outcome: &str, status: StatusCode) {
    REQUESTS_TOTAL.with_label_values(&[outcome]).inc();
    REQUEST_STATUS_TOTAL
        .with_label_values(&[status_class(status.as_u16())])
        .inc();
}

pub fn record_strategy(strategy: &str) {
    STRATEGY_EXECUTIONS_TOTAL
        .with_label_values(&[strategy])
        .inc();
}

pub fn record_cache_lookup(hit: bool) {
    let label = if hit { "hit" } else { "miss" };
    CACHE_LOOKUP_TOTAL.with_label_values(&[label]).inc();
}

pub fn record_cache_store() {
    CACHE_STORE_TOTAL.inc();
}

pub fn record_cache_store_error() {
    CACHE_STORE_ERRORS_TOTAL.inc();
}

pub fn record_cache_eviction() {
    CACHE_EVICTIONS_TOTAL.inc();
}

pub fn record_sweep_run() {
    CACHE_SWEEP_RUNS_TOTAL.inc();
}

pub fn record_sweep_removed(entries: u64) {
    if entries > 0 {
        CACHE_SWEEP_EXPIRED_ENTRIES_TOTAL.inc_by(entries);
    }
}

pub fn record_fallback(kind: &str) {
    FALLBACK_RESPONSES_TOTAL.with_label_values(&[kind]).inc();
}

pub fn record_install(result: &str) {
    INSTALLS_TOTAL.with_label_values(&[result]).inc();
}

pub fn record_activation(result: &str) {
    ACTIVATIONS_TOTAL.with_label_values(&[result]).inc();
}

pub fn record_generation_caches_deleted(count: u64) {
    if count > 0 {
        GENERATION_CACHES_DELETED_TOTAL.inc_by(count);
    }
}

pub fn record_sync_submission(result: &str) {
    SYNC_SUBMISSIONS_TOTAL.with_label_values(&[result]).inc();
}

pub fn gather() -> Vec<u8> {
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .expect("encode metrics");
    buffer
}

/// Plain-text exposition endpoint. One request per connection, bounded reads.
pub async fn serve(addr: SocketAddr, path: String) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    serve_on(listener, path).await
}

pub async fn serve_on(listener: TcpListener, path: String) -> Result<()> {
    let path = if path.is_empty() {
        "/metrics".to_string()
    } else {
        path
    };
    loop {
        let (stream, _) = listener.accept().await?;
        let path = path.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_stream(stream, &path).await {
                tracing::debug!(error = %err, "metrics handler error");
            }
        });
    }
}

async fn handle_stream<S>(stream: S, path: &str) -> Result<()>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut request_line = String::new();
    let mut total_bytes = 0usize;
    let bytes = read_line_with_limits(&mut reader, &mut request_line, &mut total_bytes).await?;
    if bytes == 0 {
        return Ok(());
    }

    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default();
    let uri = parts.next().unwrap_or_default();

    // Consume and ignore headers until empty line.
    loop {
        let mut line = String::new();
        let n = read_line_with_limits(&mut reader, &mut line, &mut total_bytes).await?;
        if n == 0 || line == "\r\n" {
            break;
        }
    }

    let response = if method == "GET" && uri == path {
        let body = gather();
        build_response(200, TextEncoder::new().format_type(), body)
    } else {
        build_response(404, "text/plain", b"not found".to_vec())
    };

    reader.get_mut().write_all(&response).await?;
    reader.get_mut().shutdown().await?;
    Ok(())
}

async fn read_line_with_limits<S>(
    reader: &mut BufReader<S>,
    line: &mut String,
    total_bytes: &mut usize,
) -> Result<usize>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let read = timeout(METRICS_READ_TIMEOUT, reader.read_line(line))
        .await
        .context("timed out reading metrics request")??;
    *total_bytes += read;
    if *total_bytes > METRICS_MAX_REQUEST_BYTES {
        bail!("metrics request exceeded {METRICS_MAX_REQUEST_BYTES} bytes");
    }
    Ok(read)
}

fn build_response(status: u16, content_type: &str, body: Vec<u8>) -> Vec<u8> {
    let header = format!(
        "HTTP/1.1 {status}\r\nContent-Length: {}\r\nContent-Type: {content_type}\r\nConnection: close\r\n\r\n",
        body.len()
    );
    let mut response = header.into_bytes();
    response.extend_from_slice(&body);
    response
}

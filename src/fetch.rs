use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode, Uri};
use thiserror::Error;

/// Connectivity failure reported by the hosting environment's transport.
#[derive(Debug, Clone, Error)]
#[error("network fetch failed for {uri}: {reason}")]
pub struct NetworkError {
    pub uri: Uri,
    pub reason: Arc<str>,
}

impl NetworkError {
    pub fn new(uri: Uri, reason: impl Into<Arc<str>>) -> Self {
        Self {
            uri,
            reason: reason.into(),
        }
    }
}

/// Coarse classification of what a request is fetching, used to pick an
/// offline substitute. Supplied by the hosting environment alongside the
/// request (browsers know it as the destination).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// A navigation to a document.
    Document,
    Image,
    Script,
    Style,
    Font,
    Other,
}

impl ResourceKind {
    /// Best-effort classification from a path, for requests the runtime
    /// originates itself (shell pre-caching).
    pub fn for_path(path: &str) -> Self {
        let name = path.rsplit('/').next().unwrap_or(path);
        let Some((_, extension)) = name.rsplit_once('.') else {
            return ResourceKind::Document;
        };
        match extension {
            "html" | "htm" => ResourceKind::Document,
            "js" | "mjs" => ResourceKind::Script,
            "css" => ResourceKind::Style,
            "png" | "jpg" | "jpeg" | "svg" | "webp" | "ico" | "gif" => ResourceKind::Image,
            "woff" | "woff2" | "ttf" | "eot" => ResourceKind::Font,
            _ => ResourceKind::Other,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Document => "document",
            ResourceKind::Image => "image",
            ResourceKind::Script => "script",
            ResourceKind::Style => "style",
            ResourceKind::Font => "font",
            ResourceKind::Other => "other",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub kind: ResourceKind,
    pub body: Bytes,
}

impl Request {
    pub fn get(uri: Uri, kind: ResourceKind) -> Self {
        Self {
            method: Method::GET,
            uri,
            headers: HeaderMap::new(),
            kind,
            body: Bytes::new(),
        }
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }
}

#[derive(Debug, Clone)]
pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Response {
    pub fn new(status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// Whether the response may be persisted: only successful responses are
    /// ever written to a cache; error responses pass through uncached.
    pub fn is_cacheable(&self) -> bool {
        self.status.is_success()
    }
}

/// Network-fetch collaborator. The actual transport lives in the hosting
/// environment; the cache runtime only depends on this contract.
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(&self, request: &Request) -> Result<Response, NetworkError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_classification_covers_shell_assets() {
        assert_eq!(ResourceKind::for_path("/"), ResourceKind::Document);
        assert_eq!(ResourceKind::for_path("/index.html"), ResourceKind::Document);
        assert_eq!(ResourceKind::for_path("/js/main.js"), ResourceKind::Script);
        assert_eq!(ResourceKind::for_path("/css/critical.css"), ResourceKind::Style);
        assert_eq!(ResourceKind::for_path("/img/logo.svg"), ResourceKind::Image);
        assert_eq!(ResourceKind::for_path("/fonts/a.woff2"), ResourceKind::Font);
        assert_eq!(ResourceKind::for_path("/manifest.json"), ResourceKind::Other);
    }

    #[test]
    fn error_statuses_are_not_cacheable() {
        let ok = Response::new(StatusCode::OK, HeaderMap::new(), Bytes::new());
        assert!(ok.is_cacheable());

        let not_found = Response::new(StatusCode::NOT_FOUND, HeaderMap::new(), Bytes::new());
        assert!(!not_found.is_cacheable());

        let server_error =
            Response::new(StatusCode::BAD_GATEWAY, HeaderMap::new(), Bytes::new());
        assert!(!server_error.is_cacheable());
    }
}

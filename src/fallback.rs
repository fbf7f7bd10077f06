use std::sync::Arc;

use bytes::Bytes;
use http::{HeaderMap, HeaderValue, StatusCode, header};
use thiserror::Error;
use tracing::warn;

use crate::fetch::{Request, ResourceKind, Response};
use crate::store::{CacheKey, StoreHandle};

const PLACEHOLDER_SVG: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" width="200" height="200" viewBox="0 0 200 200">
  <rect width="200" height="200" fill="#f3f4f6"/>
  <text x="100" y="100" text-anchor="middle" dominant-baseline="central" fill="#6b7280" font-family="Arial" font-size="14">Image Unavailable</text>
</svg>"##;

#[derive(Debug, Clone, Error)]
pub enum FallbackError {
    #[error("resource not available offline")]
    UnavailableOffline,
}

/// Produces a substitute response once every strategy path has failed.
/// Navigations get the cached application shell (or a minimal 503), images
/// get a fixed placeholder graphic; everything else stays a failure.
pub struct OfflineFallback {
    static_store: Arc<StoreHandle>,
    shell_key: CacheKey,
}

impl OfflineFallback {
    pub fn new(static_store: Arc<StoreHandle>, shell_key: CacheKey) -> Self {
        Self {
            static_store,
            shell_key,
        }
    }

    pub async fn fallback_for(&self, request: &Request) -> Result<Response, FallbackError> {
        match request.kind {
            ResourceKind::Document => {
                crate::metrics::record_fallback("document");
                Ok(self.shell_document().await)
            }
            ResourceKind::Image => {
                crate::metrics::record_fallback("image");
                Ok(placeholder_image())
            }
            _ => {
                crate::metrics::record_fallback("unavailable");
                Err(FallbackError::UnavailableOffline)
            }
        }
    }

    async fn shell_document(&self) -> Response {
        match self.static_store.get(&self.shell_key).await {
            Ok(Some(cached)) => cached.into_response(),
            Ok(None) => offline_unavailable(),
            Err(err) => {
                warn!(error = %err, "shell document unreadable; serving offline notice");
                offline_unavailable()
            }
        }
    }
}

fn offline_unavailable() -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    Response::new(
        StatusCode::SERVICE_UNAVAILABLE,
        headers,
        Bytes::from_static(b"Offline"),
    )
}

/// Synthesized placeholder: fixed dimensions and text, never fetched from
/// network or cache, so offline image slots render identically everywhere.
fn placeholder_image() -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("image/svg+xml"),
    );
    Response::new(
        StatusCode::OK,
        headers,
        Bytes::from_static(PLACEHOLDER_SVG.as_bytes()),
    )
}

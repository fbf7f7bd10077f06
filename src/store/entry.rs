use std::time::{Duration, SystemTime};

use http::{HeaderMap, StatusCode};
use serde::{Deserialize, Serialize};

/// In-memory index record for one cached response. The body lives on disk
/// next to its metadata sidecar.
#[derive(Debug, Clone)]
pub(super) struct CacheEntry {
    pub entry_id: String,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub stored_at: SystemTime,
    pub content_hash: String,
    pub content_length: u64,
}

/// On-disk metadata sidecar. `stored_at_ms` is stamped exactly once, at write
/// time; a refreshed entry is a full overwrite carrying a new stamp. Age is
/// always recomputed from this field so the entry and its staleness record
/// cannot diverge.
#[derive(Debug, Serialize, Deserialize)]
pub struct PersistedEntry {
    pub key_base: String,
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub stored_at_ms: u64,
    pub content_hash: String,
    pub content_length: u64,
}

impl CacheEntry {
    pub(super) fn to_persisted(&self, key_base: &str) -> PersistedEntry {
        PersistedEntry {
            key_base: key_base.to_string(),
            status: self.status.as_u16(),
            headers: headermap_to_vec(&self.headers),
            stored_at_ms: self
                .stored_at
                .duration_since(SystemTime::UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as u64,
            content_hash: self.content_hash.clone(),
            content_length: self.content_length,
        }
    }

    pub(super) fn from_persisted(persisted: &PersistedEntry, entry_id: &str) -> Self {
        Self {
            entry_id: entry_id.to_string(),
            status: StatusCode::from_u16(persisted.status).unwrap_or(StatusCode::OK),
            headers: to_headermap(&persisted.headers),
            stored_at: SystemTime::UNIX_EPOCH + Duration::from_millis(persisted.stored_at_ms),
            content_hash: persisted.content_hash.clone(),
            content_length: persisted.content_length,
        }
    }
}

pub(super) fn to_headermap(items: &[(String, String)]) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, value) in items {
        if let (Ok(name), Ok(value)) = (
            http::header::HeaderName::try_from(name.as_str()),
            http::HeaderValue::from_str(value),
        ) {
            map.append(name, value);
        }
    }
    map
}

pub(super) fn headermap_to_vec(map: &HeaderMap) -> Vec<(String, String)> {
    let mut items = Vec::new();
    for (name, value) in map.iter() {
        if let Ok(value_str) = value.to_str() {
            items.push((name.as_str().to_string(), value_str.to_string()));
        }
    }
    items
}

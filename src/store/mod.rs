use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::fs as async_fs;
use tokio::task;
use tracing::{trace, warn};

mod disk;
mod entry;
mod index;
mod key;
mod maintenance;

use disk::DiskLayout;
use entry::CacheEntry;
pub use entry::PersistedEntry;
use index::FifoIndex;
pub use key::CacheKey;
pub use maintenance::spawn_expiry_sweeper;

use crate::fetch::Response;

/// Storage-layer failure. Distinguishable from a cache miss so callers can
/// degrade to network-only behavior instead of treating the cache as empty.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("cache storage I/O failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("cache metadata encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("invalid cache name {0:?}")]
    InvalidName(String),
    #[error("cache index rebuild task failed: {0}")]
    Rebuild(String),
}

/// A cached response read back from a named cache, carrying the write-time
/// stamp its age is computed from.
#[derive(Debug, Clone)]
pub struct StoredResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub stored_at: SystemTime,
}

impl StoredResponse {
    pub fn into_response(self) -> Response {
        Response::new(self.status, self.headers, self.body)
    }
}

/// Durable root of all named caches. Opening the same name twice yields the
/// same logical store; entries survive process restarts.
pub struct CacheStorage {
    root: PathBuf,
    max_entry_size: u64,
    handles: Mutex<HashMap<String, Arc<StoreHandle>>>,
}

impl CacheStorage {
    pub async fn new(root: PathBuf, max_entry_size: u64) -> Result<Self, StorageError> {
        async_fs::create_dir_all(&root).await?;
        Ok(Self {
            root,
            max_entry_size,
            handles: Mutex::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &std::path::Path {
        &self.root
    }

    /// Opens a named cache, creating it if absent and rebuilding its index
    /// from disk on first open.
    pub async fn open(&self, name: &str) -> Result<Arc<StoreHandle>, StorageError> {
        validate_cache_name(name)?;
        if let Some(handle) = self.handles.lock().get(name) {
            return Ok(handle.clone());
        }

        let dir = self.root.join(name);
        async_fs::create_dir_all(&dir).await?;
        let handle = Arc::new(StoreHandle {
            name: name.to_string(),
            disk: DiskLayout::new(dir),
            index: Mutex::new(FifoIndex::new()),
            max_entry_size: self.max_entry_size,
        });

        let rebuild = {
            let handle = handle.clone();
            task::spawn_blocking(move || handle.rebuild_from_disk())
        };
        rebuild
            .await
            .map_err(|err| StorageError::Rebuild(err.to_string()))??;

        let mut guard = self.handles.lock();
        // A concurrent open may have won the race; keep the registered handle.
        let handle = guard.entry(name.to_string()).or_insert(handle).clone();
        Ok(handle)
    }

    pub async fn list_names(&self) -> Result<Vec<String>, StorageError> {
        let mut names = Vec::new();
        let mut entries = match async_fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(names),
            Err(err) => return Err(err.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let file_name = entry.file_name();
            if let Some(name) = file_name.to_str() {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Deletes a whole named cache, entries and all. Returns whether it
    /// existed.
    pub async fn delete(&self, name: &str) -> Result<bool, StorageError> {
        validate_cache_name(name)?;
        self.handles.lock().remove(name);
        match async_fs::remove_dir_all(self.root.join(name)).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }
}

fn validate_cache_name(name: &str) -> Result<(), StorageError> {
    let valid = !name.is_empty()
        && name.len() <= 200
        && !name.starts_with('.')
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'));
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidName(name.to_string()))
    }
}

/// One named cache: a durable key → response mapping with insertion-ordered
/// enumeration.
pub struct StoreHandle {
    name: String,
    disk: DiskLayout,
    index: Mutex<FifoIndex>,
    max_entry_size: u64,
}

impl StoreHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn get(&self, key: &CacheKey) -> Result<Option<StoredResponse>, StorageError> {
        let entry = self.index.lock().get(key.key_base());
        let Some(entry) = entry else {
            crate::metrics::record_cache_lookup(false);
            return Ok(None);
        };

        let body_path = self.disk.body_path(&entry.entry_id);
        let body = match async_fs::read(&body_path).await {
            Ok(body) => body,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                warn!(
                    cache = %self.name,
                    path = %body_path.display(),
                    "cache body missing on disk"
                );
                self.index.lock().remove(key.key_base());
                self.disk.remove_entry_files_async(&entry.entry_id).await;
                crate::metrics::record_cache_lookup(false);
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        };

        if body.len() as u64 != entry.content_length {
            warn!(
                cache = %self.name,
                key = key.key_base(),
                "cache body length mismatch; dropping entry"
            );
            self.index.lock().remove(key.key_base());
            self.disk.remove_entry_files_async(&entry.entry_id).await;
            crate::metrics::record_cache_lookup(false);
            return Ok(None);
        }

        crate::metrics::record_cache_lookup(true);
        Ok(Some(StoredResponse {
            status: entry.status,
            headers: entry.headers.clone(),
            body: Bytes::from(body),
            stored_at: entry.stored_at,
        }))
    }

    /// Stores a response under `key`, stamping `stored_at` now. Overwrite
    /// semantics: an existing entry is wholly replaced and re-enters the back
    /// of the insertion order. The write is all-or-nothing.
    pub async fn put(&self, key: &CacheKey, response: &Response) -> Result<(), StorageError> {
        if response.body.len() as u64 > self.max_entry_size {
            trace!(
                cache = %self.name,
                key = key.key_base(),
                size = response.body.len(),
                "response exceeds max entry size; not cached"
            );
            return Ok(());
        }

        let entry_id = key.entry_id().to_string();
        let content_hash = blake3::hash(&response.body).to_hex().to_string();

        if let Err(err) = self.disk.write_body_atomic(&entry_id, &response.body).await {
            crate::metrics::record_cache_store_error();
            return Err(err);
        }

        let entry = CacheEntry {
            entry_id: entry_id.clone(),
            status: response.status,
            headers: response.headers.clone(),
            stored_at: SystemTime::now(),
            content_hash,
            content_length: response.body.len() as u64,
        };

        if let Err(err) = self
            .disk
            .write_metadata(&entry_id, &entry.to_persisted(key.key_base()))
            .await
        {
            warn!(cache = %self.name, error = %err, "failed to write cache metadata");
            self.disk.remove_entry_files_async(&entry_id).await;
            crate::metrics::record_cache_store_error();
            return Err(err);
        }

        self.index.lock().insert(key.key_base().to_string(), entry);
        crate::metrics::record_cache_store();
        trace!(cache = %self.name, key = key.key_base(), "stored cache entry");
        Ok(())
    }

    pub async fn remove(&self, key: &CacheKey) -> Result<bool, StorageError> {
        let removed = self.index.lock().remove(key.key_base());
        match removed {
            Some(entry) => {
                self.disk.remove_entry_files_async(&entry.entry_id).await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Entry keys in insertion order, oldest first.
    pub fn keys(&self) -> Vec<String> {
        self.index.lock().keys()
    }

    pub fn len(&self) -> usize {
        self.index.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Evicts oldest-inserted entries until at most `max_entries` remain.
    /// Returns the number evicted.
    pub async fn evict_to(&self, max_entries: usize) -> Result<usize, StorageError> {
        let mut evicted = Vec::new();
        {
            let mut guard = self.index.lock();
            while guard.len() > max_entries {
                match guard.pop_oldest() {
                    Some((_, entry)) => evicted.push(entry),
                    None => break,
                }
            }
        }
        let count = evicted.len();
        for entry in evicted {
            crate::metrics::record_cache_eviction();
            trace!(cache = %self.name, entry_id = %entry.entry_id, "evicting cache entry");
            self.disk.remove_entry_files_async(&entry.entry_id).await;
        }
        Ok(count)
    }

    /// Key bases with their write stamps, insertion order. Used by the
    /// expiry sweeper.
    pub fn entries_snapshot(&self) -> Vec<(String, SystemTime)> {
        let guard = self.index.lock();
        guard
            .keys()
            .into_iter()
            .filter_map(|key_base| {
                let stored_at = guard.get(&key_base)?.stored_at;
                Some((key_base, stored_at))
            })
            .collect()
    }

    async fn remove_by_key_base(&self, key_base: &str) -> bool {
        let removed = self.index.lock().remove(key_base);
        match removed {
            Some(entry) => {
                self.disk.remove_entry_files_async(&entry.entry_id).await;
                true
            }
            None => false,
        }
    }
}

/// Hooks for the fuzz targets: parse-and-validate of untrusted metadata.
pub mod fuzzing {
    pub use super::entry::PersistedEntry;
    use super::key::CacheKey;

    /// Mirrors the rebuild-path validation of a metadata sidecar.
    pub fn parse_persisted_entry(data: &[u8]) -> Option<PersistedEntry> {
        let persisted: PersistedEntry = serde_json::from_slice(data).ok()?;
        if !super::maintenance::valid_content_hash(&persisted.content_hash) {
            return None;
        }
        let _entry_id = CacheKey::entry_id_for_key(&persisted.key_base);
        let _path = CacheKey::request_path(&persisted.key_base);
        Some(persisted)
    }
}

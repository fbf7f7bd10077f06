use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tracing::{debug, warn};

use super::{CacheEntry, CacheKey, PersistedEntry, StorageError, StoreHandle};

pub(super) fn valid_content_hash(value: &str) -> bool {
    value.len() == 64 && value.as_bytes().iter().all(|b| b.is_ascii_hexdigit())
}

impl StoreHandle {
    /// Rebuilds the in-memory index from the on-disk entries, dropping
    /// anything corrupt, orphaned or mismatched. Surviving entries re-enter
    /// the index ordered by their write stamps so eviction order is stable
    /// across restarts.
    pub(super) fn rebuild_from_disk(&self) -> Result<(), StorageError> {
        self.disk.remove_temp_files()?;
        self.index.lock().reset();

        if !self.disk.dir().exists() {
            return Ok(());
        }

        let mut restored: Vec<(String, CacheEntry)> = Vec::new();

        for shard1 in fs::read_dir(self.disk.dir())? {
            let shard1 = shard1?;
            if !shard1.file_type()?.is_dir() {
                continue;
            }
            for shard2 in fs::read_dir(shard1.path())? {
                let shard2 = shard2?;
                if !shard2.file_type()?.is_dir() {
                    continue;
                }
                let mut meta_files = Vec::new();
                let mut other_files = Vec::new();
                for entry in fs::read_dir(shard2.path())? {
                    let entry = entry?;
                    let path = entry.path();
                    if entry.file_type()?.is_file() {
                        if path.extension().and_then(|ext| ext.to_str()) == Some("meta") {
                            meta_files.push(path);
                        } else {
                            other_files.push(path);
                        }
                    }
                }

                let mut live_ids = HashSet::new();
                for meta in meta_files {
                    if let Some((key_base, entry)) = self.restore_entry_from_meta(&meta) {
                        live_ids.insert(entry.entry_id.clone());
                        restored.push((key_base, entry));
                    }
                }

                for path in other_files {
                    let keep = path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .map(|name| live_ids.contains(name))
                        .unwrap_or(false);
                    if !keep {
                        fs::remove_file(&path).ok();
                    }
                }

                if fs::read_dir(shard2.path())?.next().is_none() {
                    fs::remove_dir_all(shard2.path()).ok();
                }
            }
            if fs::read_dir(shard1.path())?.next().is_none() {
                fs::remove_dir_all(shard1.path()).ok();
            }
        }

        restored.sort_by_key(|(_, entry)| entry.stored_at);
        let mut guard = self.index.lock();
        for (key_base, entry) in restored {
            guard.insert(key_base, entry);
        }
        Ok(())
    }

    fn restore_entry_from_meta(&self, meta_path: &Path) -> Option<(String, CacheEntry)> {
        let data = match fs::read(meta_path) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(
                    path = %meta_path.display(),
                    error = %err,
                    "failed to read cache metadata"
                );
                return None;
            }
        };

        let persisted: PersistedEntry = match serde_json::from_slice(&data) {
            Ok(value) => value,
            Err(err) => {
                warn!(
                    path = %meta_path.display(),
                    error = %err,
                    "failed to parse cache metadata; removing entry"
                );
                self.remove_files_for_meta(meta_path);
                return None;
            }
        };

        let entry_id = CacheKey::entry_id_for_key(&persisted.key_base);
        let file_stem = meta_path.file_stem().and_then(|s| s.to_str()).unwrap_or("");
        if entry_id != file_stem {
            warn!(
                expected = entry_id,
                actual = file_stem,
                "cache metadata key mismatch; removing entry"
            );
            self.remove_files_for_meta(meta_path);
            return None;
        }

        if !valid_content_hash(&persisted.content_hash) {
            warn!(
                path = %meta_path.display(),
                "cache metadata has invalid content hash; removing entry"
            );
            fs::remove_file(meta_path).ok();
            return None;
        }

        let body_path = self.disk.body_path(&entry_id);
        if !body_path.exists() {
            self.remove_files_for_meta(meta_path);
            return None;
        }

        if !self
            .disk
            .content_hash_matches(&body_path, &persisted.content_hash)
        {
            warn!(
                path = %body_path.display(),
                "cache content hash mismatch; removing entry"
            );
            self.remove_files_for_meta(meta_path);
            return None;
        }

        if persisted.content_length > self.max_entry_size {
            self.remove_files_for_meta(meta_path);
            return None;
        }

        let entry = CacheEntry::from_persisted(&persisted, &entry_id);
        Some((persisted.key_base, entry))
    }

    fn remove_files_for_meta(&self, meta_path: &Path) {
        if let Some(stem) = meta_path.file_stem().and_then(|s| s.to_str()) {
            self.disk.remove_entry_files(stem);
        } else {
            fs::remove_file(meta_path).ok();
        }
    }
}

/// Periodically removes entries whose matched rule says they have outlived
/// their max age. Bounded per run so a large cache cannot monopolize a tick.
pub fn spawn_expiry_sweeper(
    handle: Arc<StoreHandle>,
    interval: Duration,
    batch_size: usize,
    expired: Arc<dyn Fn(&str, SystemTime) -> bool + Send + Sync>,
) {
    if interval.is_zero() || batch_size == 0 {
        return;
    }
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let snapshot = handle.entries_snapshot();
            let mut removed = 0u64;
            for (key_base, stored_at) in snapshot.into_iter().take(batch_size) {
                let Some(path) = CacheKey::request_path(&key_base) else {
                    continue;
                };
                if expired(&path, stored_at) && handle.remove_by_key_base(&key_base).await {
                    removed += 1;
                }
            }
            crate::metrics::record_sweep_run();
            if removed > 0 {
                crate::metrics::record_sweep_removed(removed);
                debug!(cache = handle.name(), removed, "expired cache entries swept");
            }
        }
    });
}

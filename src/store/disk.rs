use std::fs;
use std::path::{Path, PathBuf};

use blake3::Hasher;
use tokio::fs as async_fs;
use tokio::io::AsyncWriteExt;

use super::{PersistedEntry, StorageError};

/// On-disk layout of one named cache: bodies and metadata sidecars under a
/// two-level shard derived from the entry id, temp files at the top level.
#[derive(Debug, Clone)]
pub(super) struct DiskLayout {
    dir: PathBuf,
}

impl DiskLayout {
    pub(super) fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub(super) fn dir(&self) -> &Path {
        &self.dir
    }

    pub(super) fn body_path(&self, entry_id: &str) -> PathBuf {
        let (first, remainder) = entry_id.split_at(2);
        let (second, _) = remainder.split_at(2);
        self.dir.join(first).join(second).join(entry_id)
    }

    pub(super) fn meta_path(&self, entry_id: &str) -> PathBuf {
        let mut path = self.body_path(entry_id);
        path.set_extension("meta");
        path
    }

    pub(super) fn temp_path(&self) -> PathBuf {
        self.dir.join(format!("tmp_{}", uuid::Uuid::new_v4()))
    }

    pub(super) fn remove_temp_files(&self) -> Result<(), StorageError> {
        if !self.dir.exists() {
            return Ok(());
        }
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_file()
                && path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(|name| name.starts_with("tmp_"))
                    .unwrap_or(false)
            {
                fs::remove_file(&path).ok();
            }
        }
        Ok(())
    }

    pub(super) fn content_hash_matches(&self, path: &Path, expected_hex: &str) -> bool {
        let mut file = match fs::File::open(path) {
            Ok(f) => f,
            Err(_) => return false,
        };
        let mut hasher = Hasher::new();
        let mut buf = [0u8; 8192];
        loop {
            match std::io::Read::read(&mut file, &mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    hasher.update(&buf[..n]);
                }
                Err(_) => return false,
            }
        }
        hasher.finalize().to_hex().to_string() == expected_hex
    }

    pub(super) fn remove_entry_files(&self, entry_id: &str) {
        fs::remove_file(self.body_path(entry_id)).ok();
        fs::remove_file(self.meta_path(entry_id)).ok();
    }

    pub(super) async fn remove_entry_files_async(&self, entry_id: &str) {
        let _ = async_fs::remove_file(self.body_path(entry_id)).await;
        let _ = async_fs::remove_file(self.meta_path(entry_id)).await;
    }

    /// Writes the body under a temp name, then renames into the shard. The
    /// rename is the commit point; callers write metadata afterwards.
    pub(super) async fn write_body_atomic(
        &self,
        entry_id: &str,
        body: &[u8],
    ) -> Result<(), StorageError> {
        let temp_path = self.temp_path();
        let mut file = async_fs::File::create(&temp_path).await?;
        if let Err(err) = file.write_all(body).await {
            drop(file);
            let _ = async_fs::remove_file(&temp_path).await;
            return Err(err.into());
        }
        if let Err(err) = file.flush().await {
            drop(file);
            let _ = async_fs::remove_file(&temp_path).await;
            return Err(err.into());
        }
        drop(file);

        let final_path = self.body_path(entry_id);
        let shard_dir = final_path
            .parent()
            .expect("entry body path always has a shard parent");
        if let Err(err) = async_fs::create_dir_all(shard_dir).await {
            let _ = async_fs::remove_file(&temp_path).await;
            return Err(err.into());
        }
        if let Err(err) = async_fs::rename(&temp_path, &final_path).await {
            let _ = async_fs::remove_file(&temp_path).await;
            return Err(err.into());
        }
        Ok(())
    }

    pub(super) async fn write_metadata(
        &self,
        entry_id: &str,
        entry: &PersistedEntry,
    ) -> Result<(), StorageError> {
        let meta_path = self.meta_path(entry_id);
        let data = serde_json::to_vec(entry)?;
        let mut file = async_fs::File::create(&meta_path).await?;
        file.write_all(&data).await?;
        file.flush().await?;
        Ok(())
    }
}

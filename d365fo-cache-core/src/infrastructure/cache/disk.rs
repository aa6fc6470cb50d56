// d365fo-cache-core/src/infrastructure/cache/disk.rs
//
// L2: a file-per-shard cache under `<cache_dir>/diskcache/`, bounded by
// total byte size rather than entry count. Multiple OS
// processes can share one `cache_dir` (CLI + MCP server running side by
// side), so eviction sweeps take an exclusive `fd-lock` on a sentinel file
// before touching the directory; ordinary get/put do not lock at all since
// `atomic_write` already makes individual file writes race-free.

use crate::infrastructure::cache::CacheKey;
use crate::infrastructure::error::InfrastructureError;
use crate::infrastructure::fs::atomic_write;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

#[derive(Clone)]
pub struct DiskCache {
    root: PathBuf,
    max_bytes: u64,
}

impl DiskCache {
    pub fn new(root: PathBuf, max_bytes: u64) -> Result<Self, InfrastructureError> {
        fs::create_dir_all(&root)?;
        Ok(DiskCache { root, max_bytes })
    }

    fn shard_path(&self, key: &CacheKey) -> PathBuf {
        self.root.join(key.shard_file_name())
    }

    fn lock_path(&self) -> PathBuf {
        self.root.join(".evict.lock")
    }

    pub fn get(&self, key: &CacheKey) -> Option<Vec<u8>> {
        fs::read(self.shard_path(key)).ok()
    }

    pub fn put(&self, key: &CacheKey, value: &[u8]) -> Result<(), InfrastructureError> {
        atomic_write(self.shard_path(key), value)?;
        self.evict_if_over_budget()?;
        Ok(())
    }

    pub fn invalidate(&self, key: &CacheKey) -> Result<(), InfrastructureError> {
        let path = self.shard_path(key);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    pub fn total_bytes(&self) -> Result<u64, InfrastructureError> {
        let mut total = 0u64;
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.path() == self.lock_path() {
                continue;
            }
            total += entry.metadata()?.len();
        }
        Ok(total)
    }

    /// Oldest-mtime-first eviction until under `max_bytes`. Recency is
    /// approximated by write time, not last-read time: a cheaper signal
    /// that avoids touching every file on every read.
    fn evict_if_over_budget(&self) -> Result<(), InfrastructureError> {
        if self.total_bytes()? <= self.max_bytes {
            return Ok(());
        }

        let lock_file = File::create(self.lock_path())?;
        let mut lock = fd_lock::RwLock::new(lock_file);
        let _guard = lock.write()?;

        let mut entries = shard_entries(&self.root, &self.lock_path())?;
        entries.sort_by_key(|(_, _, modified)| *modified);

        let mut total: u64 = entries.iter().map(|(_, size, _)| *size).sum();
        for (path, size, _) in entries {
            if total <= self.max_bytes {
                break;
            }
            if fs::remove_file(&path).is_ok() {
                total = total.saturating_sub(size);
            }
        }
        Ok(())
    }
}

fn shard_entries(root: &Path, lock_path: &Path) -> Result<Vec<(PathBuf, u64, SystemTime)>, InfrastructureError> {
    let mut out = Vec::new();
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        let path = entry.path();
        if path == lock_path {
            continue;
        }
        let metadata = entry.metadata()?;
        out.push((path, metadata.len(), metadata.modified()?));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::cache::CacheKind;
    use tempfile::tempdir;

    #[test]
    fn put_then_get_round_trips() {
        let dir = tempdir().unwrap();
        let cache = DiskCache::new(dir.path().to_path_buf(), 1024 * 1024).unwrap();
        let key = CacheKey::new(1, CacheKind::PublicEntity, "Customers");
        cache.put(&key, b"payload").unwrap();
        assert_eq!(cache.get(&key), Some(b"payload".to_vec()));
    }

    #[test]
    fn invalidate_removes_entry() {
        let dir = tempdir().unwrap();
        let cache = DiskCache::new(dir.path().to_path_buf(), 1024 * 1024).unwrap();
        let key = CacheKey::new(1, CacheKind::PublicEntity, "Customers");
        cache.put(&key, b"payload").unwrap();
        cache.invalidate(&key).unwrap();
        assert_eq!(cache.get(&key), None);
    }

    #[test]
    fn eviction_keeps_total_size_under_budget() {
        let dir = tempdir().unwrap();
        let cache = DiskCache::new(dir.path().to_path_buf(), 20).unwrap();
        for i in 0..10 {
            let key = CacheKey::new(1, CacheKind::PublicEntity, format!("Entity{i}"));
            cache.put(&key, b"0123456789").unwrap();
        }
        assert!(cache.total_bytes().unwrap() <= 20);
    }
}

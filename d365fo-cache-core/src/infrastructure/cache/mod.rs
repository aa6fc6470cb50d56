// d365fo-cache-core/src/infrastructure/cache/mod.rs
//
// Multi-tier read-through cache: L1 memory, L2 disk, L3 the
// SQLite store itself. The active `global_version_id` is folded into every
// key, so a version change makes old entries unreachable rather than
// requiring an explicit invalidation pass.

pub mod coalescer;
pub mod disk;
pub mod memory;

pub use coalescer::{LabelBatchCoalescer, SingleFlight};
pub use disk::DiskCache;
pub use memory::MemoryCache;

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub global_version_id: i64,
    pub kind: CacheKind,
    pub id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheKind {
    DataEntity,
    PublicEntity,
    Enumeration,
    Label,
    Search,
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:?}:{}", self.global_version_id, self.kind, self.id)
    }
}

impl CacheKey {
    pub fn new(global_version_id: i64, kind: CacheKind, id: impl Into<String>) -> Self {
        CacheKey {
            global_version_id,
            kind,
            id: id.into(),
        }
    }

    /// Stable on-disk filename for this key (L2), collision-free because it
    /// is derived from the full key, not just `id`.
    pub fn shard_file_name(&self) -> String {
        use sha2::{Digest, Sha256};
        let digest = Sha256::digest(self.to_string().as_bytes());
        digest.iter().map(|b| format!("{b:02x}")).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_with_different_versions_hash_to_different_shards() {
        let a = CacheKey::new(1, CacheKind::PublicEntity, "Customers");
        let b = CacheKey::new(2, CacheKind::PublicEntity, "Customers");
        assert_ne!(a.shard_file_name(), b.shard_file_name());
    }
}

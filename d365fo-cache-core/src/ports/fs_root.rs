// d365fo-cache-core/src/ports/fs_root.rs

use std::path::{Path, PathBuf};

/// Directory where the cache DB and disk cache live for one environment;
/// created if absent.
#[derive(Debug, Clone)]
pub struct FsRoot {
    root: PathBuf,
}

impl FsRoot {
    pub fn ensure(root: impl Into<PathBuf>) -> std::io::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(FsRoot { root })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn db_path(&self) -> PathBuf {
        self.root.join("metadata.sqlite")
    }

    pub fn disk_cache_dir(&self) -> PathBuf {
        self.root.join("diskcache")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_creates_missing_directory() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let nested = tmp.path().join("a").join("b");
        let root = FsRoot::ensure(&nested).expect("ensure");
        assert!(root.path().exists());
        assert_eq!(root.db_path(), nested.join("metadata.sqlite"));
    }
}

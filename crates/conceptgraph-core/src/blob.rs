//! Blob storage for original source documents.
//!
//! Sources optionally reference a `blob_key`; archive-format snapshots
//! carry the payloads and restore pushes them back here. Blob writes are
//! best-effort side effects of restore and are never rolled back.

use anyhow::{bail, Context, Result};
use dashmap::DashMap;
use std::path::{Component, Path, PathBuf};

pub trait BlobStore: Send + Sync {
    fn put(&self, key: &str, bytes: &[u8]) -> Result<()>;
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    fn contains(&self, key: &str) -> Result<bool>;
}

/// Directory-backed blob store. Keys may contain `/` separators; anything
/// that would escape the root is rejected.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        if key.is_empty()
            || relative.is_absolute()
            || relative
                .components()
                .any(|c| !matches!(c, Component::Normal(_)))
        {
            bail!("invalid blob key `{key}`");
        }
        Ok(self.root.join(relative))
    }
}

impl BlobStore for FsBlobStore {
    fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating blob dir {}", parent.display()))?;
        }
        std::fs::write(&path, bytes).with_context(|| format!("writing blob {key}"))
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key)?;
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("reading blob {key}")),
        }
    }

    fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.path_for(key)?.is_file())
    }
}

/// In-memory blob store for tests.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: DashMap<String, Vec<u8>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

impl BlobStore for MemoryBlobStore {
    fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        self.blobs.insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.blobs.get(key).map(|b| b.clone()))
    }

    fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.blobs.contains_key(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn fs_round_trip() {
        let dir = tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());
        store.put("docs/a1b2c3", b"payload").unwrap();
        assert!(store.contains("docs/a1b2c3").unwrap());
        assert_eq!(store.get("docs/a1b2c3").unwrap().unwrap(), b"payload");
        assert_eq!(store.get("docs/missing").unwrap(), None);
    }

    #[test]
    fn escaping_keys_are_rejected() {
        let dir = tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());
        assert!(store.put("../outside", b"x").is_err());
        assert!(store.put("/etc/passwd", b"x").is_err());
        assert!(store.put("", b"x").is_err());
        assert!(store.put("a/../../b", b"x").is_err());
    }
}

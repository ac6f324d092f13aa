//! Key-addressed object storage.
//!
//! Granule inputs are read from, and cell rasters and metadata written to, an
//! [`ObjectStore`]. Keys are `/`-separated paths relative to the store root
//! (`granules/HLS.S30.T01LAC.2021183T221941.v1.5.B04.tif`,
//! `cells/320071.tif`). Failures surface as
//! [`BrowseError::StorageUnavailable`] and are never retried here.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use std::sync::RwLock;

use tracing::debug;
use walkdir::WalkDir;

use crate::error::{BrowseError, Result};

/// Storage backend abstraction.
pub trait ObjectStore: Send + Sync {
    /// Fetch an object, `Ok(None)` if the key does not exist.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Create or replace an object.
    fn put(&self, key: &str, bytes: &[u8]) -> Result<()>;

    fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// All keys starting with `prefix`, sorted.
    fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Backend name for logging.
    fn name(&self) -> &'static str;
}

/// Store rooted at a local directory.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root).map_err(|e| BrowseError::storage(root.display().to_string(), e))?;
        Ok(Self { root })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Filesystem path of a key. Keys may not escape the root.
    pub fn path_for(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if key.is_empty() || escapes {
            return Err(BrowseError::storage(key, "key is not a relative path inside the store"));
        }
        Ok(self.root.join(relative))
    }
}

impl ObjectStore for LocalObjectStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key)?;
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(BrowseError::storage(key, e)),
        }
    }

    fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| BrowseError::storage(key, e))?;
        }

        // Write beside the target and rename so readers never see a partial object
        let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
        tmp_name.push(".partial");
        let tmp = path.with_file_name(tmp_name);
        let write = || -> std::io::Result<()> {
            let mut file = std::fs::File::create(&tmp)?;
            file.write_all(bytes)?;
            file.sync_all()?;
            std::fs::rename(&tmp, &path)
        };
        write().map_err(|e| BrowseError::storage(key, e))?;

        debug!(path = %path.display(), bytes = bytes.len(), "Stored object");
        Ok(())
    }

    fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.path_for(key)?.is_file())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        for entry in WalkDir::new(&self.root).min_depth(1) {
            let entry = entry.map_err(|e| BrowseError::storage(prefix, e))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&self.root) else {
                continue;
            };
            let key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            if key.starts_with(prefix) && !key.ends_with(".partial") {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn name(&self) -> &'static str {
        "local"
    }
}

/// In-memory store, mainly for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryObjectStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.read().map_or(0, |o| o.len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned(key: &str) -> BrowseError {
    BrowseError::storage(key, "in-memory store lock poisoned")
}

impl ObjectStore for MemoryObjectStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let objects = self.objects.read().map_err(|_| poisoned(key))?;
        Ok(objects.get(key).cloned())
    }

    fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let mut objects = self.objects.write().map_err(|_| poisoned(key))?;
        objects.insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    fn exists(&self, key: &str) -> Result<bool> {
        let objects = self.objects.read().map_err(|_| poisoned(key))?;
        Ok(objects.contains_key(key))
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let objects = self.objects.read().map_err(|_| poisoned(prefix))?;
        Ok(objects
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise(store: &dyn ObjectStore) {
        assert_eq!(store.get("cells/320071.tif").unwrap(), None);
        assert!(!store.exists("cells/320071.tif").unwrap());

        store.put("cells/320071.tif", b"first").unwrap();
        store.put("cells/320071.xml", b"<x/>").unwrap();
        store.put("granules/a.B04.tif", b"band").unwrap();
        store.put("cells/320071.tif", b"second").unwrap();

        assert_eq!(store.get("cells/320071.tif").unwrap().as_deref(), Some(&b"second"[..]));
        assert!(store.exists("cells/320071.xml").unwrap());
        assert_eq!(store.list("cells/").unwrap(), ["cells/320071.tif", "cells/320071.xml"]);
        assert_eq!(store.list("").unwrap().len(), 3);
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryObjectStore::new();
        exercise(&store);
        assert_eq!(store.len(), 3);
        assert_eq!(store.name(), "memory");
    }

    #[test]
    fn test_local_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path().join("bucket")).unwrap();
        exercise(&store);
        assert!(dir.path().join("bucket/cells/320071.tif").is_file());
    }

    #[test]
    fn test_local_store_rejects_escaping_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path()).unwrap();
        for key in ["../outside.tif", "/etc/passwd", ""] {
            let err = store.put(key, b"x").unwrap_err();
            assert!(matches!(err, BrowseError::StorageUnavailable { .. }), "{key}");
        }
    }
}

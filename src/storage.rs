//! Key-value persistence for session and cache entries.
//!
//! Values are plain strings; structured values are JSON encoded by the
//! caller. [`FileStore`] keeps everything in a single JSON object on disk
//! and rewrites it through a temp file so a batch lands all at once.

use crate::error::{PortalError, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Backing store for persisted client state
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Apply a batch of writes and removals as one update
    fn update(&self, set: &[(&str, &str)], remove: &[&str]) -> Result<()>;

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.update(&[(key, value)], &[])
    }

    fn remove_all(&self, keys: &[&str]) -> Result<()> {
        self.update(&[], keys)
    }
}

/// JSON file store, one object of string values
pub struct FileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStore {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    /// Default location: ~/.portal/storage.json, or .portal/storage.json without a home dir
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .map(|home| home.join(".portal"))
            .unwrap_or_else(|| PathBuf::from(".portal"))
            .join("storage.json")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_map(&self) -> Result<BTreeMap<String, String>> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) if content.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(content) => serde_json::from_str(&content).map_err(|e| {
                PortalError::Storage(format!("corrupt store {}: {}", self.path.display(), e))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(PortalError::Storage(format!(
                "failed to read {}: {}",
                self.path.display(),
                e
            ))),
        }
    }

    fn write_map(&self, map: &BTreeMap<String, String>) -> Result<()> {
        let io_err =
            |e: std::io::Error| PortalError::Storage(format!("{}: {}", self.path.display(), e));

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(io_err)?;
            }
        }

        let content = serde_json::to_string_pretty(map)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, content).map_err(io_err)?;
        std::fs::rename(&tmp, &self.path).map_err(io_err)?;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| PortalError::Storage("store lock poisoned".to_string()))?;
        Ok(self.read_map()?.get(key).cloned())
    }

    fn update(&self, set: &[(&str, &str)], remove: &[&str]) -> Result<()> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| PortalError::Storage("store lock poisoned".to_string()))?;

        let mut map = self.read_map()?;
        let before = map.clone();
        for key in remove {
            map.remove(*key);
        }
        for (key, value) in set {
            map.insert((*key).to_string(), (*value).to_string());
        }

        // Removing absent keys is a no-op, don't touch the file
        if map == before && self.path.exists() {
            return Ok(());
        }
        self.write_map(&map)
    }
}

/// Process-local store, nothing survives the process
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| PortalError::Storage("store lock poisoned".to_string()))?;
        Ok(entries.get(key).cloned())
    }

    fn update(&self, set: &[(&str, &str)], remove: &[&str]) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| PortalError::Storage("store lock poisoned".to_string()))?;
        for key in remove {
            entries.remove(*key);
        }
        for (key, value) in set {
            entries.insert((*key).to_string(), (*value).to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("storage.json");
        let store = FileStore::new(&path);

        assert_eq!(store.get("userToken").unwrap(), None);

        store
            .update(
                &[("userToken", "abc"), ("tokenExpiresAt", "2030-01-01T00:00:00Z")],
                &[],
            )
            .unwrap();
        assert!(path.exists());

        // A fresh handle sees what the first one wrote
        let reopened = FileStore::new(&path);
        assert_eq!(reopened.get("userToken").unwrap().as_deref(), Some("abc"));
        assert_eq!(
            reopened.get("tokenExpiresAt").unwrap().as_deref(),
            Some("2030-01-01T00:00:00Z")
        );

        reopened.remove_all(&["userToken", "missing"]).unwrap();
        assert_eq!(store.get("userToken").unwrap(), None);
        assert!(store.get("tokenExpiresAt").unwrap().is_some());
    }

    #[test]
    fn test_file_store_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("storage.json");
        std::fs::write(&path, "{not json").unwrap();

        let store = FileStore::new(&path);
        let err = store.get("userToken").unwrap_err();
        assert!(matches!(err, PortalError::Storage(_)));
        assert!(store.set("userToken", "abc").is_err());
    }

    #[test]
    fn test_file_store_empty_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("storage.json");
        std::fs::write(&path, "").unwrap();

        let store = FileStore::new(&path);
        assert_eq!(store.get("userToken").unwrap(), None);
    }

    #[test]
    fn test_memory_store_batch() {
        let store = MemoryStore::new();
        store.update(&[("a", "1"), ("b", "2")], &[]).unwrap();
        store.update(&[("c", "3")], &["a"]).unwrap();

        assert_eq!(store.get("a").unwrap(), None);
        assert_eq!(store.get("b").unwrap().as_deref(), Some("2"));
        assert_eq!(store.get("c").unwrap().as_deref(), Some("3"));
    }
}

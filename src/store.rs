//! Persisted key-value settings store
//!
//! The core only needs get/set/delete semantics; the storage engine behind
//! it is deliberately minimal. The default implementation keeps a flat
//! string map in a TOML file under the data directory, written atomically
//! via a temp-and-rename.

use crate::error::StoreError;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;

/// Minimal persisted key-value contract used by the identity mapper
pub trait SettingsStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// TOML-file-backed store
///
/// The full map is held in memory and rewritten on every mutation; the
/// expected contents are a handful of identity mappings, not bulk data.
pub struct TomlStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl TomlStore {
    /// Open (or create) the store at the given path
    pub fn open(path: PathBuf) -> Result<Self, StoreError> {
        let entries = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| StoreError::Read(format!("{:?}: {}", path, e)))?;
            toml::from_str(&contents)
                .map_err(|e| StoreError::Corrupt(format!("{:?}: {}", path, e)))?
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Write(format!("{:?}: {}", parent, e)))?;
        }

        let contents = toml::to_string_pretty(entries)
            .map_err(|e| StoreError::Write(e.to_string()))?;

        // Write-then-rename so a crash mid-write never corrupts the store
        let tmp = self.path.with_extension("toml.tmp");
        std::fs::write(&tmp, contents)
            .map_err(|e| StoreError::Write(format!("{:?}: {}", tmp, e)))?;
        std::fs::rename(&tmp, &self.path)
            .map_err(|e| StoreError::Write(format!("{:?}: {}", self.path, e)))?;

        Ok(())
    }
}

impl SettingsStore for TomlStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let entries = self.entries.lock().expect("store lock poisoned");
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().expect("store lock poisoned");
        entries.insert(key.to_string(), value.to_string());
        self.persist(&entries)
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().expect("store lock poisoned");
        if entries.remove(key).is_some() {
            self.persist(&entries)?;
        }
        Ok(())
    }
}

/// In-memory store for tests and engine-less runs
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let entries = self.entries.lock().expect("store lock poisoned");
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().expect("store lock poisoned");
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().expect("store lock poisoned");
        entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_roundtrip() {
        let store = MemoryStore::new();
        assert_eq!(store.get("k").unwrap(), None);
        store.set("k", "v").unwrap();
        assert_eq!(store.get("k").unwrap(), Some("v".to_string()));
        store.delete("k").unwrap();
        assert_eq!(store.get("k").unwrap(), None);
    }

    #[test]
    fn test_toml_store_persists_across_open() {
        let dir = std::env::temp_dir().join(format!("voxlink-store-{}", std::process::id()));
        let path = dir.join("settings.toml");
        let _ = std::fs::remove_file(&path);

        {
            let store = TomlStore::open(path.clone()).unwrap();
            store.set("identity/responder/local", "2000417").unwrap();
        }

        let store = TomlStore::open(path.clone()).unwrap();
        assert_eq!(
            store.get("identity/responder/local").unwrap(),
            Some("2000417".to_string())
        );

        store.delete("identity/responder/local").unwrap();
        let store = TomlStore::open(path.clone()).unwrap();
        assert_eq!(store.get("identity/responder/local").unwrap(), None);

        let _ = std::fs::remove_dir_all(&dir);
    }
}

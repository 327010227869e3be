//! Visitor storage kept in a JSON file
//!
//! The whole map is rewritten on every change, so assignments made by one
//! `pex resolve` invocation are visible to the next.

use anyhow::Context;
use parking_lot::Mutex;
use pex_core::{KeyValueStore, StoreError};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// [`KeyValueStore`] persisted as a flat JSON object
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl JsonFileStore {
    /// Open the store at `path`; a missing file starts empty
    ///
    /// # Errors
    /// When the file exists but cannot be read or is not a JSON object of strings
    pub fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let entries = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("reading store {}", path.display()))?;
            if raw.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&raw)
                    .with_context(|| format!("parsing store {}", path.display()))?
            }
        } else {
            BTreeMap::new()
        };
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    /// Backing file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Copy of every stored entry
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.entries.lock().clone()
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> Result<(), StoreError> {
        let body =
            serde_json::to_string_pretty(entries).map_err(|e| StoreError::Io(e.to_string()))?;
        std::fs::write(&self.path, body)
            .map_err(|e| StoreError::Io(format!("{}: {e}", self.path.display())))
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock();
        entries.insert(key.to_string(), value.to_string());
        self.persist(&entries)
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock();
        if entries.remove(key).is_some() {
            self.persist(&entries)?;
        }
        Ok(())
    }
}

//! Persisted visitor state
//!
//! The engine only needs `get`/`set`/`remove` on string keys. Browser local
//! storage, a file, or the in-memory [`MemoryStore`] all fit behind
//! [`KeyValueStore`].

use crate::error::StoreError;
use dashmap::DashMap;
use std::sync::Arc;

/// Minimal persisted key/value interface
pub trait KeyValueStore: Send + Sync {
    /// Value stored under `key`
    ///
    /// # Errors
    /// `StoreError` when the backing storage cannot be read
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Store `value` under `key`, overwriting
    ///
    /// # Errors
    /// `StoreError` when the backing storage cannot be written
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Delete `key`; no-op when absent
    ///
    /// # Errors
    /// `StoreError` when the backing storage cannot be written
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// In-memory store backed by a concurrent map
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, String>,
}

impl MemoryStore {
    /// Create empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is stored
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop everything
    pub fn clear(&self) {
        self.entries.clear();
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.get(key).map(|v| v.value().clone()))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.entries.remove(key);
        Ok(())
    }
}

impl<T: KeyValueStore + ?Sized> KeyValueStore for Arc<T> {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        (**self).remove(key)
    }
}

/// Per-experiment sticky variant assignments
#[derive(Clone)]
pub struct StickyAssignments {
    store: Arc<dyn KeyValueStore>,
    prefix: String,
}

impl std::fmt::Debug for StickyAssignments {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StickyAssignments")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

impl StickyAssignments {
    /// Create over a store with a key prefix
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }

    fn key(&self, experiment_id: &str) -> String {
        format!("{}{experiment_id}", self.prefix)
    }

    /// Previously assigned variant, unreadable storage counts as none
    #[must_use]
    pub fn get(&self, experiment_id: &str) -> Option<String> {
        match self.store.get(&self.key(experiment_id)) {
            Ok(v) => v.filter(|v| !v.is_empty()),
            Err(err) => {
                tracing::warn!(experiment = experiment_id, "sticky read failed: {err}");
                None
            }
        }
    }

    /// Record an assignment; failures only cost stickiness
    pub fn record(&self, experiment_id: &str, variant_id: &str) {
        if let Err(err) = self.store.set(&self.key(experiment_id), variant_id) {
            tracing::warn!(experiment = experiment_id, "sticky write failed: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_roundtrip() {
        let store = MemoryStore::new();
        assert_eq!(store.get("k").unwrap(), None);
        store.set("k", "v1").unwrap();
        store.set("k", "v2").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v2"));
        store.remove("k").unwrap();
        store.remove("k").unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn sticky_keys_are_prefixed() {
        let store = Arc::new(MemoryStore::new());
        let sticky = StickyAssignments::new(store.clone(), "experimentation_");
        sticky.record("foo", "challenger-1");
        assert_eq!(
            store.get("experimentation_foo").unwrap().as_deref(),
            Some("challenger-1")
        );
        assert_eq!(sticky.get("foo").as_deref(), Some("challenger-1"));
        assert_eq!(sticky.get("bar"), None);
    }

    struct BrokenStore;

    impl KeyValueStore for BrokenStore {
        fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
            Err(StoreError::Unavailable("private mode".into()))
        }
        fn set(&self, _key: &str, _value: &str) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("private mode".into()))
        }
        fn remove(&self, _key: &str) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("private mode".into()))
        }
    }

    #[test]
    fn broken_storage_degrades_to_no_assignment() {
        let sticky = StickyAssignments::new(Arc::new(BrokenStore), "p_");
        sticky.record("foo", "control");
        assert_eq!(sticky.get("foo"), None);
    }
}

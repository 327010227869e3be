//! Visitor consent
//!
//! A single flag under a fixed key: the string `"true"` means granted,
//! anything else (or nothing) means not granted. Revoking removes the key.

use crate::error::{Ineligibility, StoreError};
use crate::store::KeyValueStore;
use std::sync::Arc;

/// Stored value meaning consent was granted
pub const GRANTED: &str = "true";

/// Reads and updates the persisted consent flag
#[derive(Clone)]
pub struct ConsentGate {
    store: Arc<dyn KeyValueStore>,
    key: String,
}

impl std::fmt::Debug for ConsentGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsentGate")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl ConsentGate {
    /// Create gate over a store
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    /// Whether consent is currently granted
    #[must_use]
    pub fn is_granted(&self) -> bool {
        match self.store.get(&self.key) {
            Ok(value) => value.as_deref() == Some(GRANTED),
            Err(err) => {
                tracing::warn!("consent read failed, treating as not granted: {err}");
                false
            }
        }
    }

    /// Record an explicit grant or revoke
    ///
    /// # Errors
    /// `StoreError` when the flag cannot be persisted
    pub fn update(&self, granted: bool) -> Result<(), StoreError> {
        if granted {
            self.store.set(&self.key, GRANTED)
        } else {
            self.store.remove(&self.key)
        }
    }

    /// Read the flag once for a whole resolution pass
    #[must_use]
    pub fn snapshot(&self) -> ConsentSnapshot {
        ConsentSnapshot {
            granted: self.is_granted(),
        }
    }
}

/// Consent as read at the start of a resolution pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsentSnapshot {
    granted: bool,
}

impl ConsentSnapshot {
    /// Snapshot with a fixed value
    #[must_use]
    pub fn new(granted: bool) -> Self {
        Self { granted }
    }

    /// Whether consent was granted
    #[must_use]
    pub fn granted(self) -> bool {
        self.granted
    }

    /// Gate an experiment; a no-op unless it requires consent
    ///
    /// # Errors
    /// `Ineligibility::ConsentNotGranted` when required and missing
    pub fn check(self, requires_consent: bool) -> Result<(), Ineligibility> {
        if requires_consent && !self.granted {
            Err(Ineligibility::ConsentNotGranted)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn gate() -> (Arc<MemoryStore>, ConsentGate) {
        let store = Arc::new(MemoryStore::new());
        let gate = ConsentGate::new(store.clone(), "experimentation-consented");
        (store, gate)
    }

    #[test]
    fn absent_by_default() {
        let (_, gate) = gate();
        assert!(!gate.is_granted());
    }

    #[test]
    fn grant_and_revoke() {
        let (store, gate) = gate();
        gate.update(true).unwrap();
        assert_eq!(
            store.get("experimentation-consented").unwrap().as_deref(),
            Some("true")
        );
        assert!(gate.is_granted());

        gate.update(false).unwrap();
        assert_eq!(store.get("experimentation-consented").unwrap(), None);
        assert!(!gate.is_granted());
    }

    #[test]
    fn only_the_literal_true_counts() {
        let (store, gate) = gate();
        store.set("experimentation-consented", "yes").unwrap();
        assert!(!gate.is_granted());
    }

    #[test]
    fn snapshot_gates_only_when_required() {
        let denied = ConsentSnapshot::new(false);
        assert!(denied.check(false).is_ok());
        assert_eq!(denied.check(true), Err(Ineligibility::ConsentNotGranted));
        assert!(ConsentSnapshot::new(true).check(true).is_ok());
    }
}

//! Page-lifetime record of experiments
//!
//! Append-only, in resolution order. Host code reads snapshots; only the
//! engine appends.

use parking_lot::RwLock;
use pex_manifest::{ExperimentConfig, ExperimentType};
use serde::Serialize;
use std::sync::Arc;

/// One experiment as resolved on this page
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedExperiment {
    /// Scope it was applied at
    #[serde(rename = "type")]
    pub experiment_type: ExperimentType,
    /// Final configuration, including the selected variant
    pub config: Arc<ExperimentConfig>,
    /// Content path actually rendered
    pub served_experience: String,
    /// Variant rendered, `control` after a fallback; unset when not run
    #[serde(skip)]
    pub served_variant: Option<String>,
}

impl AppliedExperiment {
    /// Create entry from a finalized config
    #[must_use]
    pub fn new(config: Arc<ExperimentConfig>, served_experience: impl Into<String>) -> Self {
        Self {
            experiment_type: config.experiment_type,
            config,
            served_experience: served_experience.into(),
            served_variant: None,
        }
    }

    /// With the variant actually rendered
    #[inline]
    #[must_use]
    pub fn with_served_variant(mut self, variant: impl Into<String>) -> Self {
        self.served_variant = Some(variant.into());
        self
    }

    /// Experiment id
    #[must_use]
    pub fn id(&self) -> &str {
        &self.config.id
    }
}

/// Shared, append-only list of experiments
#[derive(Debug, Clone, Default)]
pub struct ExperimentRegistry {
    entries: Arc<RwLock<Vec<AppliedExperiment>>>,
}

impl ExperimentRegistry {
    /// Create empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn append(&self, entry: AppliedExperiment) {
        self.entries.write().push(entry);
    }

    /// Snapshot of all entries
    #[must_use]
    pub fn experiments(&self) -> Vec<AppliedExperiment> {
        self.entries.read().clone()
    }

    /// Entry for an experiment id
    #[must_use]
    pub fn find(&self, id: &str) -> Option<AppliedExperiment> {
        self.entries.read().iter().find(|e| e.id() == id).cloned()
    }

    /// Number of entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether nothing was recorded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// JSON array of entries
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(&*self.entries.read()).unwrap_or(serde_json::Value::Null)
    }
}

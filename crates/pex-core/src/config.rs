//! Engine configuration
//!
//! Names of request parameters, storage keys and emitted events, plus the
//! fetch bound. Serializable so hosts can keep it in a config file.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Query parameter carrying `id` or `id/variant` overrides
    pub experiment_query_parameter: String,
    /// Query parameter pairing a variant with a bare experiment override
    pub variant_query_parameter: String,
    /// Query parameter forcing an audience
    pub audience_query_parameter: String,
    /// Storage key of the consent flag
    pub consent_storage_key: String,
    /// Prefix of the per-experiment sticky assignment keys
    pub sticky_storage_prefix: String,
    /// Event name passed to telemetry sinks
    pub telemetry_event_name: String,
    /// Name of the DOM-visible event
    pub dom_event_name: String,
    /// Bound on manifest and content fetches, in milliseconds
    pub fetch_timeout_ms: u64,
    /// Suffix appended to a content path to fetch its plain markup
    pub plain_suffix: String,
}

impl EngineConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With fetch timeout
    #[inline]
    #[must_use]
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// With consent storage key
    #[inline]
    #[must_use]
    pub fn with_consent_key(mut self, key: impl Into<String>) -> Self {
        self.consent_storage_key = key.into();
        self
    }

    /// With sticky storage prefix
    #[inline]
    #[must_use]
    pub fn with_sticky_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.sticky_storage_prefix = prefix.into();
        self
    }

    /// Fetch bound as a duration
    #[inline]
    #[must_use]
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            experiment_query_parameter: "experiment".to_string(),
            variant_query_parameter: "experiment-variant".to_string(),
            audience_query_parameter: "audience".to_string(),
            consent_storage_key: "experimentation-consented".to_string(),
            sticky_storage_prefix: "experimentation_".to_string(),
            telemetry_event_name: "experiment".to_string(),
            dom_event_name: "aem:experimentation".to_string(),
            fetch_timeout_ms: 5_000,
            plain_suffix: ".plain.html".to_string(),
        }
    }
}

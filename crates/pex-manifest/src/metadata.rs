//! Parsed page and section metadata
//!
//! Keys are stored lowercase and trimmed. Lookups go through [`Metadata::first`]
//! so that legacy and pluralised key spellings resolve to the same value.

use crate::error::{ManifestError, ManifestResult};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Key declaring an experiment
pub const EXPERIMENT_KEY: &str = "experiment";

/// Legacy alias of [`EXPERIMENT_KEY`]
pub const LEGACY_EXPERIMENT_KEY: &str = "instant-experiment";

/// Ordered key/value metadata as read from `<meta>` tags or a section block
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "IndexMap<String, String>", into = "IndexMap<String, String>")]
pub struct Metadata {
    entries: IndexMap<String, String>,
}

impl Metadata {
    /// Create empty metadata
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry, normalising the key
    pub fn insert(&mut self, key: impl AsRef<str>, value: impl Into<String>) {
        self.entries
            .insert(normalize_key(key.as_ref()), value.into());
    }

    /// With an entry (builder style)
    #[must_use]
    pub fn with(mut self, key: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    /// Value for a key, if present
    #[inline]
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(&normalize_key(key)).map(String::as_str)
    }

    /// First present value among several key spellings
    #[must_use]
    pub fn first(&self, keys: &[&str]) -> Option<&str> {
        keys.iter().find_map(|k| self.get(k))
    }

    /// Iterate entries in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of entries
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no entries
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The declared experiment, honouring the legacy key
    #[must_use]
    pub fn experiment_declaration(&self) -> Option<&str> {
        self.first(&[EXPERIMENT_KEY, LEGACY_EXPERIMENT_KEY])
    }

    /// Comma separated list under any of `keys`, trimmed, keeping empty items
    #[must_use]
    pub fn list(&self, keys: &[&str]) -> Option<Vec<String>> {
        self.first(keys).map(split_list)
    }

    /// Boolean flag under any of `keys`
    #[must_use]
    pub fn flag(&self, keys: &[&str]) -> bool {
        self.first(keys).is_some_and(|v| {
            matches!(
                v.trim().to_ascii_lowercase().as_str(),
                "true" | "yes" | "on" | "1"
            )
        })
    }

    /// Date under `key`, `Ok(None)` when absent
    ///
    /// # Errors
    /// `ManifestError::InvalidDate` when present but unparsable
    pub fn date(&self, key: &str) -> ManifestResult<Option<DateTime<Utc>>> {
        match self.get(key).map(str::trim).filter(|v| !v.is_empty()) {
            None => Ok(None),
            Some(raw) => parse_date(raw)
                .map(Some)
                .ok_or_else(|| ManifestError::InvalidDate {
                    key: key.to_string(),
                    value: raw.to_string(),
                }),
        }
    }
}

impl From<IndexMap<String, String>> for Metadata {
    fn from(map: IndexMap<String, String>) -> Self {
        map.into_iter().collect()
    }
}

impl From<Metadata> for IndexMap<String, String> {
    fn from(meta: Metadata) -> Self {
        meta.entries
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for Metadata {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut meta = Self::new();
        for (k, v) in iter {
            meta.insert(k, v);
        }
        meta
    }
}

/// Lowercase, trim, and turn inner whitespace into dashes
#[must_use]
pub fn normalize_key(key: &str) -> String {
    key.trim()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
        .to_ascii_lowercase()
}

/// Turn an arbitrary string into a CSS class token
///
/// Lowercases, maps every run of non-alphanumerics to a single dash and
/// trims leading/trailing dashes.
#[must_use]
pub fn to_class_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_dash = false;
    for c in raw.chars() {
        if c.is_alphanumeric() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.extend(c.to_lowercase());
        } else {
            pending_dash = true;
        }
    }
    out
}

/// Split a comma separated list, trimming items
#[must_use]
pub fn split_list(raw: &str) -> Vec<String> {
    if raw.trim().is_empty() {
        return Vec::new();
    }
    raw.split(',').map(|s| s.trim().to_string()).collect()
}

/// Parse an authored date: RFC 3339, `YYYY-MM-DD HH:MM[:SS]` or `YYYY-MM-DD` (UTC)
#[must_use]
pub fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

//! Core experiment types
//!
//! Defines:
//! - Experiment scope, status and resolution style
//! - Per-variant configuration and its content source
//! - The experiment configuration shared with host code

use crate::split::Split;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Id of the implicit variant serving the page's own content
pub const CONTROL: &str = "control";

/// Granularity at which an experiment replaces content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExperimentType {
    /// Whole page
    Page,
    /// One section of the page
    Section,
    /// An embedded fragment mount point
    Fragment,
}

impl fmt::Display for ExperimentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Page => "page",
            Self::Section => "section",
            Self::Fragment => "fragment",
        })
    }
}

/// Authoring status of an experiment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExperimentStatus {
    /// Eligible to run
    #[default]
    Active,
    /// Switched off
    Inactive,
    /// Still being authored
    Draft,
}

impl ExperimentStatus {
    /// Lenient parse of an authored status value
    ///
    /// `active`/`on`/`true` are active, `draft` is draft, anything else is
    /// inactive.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "active" | "on" | "true" => Self::Active,
            "draft" => Self::Draft,
            _ => Self::Inactive,
        }
    }

    /// Whether the status allows the experiment to run
    #[inline]
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(self, Self::Active)
    }
}

/// How a page-scope challenger is served
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    /// Swap the page content in place
    #[default]
    Inline,
    /// Navigate the browser to the variant path
    Redirect,
}

/// Where a variant's content comes from
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VariantSource {
    /// The page's own content
    Control,
    /// Same content as the page, behaviour driven by the applied classes
    Code,
    /// Content published at a site path
    Path(String),
    /// Markup already at hand, no fetch needed
    Inline(String),
    /// An authored reference that could not be resolved; served as control
    Invalid(String),
}

impl VariantSource {
    /// Whether serving this source replaces content
    #[inline]
    #[must_use]
    pub fn substitutes_content(&self) -> bool {
        matches!(self, Self::Path(_) | Self::Inline(_))
    }
}

/// One candidate within an experiment
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantConfig {
    /// Human readable label, defaults to the variant id
    pub label: String,
    /// Authored content reference, or the page path for control
    pub url: String,
    /// Share of traffic
    pub percentage_split: Split,
    /// Fragment mount point this variant targets
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    /// Resolved content source
    #[serde(skip)]
    pub source: VariantSource,
}

impl VariantConfig {
    /// Create variant with a label and source, split filled in later
    #[must_use]
    pub fn new(label: impl Into<String>, url: impl Into<String>, source: VariantSource) -> Self {
        Self {
            label: label.into(),
            url: url.into(),
            percentage_split: Split::default(),
            source,
            selector: None,
        }
    }

    /// With fragment selector
    #[inline]
    #[must_use]
    pub fn with_selector(mut self, selector: Option<String>) -> Self {
        self.selector = selector;
        self
    }
}

/// Full configuration of one experiment on the page
///
/// Built by the manifest parsers with `run == false` and no selection; the
/// engine produces the final, immutable copy once a variant is chosen.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentConfig {
    /// Experiment id, unique per page
    pub id: String,
    /// Scope of the experiment
    #[serde(rename = "type")]
    pub experiment_type: ExperimentType,
    /// Human readable label
    pub label: String,
    /// Authoring status
    pub status: ExperimentStatus,
    /// Whether the experiment passed every gate and was served
    pub run: bool,
    /// Goal tag, e.g. `conversion`
    pub optimizing_target: String,
    /// Preview image reference
    pub thumbnail: Option<String>,
    /// Whether visitor opt-in is needed
    pub requires_consent: bool,
    /// Experiment inactive before this instant
    pub start_date: Option<DateTime<Utc>>,
    /// Experiment inactive from this instant on
    pub end_date: Option<DateTime<Utc>>,
    /// Audience names, any of which makes the visitor eligible
    pub audiences: Vec<String>,
    /// Serving style for page-scope challengers
    pub resolution: Resolution,
    /// Variants in authoring order, `control` first
    pub variants: IndexMap<String, VariantConfig>,
    /// Variant chosen for this visitor
    pub selected_variant: Option<String>,
    /// Content path actually rendered
    pub served_experience: Option<String>,
}

impl ExperimentConfig {
    /// Look up a variant by id
    #[inline]
    #[must_use]
    pub fn variant(&self, id: &str) -> Option<&VariantConfig> {
        self.variants.get(id)
    }

    /// Whether a variant id exists in this experiment
    #[inline]
    #[must_use]
    pub fn has_variant(&self, id: &str) -> bool {
        self.variants.contains_key(id)
    }

    /// Variant ids in authoring order
    pub fn variant_ids(&self) -> impl Iterator<Item = &str> {
        self.variants.keys().map(String::as_str)
    }

    /// Fragment mount point: the first selector any variant names
    #[must_use]
    pub fn mount_selector(&self) -> Option<&str> {
        self.variants.values().find_map(|v| v.selector.as_deref())
    }

    /// Whether `now` lies within `[start_date, end_date)`
    #[must_use]
    pub fn is_within_window(&self, now: DateTime<Utc>) -> bool {
        self.start_date.map_or(true, |start| start <= now)
            && self.end_date.map_or(true, |end| now < end)
    }

    /// Cumulative split boundaries in authoring order
    #[must_use]
    pub fn cumulative_splits(&self) -> Vec<(&str, u32)> {
        let mut acc = 0;
        self.variants
            .iter()
            .map(|(id, v)| {
                acc += v.percentage_split.basis_points();
                (id.as_str(), acc)
            })
            .collect()
    }
}

//! Experiment-level settings shared by inline and sheet manifests
//!
//! Everything that is not a variant: label, status, schedule, audiences,
//! consent requirement, optimizing target and resolution style.

use crate::error::{ManifestError, ManifestResult};
use crate::metadata::Metadata;
use crate::split;
use crate::types::{
    ExperimentConfig, ExperimentStatus, ExperimentType, Resolution, VariantConfig, VariantSource,
    CONTROL,
};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use url::Url;

/// Goal tag used when none is authored
pub const DEFAULT_OPTIMIZING_TARGET: &str = "conversion";

/// Where the manifest is being read and for which scope
#[derive(Debug, Clone, Copy)]
pub struct ParseContext<'a> {
    /// URL of the page being resolved
    pub page_url: &'a Url,
    /// Scope given to variants that do not name a fragment selector
    pub experiment_type: ExperimentType,
    /// Page thumbnail (`og:image`)
    pub thumbnail: Option<&'a str>,
}

impl<'a> ParseContext<'a> {
    /// Create context for a scope
    #[must_use]
    pub fn new(page_url: &'a Url, experiment_type: ExperimentType) -> Self {
        Self {
            page_url,
            experiment_type,
            thumbnail: None,
        }
    }

    /// With thumbnail
    #[must_use]
    pub fn with_thumbnail(mut self, thumbnail: Option<&'a str>) -> Self {
        self.thumbnail = thumbnail;
        self
    }

    /// Path of the page being resolved
    #[inline]
    #[must_use]
    pub fn page_path(&self) -> &str {
        self.page_url.path()
    }

    /// Resolve an authored variant reference into a content source
    ///
    /// - Empty or unparsable references, and references to another origin,
    ///   are [`VariantSource::Invalid`].
    /// - A reference to the page itself is a [`VariantSource::Code`] variant.
    #[must_use]
    pub fn resolve_reference(&self, raw: &str) -> VariantSource {
        match self.try_resolve_reference(raw) {
            Ok(source) => source,
            Err(err) => {
                tracing::warn!("{err}");
                VariantSource::Invalid(raw.to_string())
            }
        }
    }

    fn try_resolve_reference(&self, raw: &str) -> ManifestResult<VariantSource> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ManifestError::invalid_variant_url(raw, "empty reference"));
        }
        let resolved = self
            .page_url
            .join(trimmed)
            .map_err(|e| ManifestError::invalid_variant_url(raw, e.to_string()))?;
        if resolved.origin() != self.page_url.origin() {
            return Err(ManifestError::invalid_variant_url(raw, "different origin"));
        }
        let path = resolved.path().to_string();
        if path == self.page_path() {
            Ok(VariantSource::Code)
        } else {
            Ok(VariantSource::Path(path))
        }
    }
}

/// Experiment-level fields read from the declaring metadata
#[derive(Debug, Clone, PartialEq)]
pub struct ExperimentHeader {
    /// Explicit label, if authored
    pub label: Option<String>,
    /// Authoring status
    pub status: ExperimentStatus,
    /// Window start
    pub start_date: Option<DateTime<Utc>>,
    /// Window end (exclusive)
    pub end_date: Option<DateTime<Utc>>,
    /// Audience names
    pub audiences: Vec<String>,
    /// Consent requirement
    pub requires_consent: bool,
    /// Goal tag
    pub optimizing_target: String,
    /// Serving style
    pub resolution: Resolution,
}

impl Default for ExperimentHeader {
    fn default() -> Self {
        Self {
            label: None,
            status: ExperimentStatus::Active,
            start_date: None,
            end_date: None,
            audiences: Vec::new(),
            requires_consent: false,
            optimizing_target: DEFAULT_OPTIMIZING_TARGET.to_string(),
            resolution: Resolution::Inline,
        }
    }
}

impl ExperimentHeader {
    /// Read the header from metadata
    ///
    /// The legacy bare `audience` key is an alias for `experiment-audience`.
    ///
    /// # Errors
    /// `ManifestError::InvalidDate` when a schedule date cannot be parsed
    pub fn from_metadata(meta: &Metadata) -> ManifestResult<Self> {
        let audiences = meta
            .list(&["experiment-audiences", "experiment-audience", "audience"])
            .unwrap_or_default()
            .into_iter()
            .filter(|a| !a.is_empty())
            .collect();

        let resolution = match meta.get("experiment-resolution").map(str::trim) {
            Some(r) if r.eq_ignore_ascii_case("redirect") => Resolution::Redirect,
            _ => Resolution::Inline,
        };

        Ok(Self {
            label: meta
                .get("experiment-label")
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string),
            status: meta
                .get("experiment-status")
                .map_or(ExperimentStatus::Active, ExperimentStatus::parse),
            start_date: meta.date("experiment-start-date")?,
            end_date: meta.date("experiment-end-date")?,
            audiences,
            requires_consent: meta.flag(&["experiment-requires-consent"]),
            optimizing_target: meta
                .get("experiment-optimizing-target")
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .unwrap_or(DEFAULT_OPTIMIZING_TARGET)
                .to_string(),
            resolution,
        })
    }

    /// Assemble a config from this header and authored variants
    ///
    /// `variants` must not contain `control`; it is added first. `control_split`
    /// is the authored control share, if any. Returns `None` when there is no
    /// challenger, since such an experiment has nothing to test.
    #[must_use]
    pub fn build(
        &self,
        id: &str,
        ctx: &ParseContext<'_>,
        control: Option<(VariantConfig, Option<split::Split>)>,
        challengers: Vec<(String, VariantConfig, Option<split::Split>)>,
    ) -> Option<ExperimentConfig> {
        if challengers.is_empty() {
            return None;
        }

        let (control, control_split) = control.unwrap_or_else(|| {
            (
                VariantConfig::new(CONTROL, ctx.page_path(), VariantSource::Control),
                None,
            )
        });

        let mut authored = Vec::with_capacity(challengers.len() + 1);
        authored.push(control_split);
        authored.extend(challengers.iter().map(|(_, _, s)| *s));
        let splits = split::allocate(&authored);

        let mut variants = IndexMap::with_capacity(splits.len());
        variants.insert(CONTROL.to_string(), control);
        for (vid, variant, _) in challengers {
            variants.insert(vid, variant);
        }
        for (variant, share) in variants.values_mut().zip(splits) {
            variant.percentage_split = share;
        }

        Some(ExperimentConfig {
            id: id.to_string(),
            experiment_type: ctx.experiment_type,
            label: self
                .label
                .clone()
                .unwrap_or_else(|| format!("Experiment {id}")),
            status: self.status,
            run: false,
            optimizing_target: self.optimizing_target.clone(),
            thumbnail: ctx.thumbnail.map(str::to_string),
            requires_consent: self.requires_consent,
            start_date: self.start_date,
            end_date: self.end_date,
            audiences: self.audiences.clone(),
            resolution: self.resolution,
            variants,
            selected_variant: None,
            served_experience: None,
        })
    }
}

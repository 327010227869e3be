//! Request-level overrides
//!
//! - `experiment=<id>` or `experiment=<id>/<variant>`, repeatable; the last
//!   occurrence of an id wins
//! - `experiment-variant=<variant>`, paired with bare `experiment=<id>` values
//! - `audience=<name>`, forcing an audience
//!
//! Parameter names come from [`EngineConfig`].

use crate::config::EngineConfig;
use crate::error::ReferenceError;
use indexmap::IndexMap;
use pex_manifest::ExperimentConfig;
use url::Url;

/// Overrides parsed from a page URL
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    experiments: IndexMap<String, Option<String>>,
    audience: Option<String>,
}

impl Overrides {
    /// Parse the query string of `url`
    #[must_use]
    pub fn from_url(url: &Url, config: &EngineConfig) -> Self {
        let mut experiments: IndexMap<String, Option<String>> = IndexMap::new();
        let mut paired_variant = None;
        let mut audience = None;

        for (key, value) in url.query_pairs() {
            let value = value.trim();
            if key == config.experiment_query_parameter.as_str() {
                let (id, variant) = match value.split_once('/') {
                    Some((id, variant)) => (id.trim(), Some(variant.trim())),
                    None => (value, None),
                };
                if id.is_empty() {
                    continue;
                }
                // re-insert so that the last occurrence also decides order
                experiments.shift_remove(id);
                experiments.insert(
                    id.to_string(),
                    variant.filter(|v| !v.is_empty()).map(str::to_string),
                );
            } else if key == config.variant_query_parameter.as_str() && !value.is_empty() {
                paired_variant = Some(value.to_string());
            } else if key == config.audience_query_parameter.as_str() && !value.is_empty() {
                audience = Some(value.to_string());
            }
        }

        if let Some(variant) = paired_variant {
            for slot in experiments.values_mut().filter(|v| v.is_none()) {
                *slot = Some(variant.clone());
            }
        }

        Self {
            experiments,
            audience,
        }
    }

    /// Whether no override was given
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.experiments.is_empty() && self.audience.is_none()
    }

    /// Forced audience, if any
    #[must_use]
    pub fn audience(&self) -> Option<&str> {
        self.audience.as_deref()
    }

    /// Experiment ids named by overrides
    pub fn experiment_ids(&self) -> impl Iterator<Item = &str> {
        self.experiments.keys().map(String::as_str)
    }

    /// Raw variant requested for an experiment id
    #[must_use]
    pub fn requested_variant(&self, experiment_id: &str) -> Option<&str> {
        self.experiments
            .get(experiment_id)
            .and_then(Option::as_deref)
    }

    /// Validated variant override for an experiment
    ///
    /// `Ok(None)` when no variant is requested for this experiment.
    ///
    /// # Errors
    /// `ReferenceError::UnknownVariant` when the requested variant does not exist
    pub fn variant_for(&self, config: &ExperimentConfig) -> Result<Option<String>, ReferenceError> {
        match self.requested_variant(&config.id) {
            None => Ok(None),
            Some(variant) if config.has_variant(variant) => Ok(Some(variant.to_string())),
            Some(variant) => Err(ReferenceError::UnknownVariant {
                experiment: config.id.clone(),
                variant: variant.to_string(),
            }),
        }
    }
}

//! Variant selection
//!
//! Order of precedence for a runnable experiment:
//! 1. A variant override naming a known variant
//! 2. The visitor's sticky assignment, if it still names a known variant
//! 3. A weighted draw over the cumulative splits, recorded as the new
//!    sticky assignment
//!
//! Overrides are a per-request view and never touch the sticky store.

use crate::error::Ineligibility;
use crate::store::StickyAssignments;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use pex_manifest::{ExperimentConfig, CONTROL, TOTAL_BASIS_POINTS};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Why a variant was chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionReason {
    /// Forced by a request parameter
    Override,
    /// Reused from an earlier visit
    Sticky,
    /// Freshly drawn
    Drawn,
}

/// Outcome of selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    /// Selected variant id
    pub variant: String,
    /// How it was chosen
    pub reason: SelectionReason,
}

/// Status and time window check
///
/// A variant override bypasses the status check but never the window.
///
/// # Errors
/// `Ineligibility::NotActive`, `NotStarted` or `Ended`
pub fn check_schedule(
    config: &ExperimentConfig,
    now: DateTime<Utc>,
    forced: bool,
) -> Result<(), Ineligibility> {
    if !forced && !config.status.is_active() {
        return Err(Ineligibility::NotActive(config.status));
    }
    if config.start_date.is_some_and(|start| now < start) {
        return Err(Ineligibility::NotStarted);
    }
    if config.end_date.is_some_and(|end| end <= now) {
        return Err(Ineligibility::Ended);
    }
    Ok(())
}

/// Variant whose cumulative boundary first exceeds `draw`
///
/// `draw` is in basis points, `0..10_000`. Falls back to control if the
/// splits do not cover the draw.
#[must_use]
pub fn pick_weighted(config: &ExperimentConfig, draw: u32) -> &str {
    config
        .cumulative_splits()
        .into_iter()
        .find(|&(_, boundary)| draw < boundary)
        .map_or(CONTROL, |(id, _)| id)
}

/// Sticky weighted selector
pub struct VariantSelector {
    rng: Mutex<StdRng>,
    sticky: StickyAssignments,
}

impl std::fmt::Debug for VariantSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VariantSelector")
            .field("sticky", &self.sticky)
            .finish_non_exhaustive()
    }
}

impl VariantSelector {
    /// Create selector with entropy-seeded randomness
    #[must_use]
    pub fn new(sticky: StickyAssignments) -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
            sticky,
        }
    }

    /// Create selector with a fixed seed
    #[must_use]
    pub fn with_seed(sticky: StickyAssignments, seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            sticky,
        }
    }

    /// Uniform draw in basis points
    fn draw(&self) -> u32 {
        self.rng.lock().gen_range(0..TOTAL_BASIS_POINTS)
    }

    /// Select a variant for a runnable experiment
    ///
    /// `forced` must already be validated against the config.
    pub fn select(&self, config: &ExperimentConfig, forced: Option<&str>) -> Selection {
        if let Some(variant) = forced {
            tracing::debug!(experiment = %config.id, variant, "variant forced by override");
            return Selection {
                variant: variant.to_string(),
                reason: SelectionReason::Override,
            };
        }

        if let Some(stored) = self.sticky.get(&config.id) {
            if config.has_variant(&stored) {
                tracing::debug!(experiment = %config.id, variant = %stored, "reusing sticky assignment");
                return Selection {
                    variant: stored,
                    reason: SelectionReason::Sticky,
                };
            }
            tracing::debug!(experiment = %config.id, variant = %stored, "stale sticky assignment");
        }

        let draw = self.draw();
        let variant = pick_weighted(config, draw).to_string();
        tracing::debug!(experiment = %config.id, draw, variant = %variant, "variant drawn");
        self.sticky.record(&config.id, &variant);
        Selection {
            variant,
            reason: SelectionReason::Drawn,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{KeyValueStore, MemoryStore};
    use chrono::{Duration, TimeZone};
    use indexmap::IndexMap;
    use pex_manifest::{
        allocate, ExperimentStatus, ExperimentType, Resolution, VariantConfig, VariantSource,
    };
    use proptest::prelude::*;
    use std::sync::Arc;

    fn config(ids: &[&str]) -> ExperimentConfig {
        let splits = allocate(&vec![None; ids.len()]);
        let variants: IndexMap<String, VariantConfig> = ids
            .iter()
            .zip(splits)
            .map(|(id, split)| {
                let mut v = VariantConfig::new(*id, format!("/{id}"), VariantSource::Code);
                v.percentage_split = split;
                ((*id).to_string(), v)
            })
            .collect();
        ExperimentConfig {
            id: "foo".into(),
            experiment_type: ExperimentType::Page,
            label: "Experiment foo".into(),
            status: ExperimentStatus::Active,
            run: false,
            optimizing_target: "conversion".into(),
            thumbnail: None,
            requires_consent: false,
            start_date: None,
            end_date: None,
            audiences: Vec::new(),
            resolution: Resolution::Inline,
            variants,
            selected_variant: None,
            served_experience: None,
        }
    }

    fn selector(seed: u64) -> (Arc<MemoryStore>, VariantSelector) {
        let store = Arc::new(MemoryStore::new());
        let sticky = StickyAssignments::new(store.clone(), "experimentation_");
        (store, VariantSelector::with_seed(sticky, seed))
    }

    #[test]
    fn weighted_pick_uses_cumulative_boundaries() {
        let cfg = config(&[CONTROL, "challenger-1", "challenger-2"]);
        // 3334 / 3333 / 3333
        assert_eq!(pick_weighted(&cfg, 0), CONTROL);
        assert_eq!(pick_weighted(&cfg, 3333), CONTROL);
        assert_eq!(pick_weighted(&cfg, 3334), "challenger-1");
        assert_eq!(pick_weighted(&cfg, 6666), "challenger-1");
        assert_eq!(pick_weighted(&cfg, 6667), "challenger-2");
        assert_eq!(pick_weighted(&cfg, 9999), "challenger-2");
    }

    #[test]
    fn draws_are_sticky() {
        let (store, selector) = selector(7);
        let cfg = config(&[CONTROL, "challenger-1", "challenger-2"]);
        let first = selector.select(&cfg, None);
        assert_eq!(first.reason, SelectionReason::Drawn);
        assert_eq!(
            store.get("experimentation_foo").unwrap(),
            Some(first.variant.clone())
        );
        for _ in 0..20 {
            let again = selector.select(&cfg, None);
            assert_eq!(again.variant, first.variant);
            assert_eq!(again.reason, SelectionReason::Sticky);
        }
    }

    #[test]
    fn overrides_do_not_touch_sticky_store() {
        let (store, selector) = selector(1);
        let cfg = config(&[CONTROL, "challenger-1"]);
        store.set("experimentation_foo", CONTROL).unwrap();

        let forced = selector.select(&cfg, Some("challenger-1"));
        assert_eq!(forced.variant, "challenger-1");
        assert_eq!(forced.reason, SelectionReason::Override);
        assert_eq!(
            store.get("experimentation_foo").unwrap().as_deref(),
            Some(CONTROL)
        );
        assert_eq!(selector.select(&cfg, None).variant, CONTROL);
    }

    #[test]
    fn stale_sticky_is_redrawn() {
        let (store, selector) = selector(3);
        let cfg = config(&[CONTROL, "challenger-1"]);
        store.set("experimentation_foo", "challenger-9").unwrap();
        let selection = selector.select(&cfg, None);
        assert_eq!(selection.reason, SelectionReason::Drawn);
        assert!(cfg.has_variant(&selection.variant));
    }

    #[test]
    fn schedule_gates() {
        let now = Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap();
        let mut cfg = config(&[CONTROL, "challenger-1"]);
        assert!(check_schedule(&cfg, now, false).is_ok());

        cfg.status = ExperimentStatus::Inactive;
        assert_eq!(
            check_schedule(&cfg, now, false),
            Err(Ineligibility::NotActive(ExperimentStatus::Inactive))
        );
        assert!(check_schedule(&cfg, now, true).is_ok());

        cfg.start_date = Some(now + Duration::days(1));
        assert_eq!(check_schedule(&cfg, now, true), Err(Ineligibility::NotStarted));

        cfg.start_date = Some(now - Duration::days(1));
        assert!(check_schedule(&cfg, now, true).is_ok());

        cfg.end_date = Some(now - Duration::seconds(1));
        assert_eq!(check_schedule(&cfg, now, true), Err(Ineligibility::Ended));
    }

    #[test]
    fn draws_cover_every_variant() {
        let cfg = config(&[CONTROL, "challenger-1", "challenger-2"]);
        let mut seen = std::collections::HashSet::new();
        for seed in 0..200 {
            let (_, selector) = selector(seed);
            seen.insert(selector.select(&cfg, None).variant);
        }
        assert_eq!(seen.len(), 3);
    }

    proptest! {
        #[test]
        fn pick_always_returns_a_known_variant(n in 1usize..8, draw in 0u32..TOTAL_BASIS_POINTS) {
            let ids: Vec<String> = std::iter::once(CONTROL.to_string())
                .chain((1..n).map(|i| format!("challenger-{i}")))
                .collect();
            let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
            let cfg = config(&refs);
            prop_assert!(cfg.has_variant(pick_weighted(&cfg, draw)));
        }
    }
}

//! `pex simulate`: draw many fresh visitors against one split

use anyhow::{ensure, Context};
use pex_core::{MemoryStore, StickyAssignments, VariantSelector};
use pex_manifest::{parse_inline, ExperimentType, Metadata, ParseContext};
use serde::Serialize;
use std::sync::Arc;
use url::Url;

/// Experiment id used for simulated draws
pub const SIMULATED_EXPERIMENT: &str = "simulation";

/// Simulation parameters
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Number of challengers besides control
    pub challengers: usize,
    /// Authored challenger percentages; control takes the remainder
    pub splits: Vec<String>,
    /// Visitors to draw
    pub visitors: u64,
    /// Random seed for reproducibility
    pub seed: u64,
}

/// Observed share of one variant
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimulationRow {
    /// Variant id
    pub variant: String,
    /// Configured fraction of traffic
    pub configured: f64,
    /// Visitors assigned
    pub count: u64,
    /// Observed fraction of traffic
    pub observed: f64,
}

/// Distribution observed over a simulation
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    /// Visitors drawn
    pub visitors: u64,
    /// Seed used
    pub seed: u64,
    /// One row per variant in authoring order
    pub rows: Vec<SimulationRow>,
}

impl SimulationReport {
    /// Largest absolute gap between observed and configured share
    #[must_use]
    pub fn max_deviation(&self) -> f64 {
        self.rows
            .iter()
            .map(|r| (r.observed - r.configured).abs())
            .fold(0.0, f64::max)
    }

    /// Plain text table
    #[must_use]
    pub fn generate_text(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("Visitors: {}  Seed: {}\n", self.visitors, self.seed));
        out.push_str(&format!(
            "{:<16} {:>10} {:>10} {:>10}\n",
            "variant", "configured", "observed", "count"
        ));
        for row in &self.rows {
            out.push_str(&format!(
                "{:<16} {:>9.2}% {:>9.2}% {:>10}\n",
                row.variant,
                row.configured * 100.0,
                row.observed * 100.0,
                row.count
            ));
        }
        out.push_str(&format!(
            "Max deviation: {:.2}%\n",
            self.max_deviation() * 100.0
        ));
        out
    }
}

/// Draw `visitors` first-time visitors and tally their variants
///
/// # Errors
/// When there are no challengers or no visitors, or the split does not parse
pub fn run_simulation(config: &SimulatorConfig) -> anyhow::Result<SimulationReport> {
    ensure!(config.challengers > 0, "at least one challenger is required");
    ensure!(config.visitors > 0, "at least one visitor is required");

    let url = Url::parse("https://localhost/simulation").context("simulation page url")?;
    let variants: Vec<String> = (1..=config.challengers)
        .map(|i| format!("/simulation-v{i}"))
        .collect();
    let mut meta = Metadata::new()
        .with("experiment", SIMULATED_EXPERIMENT)
        .with("experiment-variants", variants.join(", "));
    if !config.splits.is_empty() {
        meta = meta.with("experiment-split", config.splits.join(", "));
    }
    let ctx = ParseContext::new(&url, ExperimentType::Page);
    let experiment = parse_inline(SIMULATED_EXPERIMENT, &meta, &ctx)?
        .context("simulated experiment has no variants")?;

    let store = Arc::new(MemoryStore::new());
    let selector = VariantSelector::with_seed(
        StickyAssignments::new(store.clone(), "simulation_"),
        config.seed,
    );

    let mut counts: indexmap::IndexMap<&str, u64> =
        experiment.variant_ids().map(|id| (id, 0)).collect();
    for _ in 0..config.visitors {
        store.clear();
        let selection = selector.select(&experiment, None);
        if let Some(count) = counts.get_mut(selection.variant.as_str()) {
            *count += 1;
        }
    }

    #[allow(clippy::cast_precision_loss)]
    let total = config.visitors as f64;
    let rows = experiment
        .variants
        .iter()
        .map(|(id, variant)| {
            let count = counts.get(id.as_str()).copied().unwrap_or(0);
            #[allow(clippy::cast_precision_loss)]
            let observed = count as f64 / total;
            SimulationRow {
                variant: id.clone(),
                configured: variant.percentage_split.as_fraction(),
                count,
                observed,
            }
        })
        .collect();

    tracing::debug!(visitors = config.visitors, seed = config.seed, "simulation finished");
    Ok(SimulationReport {
        visitors: config.visitors,
        seed: config.seed,
        rows,
    })
}

//! `pex resolve`: one page load against a site on disk

use crate::site::{FsContentSource, PageFile};
use crate::store::JsonFileStore;
use anyhow::Context;
use parking_lot::Mutex;
use pex_core::{
    ElementRef, Engine, EngineConfig, KeyValueStore, MemoryStore,
    StaticAudienceRegistry, TelemetryPayload, TelemetrySink,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use url::Url;

/// Origin the page is served from
pub const DEFAULT_ORIGIN: &str = "https://localhost";

/// Inputs of one resolution
#[derive(Debug, Clone)]
pub struct ResolveOptions {
    /// Site root directory
    pub site: PathBuf,
    /// Page path, e.g. `/blog/post`
    pub path: String,
    /// Query string, with or without the leading `?`
    pub query: Option<String>,
    /// Visitor store file; in-memory when absent
    pub store: Option<PathBuf>,
    /// Engine configuration
    pub config: EngineConfig,
    /// Record a consent grant before resolving
    pub grant_consent: bool,
    /// Audiences the visitor belongs to
    pub audiences: Vec<String>,
    /// Fixed seed for variant draws
    pub seed: Option<u64>,
}

impl ResolveOptions {
    /// Options for `path` under `site` with defaults elsewhere
    #[must_use]
    pub fn new(site: impl Into<PathBuf>, path: impl Into<String>) -> Self {
        Self {
            site: site.into(),
            path: path.into(),
            query: None,
            store: None,
            config: EngineConfig::default(),
            grant_consent: false,
            audiences: Vec::new(),
            seed: None,
        }
    }

    /// Request URL of the page
    ///
    /// # Errors
    /// When path and query do not form a URL
    pub fn url(&self) -> anyhow::Result<Url> {
        let path = if self.path.starts_with('/') {
            self.path.clone()
        } else {
            format!("/{}", self.path)
        };
        let query = match self.query.as_deref().map(|q| q.trim_start_matches('?')) {
            Some(q) if !q.is_empty() => format!("?{q}"),
            _ => String::new(),
        };
        Url::parse(&format!("{DEFAULT_ORIGIN}{path}{query}"))
            .with_context(|| format!("invalid page path {path}{query}"))
    }
}

/// One telemetry call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TelemetryRecord {
    /// Event name
    pub event: String,
    /// Experiment id
    pub source: String,
    /// Served variant id
    pub target: String,
}

/// Telemetry sink keeping calls for the report
#[derive(Debug, Default)]
pub struct CollectingTelemetry {
    calls: Mutex<Vec<TelemetryRecord>>,
}

impl CollectingTelemetry {
    /// Calls in order
    #[must_use]
    pub fn calls(&self) -> Vec<TelemetryRecord> {
        self.calls.lock().clone()
    }
}

impl TelemetrySink for CollectingTelemetry {
    fn record(&self, event: &str, payload: &TelemetryPayload) {
        self.calls.lock().push(TelemetryRecord {
            event: event.to_string(),
            source: payload.source.clone(),
            target: payload.target.clone(),
        });
    }
}

/// Gate that kept an experiment from running
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GatedRecord {
    /// Experiment id
    pub experiment: String,
    /// Human readable reason
    pub reason: String,
}

/// What the page load did
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveOutput {
    /// Request URL
    pub url: String,
    /// Registry JSON
    pub experiments: serde_json::Value,
    /// Telemetry calls in order
    pub telemetry: Vec<TelemetryRecord>,
    /// Experiments held back by a gate
    pub gated: Vec<GatedRecord>,
    /// Declarations and experiments that could not be used
    pub dropped: Vec<String>,
    /// Navigation target of a redirect experiment
    pub navigation: Option<String>,
    /// Classes on the body after the load
    pub body_classes: Vec<String>,
    /// Main container markup after the load
    pub main: Option<String>,
}

/// Load the page, resolve its experiments and report the outcome
///
/// # Errors
/// I/O and parse failures of the page file or the visitor store
pub async fn resolve(options: &ResolveOptions) -> anyhow::Result<ResolveOutput> {
    let url = options.url()?;
    let page_file = PageFile::load(&options.site, url.path()).await?;
    let page = page_file.context(url.clone());
    let document = Arc::new(page_file.document());

    let store: Arc<dyn KeyValueStore> = match &options.store {
        Some(path) => Arc::new(JsonFileStore::open(path)?),
        None => Arc::new(MemoryStore::new()),
    };

    let audiences = options
        .audiences
        .iter()
        .fold(StaticAudienceRegistry::new(), |registry, name| {
            registry.with_sync(name.clone(), || true)
        });

    let telemetry = Arc::new(CollectingTelemetry::default());
    let mut builder = Engine::builder()
        .config(options.config.clone())
        .store(store)
        .audiences(Arc::new(audiences))
        .source(Arc::new(FsContentSource::new(&options.site)))
        .document(document.clone())
        .telemetry(telemetry.clone());
    if let Some(seed) = options.seed {
        builder = builder.seed(seed);
    }
    let engine = builder.build();

    if options.grant_consent {
        engine
            .consent()
            .update(true)
            .context("recording consent")?;
    }

    tracing::info!(url = %url, "resolving page");
    let report = engine.run(&page).await;

    Ok(ResolveOutput {
        url: url.to_string(),
        experiments: engine.registry().to_json(),
        telemetry: telemetry.calls(),
        gated: report
            .gated
            .iter()
            .map(|(experiment, reason)| GatedRecord {
                experiment: experiment.clone(),
                reason: reason.to_string(),
            })
            .collect(),
        dropped: report.dropped,
        navigation: report.navigation,
        body_classes: document.classes(&ElementRef::Body),
        main: document.content(&ElementRef::Main),
    })
}

/// Load an engine configuration file
///
/// # Errors
/// When the file cannot be read or is not valid TOML for [`EngineConfig`]
pub fn load_config(path: &Path) -> anyhow::Result<EngineConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
}


//! Testing utilities for PEX workspace
//!
//! Shared fakes, fixtures, and a harness wiring them into an engine.

#![allow(missing_docs)]

use async_trait::async_trait;
use parking_lot::Mutex;
use pex_core::{
    ContentSource, Document, ElementRef, Engine, EngineConfig, ExperimentationEvent, FetchError,
    Fetched, MemoryDocument, MemoryStore, NotificationSink, PageContext, PageLifetime, RunReport,
    StaticAudienceRegistry, TelemetryPayload, TelemetrySink,
};
use pex_manifest::Metadata;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub const ORIGIN: &str = "https://example.com";
pub const FIXTURES: &str = "/tests/fixtures/experiments";
pub const FRAGMENTS: &str = "/tests/fixtures/fragments";

// ---------------------------------------------------------------------------
// Content source
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum Response {
    Body(String),
    Redirected(String),
    Fail(FetchError),
}

#[derive(Debug, Default)]
pub struct ScriptedSource {
    responses: HashMap<String, Response>,
    delays: HashMap<String, Duration>,
    requests: Mutex<Vec<String>>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_body(mut self, path: impl Into<String>, body: impl Into<String>) -> Self {
        self.responses.insert(path.into(), Response::Body(body.into()));
        self
    }

    pub fn with_redirect(mut self, path: impl Into<String>, body: impl Into<String>) -> Self {
        self.responses
            .insert(path.into(), Response::Redirected(body.into()));
        self
    }

    pub fn with_failure(mut self, path: impl Into<String>, err: FetchError) -> Self {
        self.responses.insert(path.into(), Response::Fail(err));
        self
    }

    pub fn with_delay(mut self, path: impl Into<String>, delay: Duration) -> Self {
        self.delays.insert(path.into(), delay);
        self
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl ContentSource for ScriptedSource {
    async fn fetch(&self, path: &str) -> Result<Fetched, FetchError> {
        self.requests.lock().push(path.to_string());
        if let Some(delay) = self.delays.get(path) {
            tokio::time::sleep(*delay).await;
        }
        match self.responses.get(path) {
            Some(Response::Body(body)) => Ok(Fetched::ok(body.clone())),
            Some(Response::Redirected(body)) => Ok(Fetched::redirected(body.clone())),
            Some(Response::Fail(err)) => Err(err.clone()),
            None => Err(FetchError::NotFound(path.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Recording sinks and document
// ---------------------------------------------------------------------------

/// Ordered log shared by sinks and the document
#[derive(Debug, Clone, Default)]
pub struct Timeline(Arc<Mutex<Vec<String>>>);

impl Timeline {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }
}

#[derive(Debug, Default)]
pub struct RecordingTelemetry {
    timeline: Timeline,
    calls: Mutex<Vec<(String, TelemetryPayload)>>,
}

impl RecordingTelemetry {
    pub fn new(timeline: Timeline) -> Self {
        Self {
            timeline,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<(String, TelemetryPayload)> {
        self.calls.lock().clone()
    }
}

impl TelemetrySink for RecordingTelemetry {
    fn record(&self, event: &str, payload: &TelemetryPayload) {
        self.timeline
            .push(format!("telemetry:{}:{}", payload.source, payload.target));
        self.calls.lock().push((event.to_string(), payload.clone()));
    }
}

#[derive(Debug, Default)]
pub struct RecordingNotifications {
    timeline: Timeline,
    events: Mutex<Vec<(String, ExperimentationEvent)>>,
}

impl RecordingNotifications {
    pub fn new(timeline: Timeline) -> Self {
        Self {
            timeline,
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<(String, ExperimentationEvent)> {
        self.events.lock().clone()
    }
}

impl NotificationSink for RecordingNotifications {
    fn dispatch(&self, name: &str, event: &ExperimentationEvent) {
        self.timeline
            .push(format!("event:{}:{}", event.experiment, event.variant));
        self.events.lock().push((name.to_string(), event.clone()));
    }
}

/// Memory document that logs navigations to a timeline
#[derive(Debug)]
pub struct TimelineDocument {
    inner: MemoryDocument,
    timeline: Timeline,
}

impl TimelineDocument {
    pub fn new(inner: MemoryDocument, timeline: Timeline) -> Self {
        Self { inner, timeline }
    }

    pub fn inner(&self) -> &MemoryDocument {
        &self.inner
    }

    pub fn classes(&self, element: &ElementRef) -> Vec<String> {
        self.inner.classes(element)
    }

    pub fn content(&self, element: &ElementRef) -> String {
        self.inner.content(element).unwrap_or_default()
    }

    pub fn location(&self) -> Option<String> {
        self.inner.location()
    }
}

impl Document for TimelineDocument {
    fn has_element(&self, element: &ElementRef) -> bool {
        self.inner.has_element(element)
    }

    fn add_classes(&self, element: &ElementRef, classes: &[String]) -> bool {
        self.inner.add_classes(element, classes)
    }

    fn replace_content(&self, element: &ElementRef, markup: &str) -> bool {
        self.inner.replace_content(element, markup)
    }

    fn navigate(&self, path: &str) {
        self.timeline.push(format!("navigate:{path}"));
        self.inner.navigate(path);
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

/// One simulated page load
pub struct Harness {
    pub document: Arc<TimelineDocument>,
    pub source: Arc<ScriptedSource>,
    pub store: Arc<MemoryStore>,
    pub telemetry: Arc<RecordingTelemetry>,
    pub notifications: Arc<RecordingNotifications>,
    pub timeline: Timeline,
    pub audiences: StaticAudienceRegistry,
    pub lifetime: PageLifetime,
    pub config: EngineConfig,
}

impl Harness {
    pub fn new(document: MemoryDocument, source: ScriptedSource) -> Self {
        let timeline = Timeline::default();
        Self {
            document: Arc::new(TimelineDocument::new(document, timeline.clone())),
            source: Arc::new(source),
            store: Arc::new(MemoryStore::new()),
            telemetry: Arc::new(RecordingTelemetry::new(timeline.clone())),
            notifications: Arc::new(RecordingNotifications::new(timeline.clone())),
            timeline,
            audiences: StaticAudienceRegistry::new(),
            lifetime: PageLifetime::new(),
            config: EngineConfig::default(),
        }
    }

    /// Fresh page load sharing this visitor's storage
    pub fn reload(&self, document: MemoryDocument) -> Self {
        Self::new(document, site())
            .with_store(self.store.clone())
            .with_audiences(self.audiences.clone())
    }

    pub fn with_store(mut self, store: Arc<MemoryStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_audiences(mut self, audiences: StaticAudienceRegistry) -> Self {
        self.audiences = audiences;
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn grant_consent(&self) {
        use pex_core::KeyValueStore;
        self.store
            .set(&self.config.consent_storage_key, "true")
            .unwrap();
    }

    pub fn engine(&self, seed: u64) -> Engine {
        Engine::builder()
            .config(self.config.clone())
            .store(self.store.clone())
            .audiences(Arc::new(self.audiences.clone()))
            .source(self.source.clone())
            .document(self.document.clone())
            .telemetry(self.telemetry.clone())
            .notifications(self.notifications.clone())
            .lifetime(self.lifetime.clone())
            .seed(seed)
            .build()
    }

    pub async fn run(&self, page: &PageContext) -> (Engine, RunReport) {
        let engine = self.engine(0);
        let report = engine.run(page).await;
        (engine, report)
    }

    pub fn main(&self) -> String {
        self.document.content(&ElementRef::Main)
    }

    pub fn section(&self, index: usize) -> String {
        self.document.content(&ElementRef::Section(index))
    }

    pub fn fragment(&self) -> String {
        self.document.content(&fragment_mount())
    }

    pub fn body_classes(&self) -> Vec<String> {
        self.document.classes(&ElementRef::Body)
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub fn fixture_path(name: &str) -> String {
    format!("{FIXTURES}/{name}")
}

pub fn page_url(name: &str, query: &str) -> String {
    format!("{ORIGIN}{}{query}", fixture_path(name))
}

pub fn fragment_mount() -> ElementRef {
    ElementRef::Fragment(".fragment".into())
}

pub fn page_document() -> MemoryDocument {
    MemoryDocument::new().with_main("Hello World!")
}

pub fn section_document() -> MemoryDocument {
    MemoryDocument::new()
        .with_main("Hello World!")
        .with_section("Hello World!")
}

pub fn fragment_document() -> MemoryDocument {
    MemoryDocument::new()
        .with_main("Hello World!")
        .with_fragment(".fragment", "Hello World!")
}

fn manifest(rows: &[(&str, &str, &str)], plural: bool, label: &str) -> String {
    let keys = if plural {
        ["Experiments", "Variants", "Names", "Urls", "Selectors", "Labels"]
    } else {
        ["Experiment", "Variant", "Name", "Url", "Selector", "Label"]
    };
    let rows: Vec<serde_json::Value> = rows
        .iter()
        .enumerate()
        .map(|(i, (variant, name, url))| {
            let mut row = serde_json::Map::new();
            row.insert(keys[0].into(), "baz".into());
            row.insert(keys[1].into(), (*variant).into());
            row.insert(keys[2].into(), (*name).into());
            row.insert(keys[3].into(), (*url).into());
            row.insert(keys[4].into(), ".fragment".into());
            row.insert(keys[5].into(), if i == 0 { label.into() } else { "".into() });
            serde_json::Value::Object(row)
        })
        .collect();
    serde_json::json!({ "total": rows.len(), "data": rows }).to_string()
}

fn fragment_rows() -> Vec<(&'static str, &'static str, String)> {
    vec![
        ("control", "", format!("{FRAGMENTS}/default")),
        ("challenger-1", "V1", format!("{FRAGMENTS}/v1")),
        ("challenger-2", "V2", format!("{FRAGMENTS}/v2")),
    ]
}

fn fragment_manifest(plural: bool) -> String {
    let rows = fragment_rows();
    let borrowed: Vec<(&str, &str, &str)> = rows
        .iter()
        .map(|(v, n, u)| (*v, *n, u.as_str()))
        .collect();
    manifest(&borrowed, plural, "Experiment Baz")
}

/// Every published variant and manifest
pub fn site() -> ScriptedSource {
    ScriptedSource::new()
        .with_body(format!("{FIXTURES}/page-level-v1.plain.html"), "Hello v1!")
        .with_body(format!("{FIXTURES}/page-level-v2.plain.html"), "Hello v2!")
        .with_body(format!("{FIXTURES}/section-level-v1.plain.html"), "Hello v1!")
        .with_body(format!("{FIXTURES}/section-level-v2.plain.html"), "Hello v2!")
        .with_redirect(format!("{FIXTURES}/alias.plain.html"), "Hello alias!")
        .with_body(format!("{FRAGMENTS}/v1.plain.html"), "Hello v1!")
        .with_body(format!("{FRAGMENTS}/v2.plain.html"), "Hello v2!")
        .with_body(format!("{FIXTURES}/fragment-level.json"), fragment_manifest(false))
        .with_body(format!("{FIXTURES}/fragment-level--alt.json"), fragment_manifest(true))
}

/// Same site with slow fragment variants
pub fn slow_site(delay: Duration) -> ScriptedSource {
    site()
        .with_delay(format!("{FRAGMENTS}/v1.plain.html"), delay)
        .with_delay(format!("{FRAGMENTS}/v2.plain.html"), delay)
}

/// Head metadata of the page-level experiment `foo`
pub fn page_level_metadata() -> Metadata {
    Metadata::new()
        .with("experiment", "foo")
        .with(
            "experiment-variants",
            format!("{FIXTURES}/page-level-v1, {FIXTURES}/page-level-v2"),
        )
        .with("experiment-names", "V1, V2")
        .with("og:image", "/media/thumbnail.png")
}

pub fn page_level(query: &str) -> PageContext {
    page_with("page-level", page_level_metadata(), query)
}

pub fn page_with(name: &str, head: Metadata, query: &str) -> PageContext {
    PageContext::parse(&page_url(name, query))
        .unwrap()
        .with_head(head)
}

/// Section metadata of the section-level experiment `bar`
pub fn section_level_metadata() -> Metadata {
    Metadata::new().with("experiment", "bar").with(
        "experiment-variants",
        format!("{FIXTURES}/section-level-v1, {FIXTURES}/section-level-v2"),
    )
}

pub fn section_level(query: &str) -> PageContext {
    PageContext::parse(&page_url("section-level", query))
        .unwrap()
        .with_section(section_level_metadata())
}

pub fn fragment_level(query: &str) -> PageContext {
    fragment_page("fragment-level", &format!("{FIXTURES}/fragment-level.json"), query)
}

pub fn fragment_page(name: &str, manifest: &str, query: &str) -> PageContext {
    page_with(name, Metadata::new().with("experiment", manifest), query)
}

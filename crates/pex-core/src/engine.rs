//! Per-page resolution engine
//!
//! # Pipeline
//!
//! ```text
//! declarations ─→ manifests ─→ per experiment, concurrently:
//!     schedule ─→ audience ─→ consent ─→ select ─→ apply ─→ publish ─→ record
//! ```
//!
//! Within one experiment the stages run in order; different experiments may
//! interleave at their suspension points (manifest fetch, audience
//! predicate, variant content fetch). Nothing here fails the page: every
//! problem degrades to control content and is reported in the [`RunReport`].

use crate::applier::{Applied, Origin, ScopeApplier, Skipped, Target};
use crate::audience::{AudienceRegistry, AudienceResolver, StaticAudienceRegistry};
use crate::config::EngineConfig;
use crate::consent::{ConsentGate, ConsentSnapshot};
use crate::detect::is_experimentation_enabled;
use crate::error::{Ineligibility, ReferenceError, ResolveError};
use crate::events::{EventBus, NotificationSink, TelemetrySink};
use crate::loader::ContentLoader;
use crate::overrides::Overrides;
use crate::page::{ContentSource, Document, EmptySource, MemoryDocument, PageContext, PageLifetime};
use crate::registry::{AppliedExperiment, ExperimentRegistry};
use crate::selector::{check_schedule, VariantSelector};
use crate::store::{KeyValueStore, MemoryStore, StickyAssignments};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::Mutex;
use pex_manifest::{
    parse_inline, parse_sheet, ExperimentConfig, ExperimentHeader, ExperimentType, ManifestSource,
    Metadata, ParseContext,
};
use std::collections::HashSet;
use std::sync::Arc;

/// Message type answered to configuration requests
pub const CONFIG_MESSAGE_TYPE: &str = "hlx:experimentation-config";

type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Result of one resolution pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunReport {
    /// Experiments served, in completion order
    pub applied: Vec<AppliedExperiment>,
    /// Experiments that did not pass a gate
    pub gated: Vec<(String, Ineligibility)>,
    /// Declarations or experiments discarded without effect
    pub dropped: Vec<String>,
    /// Experiments whose results were discarded because the page went away
    pub cancelled: Vec<String>,
    /// Path navigated to, if a redirect variant was served
    pub navigation: Option<String>,
}

impl RunReport {
    /// Whether nothing was served
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.applied.is_empty()
    }

    /// Variant rendered for an experiment, `control` after a fallback
    #[must_use]
    pub fn served_variant(&self, id: &str) -> Option<&str> {
        self.entry(id).and_then(|e| e.served_variant.as_deref())
    }

    /// Variant chosen for an experiment before content was loaded
    #[must_use]
    pub fn selected_variant(&self, id: &str) -> Option<&str> {
        self.entry(id)
            .and_then(|e| e.config.selected_variant.as_deref())
    }

    fn entry(&self, id: &str) -> Option<&AppliedExperiment> {
        self.applied.iter().find(|e| e.id() == id)
    }
}

enum Outcome {
    Applied(AppliedExperiment, Option<String>),
    Gated(String, Ineligibility),
    Dropped(String),
    Cancelled(String),
}

struct Declaration<'p> {
    origin: Origin,
    experiment_type: ExperimentType,
    metadata: &'p Metadata,
    value: &'p str,
}

/// Resolves and applies the experiments of one page
pub struct Engine {
    config: EngineConfig,
    consent: ConsentGate,
    selector: VariantSelector,
    audiences: Arc<dyn AudienceRegistry>,
    loader: ContentLoader,
    applier: ScopeApplier,
    document: Arc<dyn Document>,
    bus: EventBus,
    registry: ExperimentRegistry,
    lifetime: PageLifetime,
    clock: Clock,
    detected: Mutex<Option<bool>>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("bus", &self.bus)
            .field("registry", &self.registry.len())
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Start building an engine
    #[must_use]
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    /// Engine configuration
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Read accessor for host code
    #[must_use]
    pub fn registry(&self) -> &ExperimentRegistry {
        &self.registry
    }

    /// Consent flag for this visitor
    #[must_use]
    pub fn consent(&self) -> &ConsentGate {
        &self.consent
    }

    /// Lifetime token of the page
    #[must_use]
    pub fn lifetime(&self) -> &PageLifetime {
        &self.lifetime
    }

    /// Answer to an `hlx:experimentation-get-config` request
    #[must_use]
    pub fn config_message(&self) -> serde_json::Value {
        let detected = (*self.detected.lock()).unwrap_or(false);
        let experiments = if detected {
            self.registry.to_json()
        } else {
            serde_json::json!([])
        };
        serde_json::json!({
            "type": CONFIG_MESSAGE_TYPE,
            "config": {
                "experiments": experiments,
                "audiences": [],
                "campaigns": [],
            },
            "source": if detected { "engine" } else { "no-experiments" },
        })
    }

    /// Resolve and apply every experiment declared on `page`
    pub async fn run(&self, page: &PageContext) -> RunReport {
        let mut report = RunReport::default();
        let enabled = is_experimentation_enabled(page);
        *self.detected.lock() = Some(enabled);
        if !enabled {
            tracing::debug!(page = %page.path(), "no experimentation declared");
            return report;
        }

        let overrides = Overrides::from_url(&page.url, &self.config);
        let consent = self.consent.snapshot();
        let now = (self.clock)();

        let declarations = Self::declarations(page);
        let resolved = join_all(declarations.iter().map(|d| self.resolve(d, page))).await;

        let mut seen = HashSet::new();
        let mut experiments = Vec::new();
        for (declaration, result) in declarations.iter().zip(resolved) {
            match result {
                Ok(configs) if configs.is_empty() => {
                    tracing::debug!(declaration = declaration.value, "empty experiment ignored");
                    report.dropped.push(declaration.value.to_string());
                }
                Ok(configs) => {
                    for config in configs {
                        if seen.insert(config.id.clone()) {
                            experiments.push((config, declaration.origin));
                        } else {
                            tracing::warn!(experiment = %config.id, "duplicate experiment id ignored");
                            report.dropped.push(config.id);
                        }
                    }
                }
                Err(err) => {
                    tracing::warn!(declaration = declaration.value, "manifest unavailable: {err}");
                    report.dropped.push(declaration.value.to_string());
                }
            }
        }

        for id in overrides.experiment_ids().filter(|id| !seen.contains(*id)) {
            tracing::warn!("{}", ReferenceError::UnknownExperiment(id.to_string()));
        }

        let outcomes = join_all(experiments.into_iter().map(|(config, origin)| {
            self.run_experiment(config, origin, &overrides, consent, now, page.path())
        }))
        .await;

        for outcome in outcomes {
            match outcome {
                Outcome::Applied(entry, navigation) => {
                    report.applied.push(entry);
                    if navigation.is_some() {
                        report.navigation = navigation;
                    }
                }
                Outcome::Gated(id, reason) => report.gated.push((id, reason)),
                Outcome::Dropped(id) => report.dropped.push(id),
                Outcome::Cancelled(id) => report.cancelled.push(id),
            }
        }
        report
    }

    fn declarations(page: &PageContext) -> Vec<Declaration<'_>> {
        let head = page.head.experiment_declaration().map(|value| Declaration {
            origin: Origin::Head,
            experiment_type: ExperimentType::Page,
            metadata: &page.head,
            value,
        });
        let sections = page.sections.iter().enumerate().filter_map(|(i, meta)| {
            meta.experiment_declaration().map(|value| Declaration {
                origin: Origin::Section(i),
                experiment_type: ExperimentType::Section,
                metadata: meta,
                value,
            })
        });
        head.into_iter().chain(sections).collect()
    }

    async fn resolve(
        &self,
        declaration: &Declaration<'_>,
        page: &PageContext,
    ) -> Result<Vec<ExperimentConfig>, ResolveError> {
        let ctx = ParseContext::new(&page.url, declaration.experiment_type)
            .with_thumbnail(page.thumbnail());
        match ManifestSource::from_declaration(declaration.value) {
            None => Ok(Vec::new()),
            Some(ManifestSource::Inline(id)) => {
                Ok(parse_inline(&id, declaration.metadata, &ctx)?.into_iter().collect())
            }
            Some(ManifestSource::Sheet(reference)) => {
                let header = ExperimentHeader::from_metadata(declaration.metadata)?;
                let body = self.loader.manifest(&reference, &page.url).await?;
                Ok(parse_sheet(&body, &header, &ctx)?)
            }
        }
    }

    async fn run_experiment(
        &self,
        mut config: ExperimentConfig,
        origin: Origin,
        overrides: &Overrides,
        consent: ConsentSnapshot,
        now: DateTime<Utc>,
        page_path: &str,
    ) -> Outcome {
        let id = config.id.clone();
        let forced = match overrides.variant_for(&config) {
            Ok(forced) => forced,
            Err(err) => {
                tracing::warn!("ignoring override: {err}");
                None
            }
        };

        if let Err(reason) = check_schedule(&config, now, forced.is_some()) {
            tracing::debug!(experiment = %id, %reason, "not scheduled");
            return Outcome::Gated(id, reason);
        }

        let audience = AudienceResolver::new(self.audiences.as_ref(), overrides.audience())
            .resolve(&config.audiences)
            .await;
        if self.lifetime.is_cancelled() {
            return Outcome::Cancelled(id);
        }
        if let Err(reason) = audience {
            tracing::debug!(experiment = %id, %reason, "audience not matched");
            return Outcome::Gated(id, reason);
        }

        if let Err(reason) = consent.check(config.requires_consent) {
            tracing::debug!(experiment = %id, %reason, "consent gate closed");
            self.registry
                .append(AppliedExperiment::new(Arc::new(config), page_path));
            return Outcome::Gated(id, reason);
        }

        let Some(target) = Target::resolve(&config, origin) else {
            tracing::warn!(experiment = %id, "fragment experiment without mount selector");
            return Outcome::Dropped(id);
        };

        let selection = self.selector.select(&config, forced.as_deref());
        let applied = match self
            .applier
            .apply(&config, &selection.variant, &target, page_path)
            .await
        {
            Ok(applied) => applied,
            Err(Skipped::Cancelled) => return Outcome::Cancelled(id),
            Err(Skipped::MissingElement(element)) => {
                tracing::warn!(experiment = %id, %element, "target element missing");
                return Outcome::Dropped(id);
            }
        };
        let Applied {
            element,
            served_variant,
            served_experience,
            navigate,
        } = applied;

        config.run = true;
        config.selected_variant = Some(selection.variant);
        config.served_experience = Some(served_experience.clone());
        let config = Arc::new(config);

        self.bus.publish(&element, &id, &served_variant);
        let entry = AppliedExperiment::new(config, served_experience)
            .with_served_variant(served_variant.as_str());
        self.registry.append(entry.clone());
        tracing::info!(experiment = %id, variant = %served_variant, scope = %entry.experiment_type, "experiment applied");

        if let Some(path) = &navigate {
            tracing::info!(experiment = %id, path = %path, "redirecting to variant");
            self.document.navigate(path);
            self.lifetime.cancel();
        }
        Outcome::Applied(entry, navigate)
    }
}

/// Builder for [`Engine`]
#[derive(Default)]
pub struct EngineBuilder {
    config: EngineConfig,
    store: Option<Arc<dyn KeyValueStore>>,
    audiences: Option<Arc<dyn AudienceRegistry>>,
    source: Option<Arc<dyn ContentSource>>,
    document: Option<Arc<dyn Document>>,
    telemetry: Vec<Arc<dyn TelemetrySink>>,
    notifications: Vec<Arc<dyn NotificationSink>>,
    seed: Option<u64>,
    lifetime: Option<PageLifetime>,
    clock: Option<Clock>,
}

impl EngineBuilder {
    /// With configuration
    #[inline]
    #[must_use]
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// With persisted visitor state
    #[inline]
    #[must_use]
    pub fn store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// With audience predicates
    #[inline]
    #[must_use]
    pub fn audiences(mut self, audiences: Arc<dyn AudienceRegistry>) -> Self {
        self.audiences = Some(audiences);
        self
    }

    /// With content source
    #[inline]
    #[must_use]
    pub fn source(mut self, source: Arc<dyn ContentSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// With document
    #[inline]
    #[must_use]
    pub fn document(mut self, document: Arc<dyn Document>) -> Self {
        self.document = Some(document);
        self
    }

    /// With a telemetry subscriber
    #[inline]
    #[must_use]
    pub fn telemetry(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry.push(sink);
        self
    }

    /// With a notification subscriber
    #[inline]
    #[must_use]
    pub fn notifications(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.notifications.push(sink);
        self
    }

    /// With a fixed random seed
    #[inline]
    #[must_use]
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// With a page lifetime shared with the host
    #[inline]
    #[must_use]
    pub fn lifetime(mut self, lifetime: PageLifetime) -> Self {
        self.lifetime = Some(lifetime);
        self
    }

    /// With a fixed current time
    #[inline]
    #[must_use]
    pub fn now(mut self, now: DateTime<Utc>) -> Self {
        self.clock = Some(Arc::new(move || now));
        self
    }

    /// Build the engine
    #[must_use]
    pub fn build(self) -> Engine {
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryStore::new()));
        let sticky =
            StickyAssignments::new(store.clone(), self.config.sticky_storage_prefix.clone());
        let selector = match self.seed {
            Some(seed) => VariantSelector::with_seed(sticky, seed),
            None => VariantSelector::new(sticky),
        };
        let source = self.source.unwrap_or_else(|| Arc::new(EmptySource));
        let document = self
            .document
            .unwrap_or_else(|| Arc::new(MemoryDocument::new()));
        let lifetime = self.lifetime.unwrap_or_default();
        let loader = ContentLoader::new(source, &self.config);
        let applier = ScopeApplier::new(document.clone(), loader.clone(), lifetime.clone());

        let mut bus = EventBus::new(
            self.config.telemetry_event_name.clone(),
            self.config.dom_event_name.clone(),
        );
        for sink in self.telemetry {
            bus.subscribe_telemetry(sink);
        }
        for sink in self.notifications {
            bus.subscribe_notifications(sink);
        }

        Engine {
            consent: ConsentGate::new(store, self.config.consent_storage_key.clone()),
            selector,
            audiences: self
                .audiences
                .unwrap_or_else(|| Arc::new(StaticAudienceRegistry::new())),
            loader,
            applier,
            document,
            bus,
            registry: ExperimentRegistry::new(),
            lifetime,
            clock: self.clock.unwrap_or_else(|| Arc::new(Utc::now)),
            detected: Mutex::new(None),
            config: self.config,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::ElementRef;
    use pex_manifest::CONTROL;

    fn page(query: &str) -> PageContext {
        PageContext::parse(&format!("https://example.com/page{query}"))
            .unwrap()
            .with_head(
                Metadata::new()
                    .with("experiment", "foo")
                    .with("experiment-variants", "/page, /page")
                    .with("experiment-names", "V1, V2"),
            )
    }

    fn engine(document: Arc<MemoryDocument>) -> Engine {
        Engine::builder().document(document).seed(42).build()
    }

    #[tokio::test]
    async fn code_experiment_is_applied_and_recorded() {
        let doc = Arc::new(MemoryDocument::new().with_main("<p>Hello World!</p>"));
        let engine = engine(doc.clone());
        let report = engine.run(&page("?experiment=foo/challenger-2")).await;

        assert_eq!(report.served_variant("foo"), Some("challenger-2"));
        assert_eq!(engine.registry().len(), 1);
        let entry = engine.registry().find("foo").unwrap();
        assert!(entry.config.run);
        assert_eq!(entry.served_experience, "/page");
        assert!(doc
            .classes(&ElementRef::Body)
            .contains(&"variant-challenger-2".to_string()));
    }

    #[tokio::test]
    async fn nothing_declared_short_circuits() {
        let engine = engine(Arc::new(MemoryDocument::new()));
        let report = engine
            .run(&PageContext::parse("https://example.com/").unwrap())
            .await;
        assert!(report.is_empty());
        assert_eq!(engine.config_message()["source"], "no-experiments");
        assert_eq!(engine.config_message()["config"]["experiments"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn config_message_lists_experiments() {
        let engine = engine(Arc::new(MemoryDocument::new()));
        engine.run(&page("?experiment=foo/control")).await;
        let message = engine.config_message();
        assert_eq!(message["type"], CONFIG_MESSAGE_TYPE);
        assert_eq!(message["config"]["experiments"][0]["config"]["id"], "foo");
        assert_eq!(
            message["config"]["experiments"][0]["config"]["selectedVariant"],
            CONTROL
        );
    }

    #[tokio::test]
    async fn unknown_override_is_ignored() {
        let engine = engine(Arc::new(MemoryDocument::new()));
        let report = engine.run(&page("?experiment=foo/invalid&experiment=bar/x")).await;
        assert_eq!(report.applied.len(), 1);
        assert!(report.served_variant("foo").is_some());
    }

    #[tokio::test]
    async fn sticky_assignments_use_the_configured_prefix() {
        let store = Arc::new(MemoryStore::new());
        let engine = Engine::builder()
            .config(EngineConfig::new().with_sticky_prefix("sticky:"))
            .store(store.clone())
            .seed(3)
            .build();
        let report = engine.run(&page("")).await;

        let stored = store.get("sticky:foo").unwrap();
        assert!(stored.is_some());
        assert_eq!(stored.as_deref(), report.selected_variant("foo"));
        assert_eq!(store.get("experimentation_foo").unwrap(), None);
    }
}

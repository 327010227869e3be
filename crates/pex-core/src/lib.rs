//! PEX Core - experiment resolution engine
//!
//! Takes the experiments declared on a page and, for one visitor:
//! - Gates them on status, schedule, audience and consent
//! - Picks a variant (override, sticky assignment, or weighted draw)
//! - Applies it at page, section or fragment scope, or redirects
//! - Publishes telemetry and a DOM-visible event
//! - Records the outcome in a page-lifetime registry
//!
//! Host capabilities (storage, audiences, content retrieval, the DOM,
//! subscribers) are injected through [`EngineBuilder`].
//!
//! # Example
//!
//! ```rust,ignore
//! use pex_core::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let page = PageContext::parse("https://example.com/products?experiment=hero/challenger-1")?
//!     .with_head(
//!         Metadata::new()
//!             .with("experiment", "hero")
//!             .with("experiment-variants", "/products-v1"),
//!     );
//!
//! let document = Arc::new(MemoryDocument::new().with_main("<p>Hello</p>"));
//! let engine = Engine::builder().document(document.clone()).build();
//!
//! let report = engine.run(&page).await;
//! println!("served {:?}", report.served_variant("hero"));
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod applier;
pub mod audience;
pub mod config;
pub mod consent;
pub mod detect;
pub mod engine;
pub mod error;
pub mod events;
pub mod loader;
pub mod overrides;
pub mod page;
pub mod registry;
pub mod selector;
pub mod store;

// Re-exports for convenience
pub use applier::{Applied, Origin, ScopeApplier, Skipped, Target};
pub use audience::{
    AudienceMatch, AudiencePredicate, AudienceRegistry, AudienceResolver, StaticAudienceRegistry,
};
pub use config::EngineConfig;
pub use consent::{ConsentGate, ConsentSnapshot};
pub use detect::is_experimentation_enabled;
pub use engine::{Engine, EngineBuilder, RunReport, CONFIG_MESSAGE_TYPE};
pub use error::{
    EngineError, EngineResult, FetchError, Ineligibility, ReferenceError, ResolveError, StoreError,
};
pub use events::{EventBus, ExperimentationEvent, NotificationSink, TelemetryPayload, TelemetrySink};
pub use loader::{ContentLoader, ManifestCache};
pub use overrides::Overrides;
pub use page::{
    ContentSource, Document, ElementRef, EmptySource, Fetched, MemoryDocument, PageContext,
    PageLifetime,
};
pub use registry::{AppliedExperiment, ExperimentRegistry};
pub use selector::{check_schedule, pick_weighted, Selection, SelectionReason, VariantSelector};
pub use store::{KeyValueStore, MemoryStore, StickyAssignments};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for hosting the engine
    pub use crate::{
        AudiencePredicate, ContentSource, Document, ElementRef, Engine, EngineConfig, Fetched,
        KeyValueStore, MemoryDocument, MemoryStore, PageContext, PageLifetime, RunReport,
        StaticAudienceRegistry, TelemetrySink, NotificationSink,
    };
    pub use pex_manifest::prelude::*;
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

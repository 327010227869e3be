//! PEX Manifest
//!
//! Turns authored experiment declarations into typed [`ExperimentConfig`]s.
//!
//! # Sources
//!
//! - **Inline**: everything is in page or section metadata
//!   (`experiment`, `experiment-variants`, `experiment-split`, ...)
//! - **Sheet**: the `experiment` metadata points at a JSON sheet whose rows
//!   list the variants; experiment-level settings still come from metadata
//!
//! # Example
//!
//! ```rust,ignore
//! use pex_manifest::{parse_inline, ExperimentType, Metadata, ParseContext};
//! use url::Url;
//!
//! let page = Url::parse("https://example.com/products")?;
//! let meta = Metadata::new()
//!     .with("experiment", "hero")
//!     .with("experiment-variants", "/products-v1, /products-v2");
//!
//! let ctx = ParseContext::new(&page, ExperimentType::Page);
//! let config = parse_inline("hero", &meta, &ctx)?.expect("has variants");
//! assert_eq!(config.variants.len(), 3); // control + 2 challengers
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod error;
pub mod header;
pub mod inline;
pub mod metadata;
pub mod sheet;
pub mod split;
pub mod types;

pub use error::{ManifestError, ManifestResult};
pub use header::{ExperimentHeader, ParseContext, DEFAULT_OPTIMIZING_TARGET};
pub use inline::parse_inline;
pub use metadata::{to_class_name, Metadata};
pub use sheet::{parse_rows, parse_sheet, ManifestRow};
pub use split::{allocate, distribute_evenly, Split, TOTAL_BASIS_POINTS};
pub use types::{
    ExperimentConfig, ExperimentStatus, ExperimentType, Resolution, VariantConfig, VariantSource,
    CONTROL,
};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// What an `experiment` metadata value refers to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ManifestSource {
    /// The value is the experiment id; variants are in the same metadata
    Inline(String),
    /// The value locates a sheet manifest
    Sheet(String),
}

impl ManifestSource {
    /// Classify a declaration value, `None` when blank
    ///
    /// Values containing a `/` or ending in `.json` are sheet references,
    /// anything else is an inline experiment id.
    #[must_use]
    pub fn from_declaration(value: &str) -> Option<Self> {
        let value = value.trim();
        if value.is_empty() {
            return None;
        }
        let without_query = value.split(['?', '#']).next().unwrap_or(value);
        if value.contains('/') || without_query.ends_with(".json") {
            Some(Self::Sheet(value.to_string()))
        } else {
            Some(Self::Inline(value.to_string()))
        }
    }
}

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with manifests
    pub use crate::{
        ExperimentConfig, ExperimentHeader, ExperimentStatus, ExperimentType, ManifestError,
        ManifestSource, Metadata, ParseContext, Split, VariantConfig, VariantSource, CONTROL,
    };
}

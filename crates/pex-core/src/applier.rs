//! Scope application
//!
//! Serves a selected variant at its scope:
//!
//! | scope    | classes on        | content replaced in |
//! |----------|-------------------|---------------------|
//! | page     | body              | main                |
//! | section  | section container | section container   |
//! | fragment | mount point       | mount point         |
//!
//! Control and code variants leave content untouched. A variant whose
//! content cannot be obtained is served as control, and the classes say so.
//! Page-scope challengers of a redirect experiment navigate instead of
//! swapping content; navigation itself is left to the caller so telemetry
//! can go out first.

use crate::loader::ContentLoader;
use crate::page::{Document, ElementRef, PageLifetime};
use pex_manifest::{
    to_class_name, ExperimentConfig, ExperimentType, Resolution, VariantSource, CONTROL,
};
use std::sync::Arc;

/// Where an experiment was declared
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    /// Page-level metadata
    Head,
    /// Metadata of the n-th section
    Section(usize),
}

/// Elements an experiment touches
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Receives the classes and is referenced by the event
    pub element: ElementRef,
    /// Receives variant content
    pub content: ElementRef,
}

impl Target {
    /// Resolve the target of an experiment declared at `origin`
    ///
    /// `None` for a fragment experiment without a mount selector.
    #[must_use]
    pub fn resolve(config: &ExperimentConfig, origin: Origin) -> Option<Self> {
        match (config.experiment_type, origin) {
            (ExperimentType::Fragment, _) => {
                let mount = ElementRef::Fragment(config.mount_selector()?.to_string());
                Some(Self {
                    element: mount.clone(),
                    content: mount,
                })
            }
            (ExperimentType::Section, Origin::Section(i)) => Some(Self {
                element: ElementRef::Section(i),
                content: ElementRef::Section(i),
            }),
            _ => Some(Self {
                element: ElementRef::Body,
                content: ElementRef::Main,
            }),
        }
    }
}

/// What was served
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied {
    /// Element carrying the classes
    pub element: ElementRef,
    /// Variant actually rendered
    pub served_variant: String,
    /// Content path actually rendered
    pub served_experience: String,
    /// Path to navigate to once telemetry is out
    pub navigate: Option<String>,
}

/// Why nothing was applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Skipped {
    /// The target element is not in the document
    MissingElement(ElementRef),
    /// The page was torn down while content was pending
    Cancelled,
}

/// Applies variants to the document
#[derive(Clone)]
pub struct ScopeApplier {
    document: Arc<dyn Document>,
    loader: ContentLoader,
    lifetime: PageLifetime,
}

impl std::fmt::Debug for ScopeApplier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopeApplier")
            .field("loader", &self.loader)
            .field("lifetime", &self.lifetime)
            .finish_non_exhaustive()
    }
}

impl ScopeApplier {
    /// Create applier
    #[must_use]
    pub fn new(document: Arc<dyn Document>, loader: ContentLoader, lifetime: PageLifetime) -> Self {
        Self {
            document,
            loader,
            lifetime,
        }
    }

    /// Content to splice for the selected variant
    ///
    /// `Ok(None)` means leave content untouched and serve `variant` as is,
    /// `Err(())` means fall back to control.
    async fn content_for(&self, config: &ExperimentConfig, variant: &str) -> Result<Option<String>, ()> {
        let Some(source) = config.variant(variant).map(|v| &v.source) else {
            return Err(());
        };
        match source {
            VariantSource::Control | VariantSource::Code => Ok(None),
            VariantSource::Inline(markup) => Ok(Some(markup.clone())),
            VariantSource::Invalid(raw) => {
                tracing::warn!(experiment = %config.id, variant, reference = %raw, "invalid variant url, serving control");
                Err(())
            }
            VariantSource::Path(path) => match self.loader.variant_markup(path).await {
                Ok(markup) => Ok(Some(markup)),
                Err(err) => {
                    tracing::warn!(experiment = %config.id, variant, "variant content unavailable, serving control: {err}");
                    Err(())
                }
            },
        }
    }

    /// Serve `variant` of `config` at `target`
    ///
    /// # Errors
    /// [`Skipped`] when the target is missing or the page went away
    pub async fn apply(
        &self,
        config: &ExperimentConfig,
        variant: &str,
        target: &Target,
        page_path: &str,
    ) -> Result<Applied, Skipped> {
        if !self.document.has_element(&target.element) {
            tracing::debug!(experiment = %config.id, element = %target.element, "target element missing");
            return Err(Skipped::MissingElement(target.element.clone()));
        }

        let source = config.variant(variant).map(|v| &v.source);
        if let (ExperimentType::Page, Resolution::Redirect, Some(VariantSource::Path(path))) =
            (config.experiment_type, config.resolution, source)
        {
            self.add_classes(config, variant, target);
            return Ok(Applied {
                element: target.element.clone(),
                served_variant: variant.to_string(),
                served_experience: path.clone(),
                navigate: Some(path.clone()),
            });
        }

        let content = self.content_for(config, variant).await;
        if self.lifetime.is_cancelled() {
            tracing::debug!(experiment = %config.id, "page torn down, discarding result");
            return Err(Skipped::Cancelled);
        }

        let (served_variant, served_experience) = match content {
            Ok(Some(markup)) if self.document.replace_content(&target.content, &markup) => {
                (variant.to_string(), Self::experience(config, variant, page_path))
            }
            Ok(Some(_)) => {
                tracing::warn!(experiment = %config.id, element = %target.content, "content container missing, serving control");
                (CONTROL.to_string(), page_path.to_string())
            }
            Ok(None) => (variant.to_string(), Self::experience(config, variant, page_path)),
            Err(()) => (CONTROL.to_string(), page_path.to_string()),
        };

        self.add_classes(config, &served_variant, target);
        Ok(Applied {
            element: target.element.clone(),
            served_variant,
            served_experience,
            navigate: None,
        })
    }

    fn experience(config: &ExperimentConfig, variant: &str, page_path: &str) -> String {
        match config.variant(variant).map(|v| &v.source) {
            Some(VariantSource::Path(path)) => path.clone(),
            Some(VariantSource::Inline(_)) => config
                .variant(variant)
                .map(|v| v.url.clone())
                .filter(|url| !url.is_empty())
                .unwrap_or_else(|| page_path.to_string()),
            _ => page_path.to_string(),
        }
    }

    fn add_classes(&self, config: &ExperimentConfig, variant: &str, target: &Target) {
        let classes = [
            format!("experiment-{}", to_class_name(&config.id)),
            format!("variant-{}", to_class_name(variant)),
        ];
        self.document.add_classes(&target.element, &classes);
    }
}

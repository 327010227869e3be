//! Audience eligibility
//!
//! An audience is a named, argument-less predicate supplied by the host. It
//! may answer synchronously or asynchronously.
//!
//! # Resolution
//!
//! ```text
//! no audience named ─────────────────────────────→ eligible
//! audience named ─→ lookup ─┬─ missing ──────────→ ineligible
//!                           ├─ sync  ─→ value ───→ eligible | ineligible
//!                           └─ async ─→ awaited ─→ eligible | ineligible
//! ```
//!
//! With several names the visitor is eligible when any predicate holds.
//! A forced audience (request parameter) short-circuits evaluation: the
//! experiment is eligible exactly when it targets that audience.

use crate::error::Ineligibility;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

type SyncFn = dyn Fn() -> bool + Send + Sync;
type AsyncFn = dyn Fn() -> BoxFuture<'static, bool> + Send + Sync;

/// A named eligibility check
#[derive(Clone)]
pub enum AudiencePredicate {
    /// Answers immediately
    Sync(Arc<SyncFn>),
    /// Answers after a suspension point
    Async(Arc<AsyncFn>),
}

impl fmt::Debug for AudiencePredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sync(_) => f.write_str("AudiencePredicate::Sync"),
            Self::Async(_) => f.write_str("AudiencePredicate::Async"),
        }
    }
}

impl AudiencePredicate {
    /// Wrap a synchronous check
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        Self::Sync(Arc::new(f))
    }

    /// Wrap an asynchronous check
    pub fn asynchronous<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        Self::Async(Arc::new(move || f().boxed()))
    }

    /// Evaluate the predicate
    pub async fn evaluate(&self) -> bool {
        match self {
            Self::Sync(f) => f(),
            Self::Async(f) => f().await,
        }
    }
}

/// Host-supplied lookup of audience predicates
pub trait AudienceRegistry: Send + Sync {
    /// Predicate registered under `name`
    fn resolve(&self, name: &str) -> Option<AudiencePredicate>;
}

/// Map-backed audience registry
#[derive(Debug, Clone, Default)]
pub struct StaticAudienceRegistry {
    predicates: HashMap<String, AudiencePredicate>,
}

impl StaticAudienceRegistry {
    /// Create empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a predicate
    pub fn register(&mut self, name: impl Into<String>, predicate: AudiencePredicate) {
        self.predicates.insert(name.into(), predicate);
    }

    /// With a synchronous predicate
    #[must_use]
    pub fn with_sync<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.register(name, AudiencePredicate::sync(f));
        self
    }

    /// With an asynchronous predicate
    #[must_use]
    pub fn with_async<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        self.register(name, AudiencePredicate::asynchronous(f));
        self
    }
}

impl AudienceRegistry for StaticAudienceRegistry {
    fn resolve(&self, name: &str) -> Option<AudiencePredicate> {
        self.predicates.get(name).cloned()
    }
}

/// How an experiment's audience requirement was met
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudienceMatch {
    /// The experiment targets everyone
    NoAudienceRequired,
    /// This audience's predicate held
    Matched(String),
    /// This audience was forced by request parameter
    Forced(String),
}

/// Evaluates audience requirements against a registry
pub struct AudienceResolver<'a> {
    registry: &'a dyn AudienceRegistry,
    forced: Option<&'a str>,
}

impl<'a> AudienceResolver<'a> {
    /// Create resolver, optionally with a forced audience
    #[must_use]
    pub fn new(registry: &'a dyn AudienceRegistry, forced: Option<&'a str>) -> Self {
        Self { registry, forced }
    }

    /// Decide eligibility for the named audiences
    ///
    /// # Errors
    /// - `Ineligibility::ForcedAudienceMismatch` when a forced audience is not targeted
    /// - `Ineligibility::AudienceMissing` when the only named audiences are unregistered
    /// - `Ineligibility::AudienceRejected` when every registered predicate is false
    pub async fn resolve(&self, audiences: &[String]) -> Result<AudienceMatch, Ineligibility> {
        if audiences.is_empty() {
            return Ok(AudienceMatch::NoAudienceRequired);
        }

        if let Some(forced) = self.forced {
            return if audiences.iter().any(|a| a == forced) {
                Ok(AudienceMatch::Forced(forced.to_string()))
            } else {
                Err(Ineligibility::ForcedAudienceMismatch(forced.to_string()))
            };
        }

        let mut any_registered = false;
        for name in audiences {
            let Some(predicate) = self.registry.resolve(name) else {
                tracing::debug!(audience = %name, "audience not registered");
                continue;
            };
            any_registered = true;
            if predicate.evaluate().await {
                return Ok(AudienceMatch::Matched(name.clone()));
            }
        }

        if any_registered {
            Err(Ineligibility::AudienceRejected(audiences.to_vec()))
        } else {
            Err(Ineligibility::AudienceMissing(audiences[0].clone()))
        }
    }
}

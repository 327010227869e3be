//! Error types for the resolution engine
//!
//! Provides error handling for:
//! - Content and manifest fetches
//! - Persisted key/value storage
//! - Override references naming unknown experiments or variants
//! - Gating outcomes (why an experiment did not run)
//!
//! None of these escape [`Engine::run`](crate::Engine::run): every failure
//! degrades to serving control content.

use pex_manifest::{ExperimentStatus, ManifestError};

/// Errors retrieving content from the site
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// Nothing published at the path
    #[error("not found: {0}")]
    NotFound(String),

    /// Non-success response
    #[error("unexpected status {status} for {path}")]
    Status {
        /// Requested path
        path: String,
        /// HTTP-like status code
        status: u16,
    },

    /// The fetch did not finish in time
    #[error("fetch of {path} timed out after {millis}ms")]
    Timeout {
        /// Requested path
        path: String,
        /// Configured bound
        millis: u64,
    },

    /// The path is an alias that redirects elsewhere
    #[error("{0} redirects, not serving it as a variant")]
    Redirected(String),

    /// Lower level failure
    #[error("transport error: {0}")]
    Transport(String),
}

impl FetchError {
    /// Create status error for path
    pub fn status(path: impl Into<String>, status: u16) -> Self {
        Self::Status {
            path: path.into(),
            status,
        }
    }
}

/// Errors from the persisted key/value store
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Storage is disabled or full
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// Backing medium failed
    #[error("storage io error: {0}")]
    Io(String),
}

/// Errors resolving a manifest into experiment configs
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// The manifest could not be fetched
    #[error("manifest fetch failed: {0}")]
    Fetch(#[from] FetchError),

    /// The manifest could not be parsed
    #[error("manifest parse failed: {0}")]
    Manifest(#[from] ManifestError),
}

/// A request parameter naming something that does not exist
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReferenceError {
    /// The variant is not part of the experiment
    #[error("experiment '{experiment}' has no variant '{variant}'")]
    UnknownVariant {
        /// Experiment id from the override
        experiment: String,
        /// Variant id from the override
        variant: String,
    },

    /// No experiment on the page carries this id
    #[error("no experiment '{0}' on this page")]
    UnknownExperiment(String),
}

/// Why an experiment was not served
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Ineligibility {
    /// Status is not active and no variant override forced it
    #[error("experiment is {0:?}")]
    NotActive(ExperimentStatus),

    /// Start date lies in the future
    #[error("experiment has not started")]
    NotStarted,

    /// End date lies in the past
    #[error("experiment has ended")]
    Ended,

    /// No predicate registered under the audience name
    #[error("audience '{0}' is not registered")]
    AudienceMissing(String),

    /// Every named audience evaluated to false
    #[error("visitor is not in audiences {0:?}")]
    AudienceRejected(Vec<String>),

    /// The forced audience is not one the experiment targets
    #[error("forced audience '{0}' is not targeted")]
    ForcedAudienceMismatch(String),

    /// Consent is required and not granted
    #[error("visitor consent not granted")]
    ConsentNotGranted,
}

/// Host-level failures: the page itself cannot be resolved
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The page URL could not be parsed
    #[error("invalid page url: {0}")]
    InvalidPageUrl(#[from] url::ParseError),
}

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

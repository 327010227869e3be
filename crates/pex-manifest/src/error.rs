//! Error types for manifest resolution
//!
//! Covers:
//! - Sheet manifest decoding (JSON shape, missing data)
//! - Variant references that cannot be turned into a content path
//! - Unparsable experiment-level metadata (dates)

/// Errors raised while building an [`ExperimentConfig`](crate::ExperimentConfig)
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    /// The manifest body is not valid JSON
    #[error("manifest is not valid json: {0}")]
    Json(#[from] serde_json::Error),

    /// The manifest JSON has no recognisable sheet of rows
    #[error("manifest has no rows: {0}")]
    NoRows(String),

    /// A variant reference could not be resolved against the page URL
    #[error("invalid variant url '{reference}': {reason}")]
    InvalidVariantUrl {
        /// The authored reference
        reference: String,
        /// Why it was rejected
        reason: String,
    },

    /// A start or end date could not be parsed
    #[error("invalid date for '{key}': {value}")]
    InvalidDate {
        /// Metadata key carrying the date
        key: String,
        /// The authored value
        value: String,
    },
}

impl ManifestError {
    /// Create invalid variant url error
    pub fn invalid_variant_url(reference: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidVariantUrl {
            reference: reference.into(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for manifest operations
pub type ManifestResult<T> = Result<T, ManifestError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_variant_url_display() {
        let err = ManifestError::invalid_variant_url("http://[::1", "invalid IPv6 address");
        assert_eq!(
            err.to_string(),
            "invalid variant url 'http://[::1': invalid IPv6 address"
        );
    }

    #[test]
    fn json_error_conversion() {
        let source = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: ManifestError = source.into();
        assert!(matches!(err, ManifestError::Json(_)));
    }
}

//! Cheap check whether a page declares any experimentation at all
//!
//! Hosts call this before paying for the full engine.

use crate::page::PageContext;
use once_cell::sync::Lazy;
use pex_manifest::metadata::LEGACY_EXPERIMENT_KEY;
use regex::Regex;

/// Head metadata key prefixes that signal experimentation
pub const HEAD_KEY_PREFIXES: [&str; 5] = ["experiment", "campaign-", "audience-", "campaign:", "audience:"];

static SECTION_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)Experiment|Campaign|Audience").expect("section pattern must compile")
});

/// Whether any head key or section metadata mentions experimentation
///
/// A head carrying only the legacy `instant-experiment` key counts too.
#[must_use]
pub fn is_experimentation_enabled(page: &PageContext) -> bool {
    let head = page
        .head
        .iter()
        .any(|(key, _)| {
            key == LEGACY_EXPERIMENT_KEY || HEAD_KEY_PREFIXES.iter().any(|p| key.starts_with(p))
        });
    if head {
        return true;
    }
    page.sections.iter().any(|section| {
        section
            .iter()
            .any(|(key, value)| SECTION_PATTERN.is_match(key) || SECTION_PATTERN.is_match(value))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pex_manifest::Metadata;

    fn page() -> PageContext {
        PageContext::parse("https://example.com/").unwrap()
    }

    #[test]
    fn head_prefixes() {
        for key in ["experiment", "experiment-variants", "campaign-foo", "audience:bar", "campaign:x"] {
            let p = page().with_head(Metadata::new().with(key, "x"));
            assert!(is_experimentation_enabled(&p), "{key}");
        }
        let p = page().with_head(Metadata::new().with("audience", "bar").with("title", "Experiment"));
        assert!(!is_experimentation_enabled(&p));
    }

    #[test]
    fn section_text_is_matched_case_insensitively() {
        let p = page().with_section(Metadata::new().with("style", "AUDIENCE promo"));
        assert!(is_experimentation_enabled(&p));
        let p = page().with_section(Metadata::new().with("style", "highlight"));
        assert!(!is_experimentation_enabled(&p));
    }

    #[test]
    fn legacy_only_head_is_detected() {
        let p = page().with_head(Metadata::new().with("instant-experiment", "foo"));
        assert!(is_experimentation_enabled(&p));
        let p = page().with_head(Metadata::new().with("instant-article", "foo"));
        assert!(!is_experimentation_enabled(&p));
    }
}

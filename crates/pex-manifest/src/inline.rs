//! Experiments declared entirely in page or section metadata
//!
//! ```text
//! experiment:          foo
//! experiment-variants: /foo-v1, /foo-v2
//! experiment-split:    25, 25
//! experiment-names:    V1, V2
//! ```
//!
//! Challengers are named `challenger-1`, `challenger-2`, ... in list order.

use crate::error::ManifestResult;
use crate::header::{ExperimentHeader, ParseContext};
use crate::metadata::Metadata;
use crate::split::Split;
use crate::types::{ExperimentConfig, VariantConfig};

/// Parse an inline experiment
///
/// Returns `Ok(None)` for an empty experiment: a blank id or no variants.
///
/// # Errors
/// Propagates header errors (unparsable dates)
pub fn parse_inline(
    id: &str,
    meta: &Metadata,
    ctx: &ParseContext<'_>,
) -> ManifestResult<Option<ExperimentConfig>> {
    let id = id.trim();
    if id.is_empty() {
        return Ok(None);
    }

    let urls = meta
        .list(&["experiment-variants", "experiment-variant"])
        .unwrap_or_default();
    if urls.iter().all(String::is_empty) {
        tracing::debug!(experiment = id, "no variants declared, ignoring");
        return Ok(None);
    }

    let splits = meta
        .list(&["experiment-split", "experiment-splits"])
        .unwrap_or_default();
    let names = meta
        .list(&["experiment-names", "experiment-name"])
        .unwrap_or_default();

    let header = ExperimentHeader::from_metadata(meta)?;

    let challengers = urls
        .iter()
        .enumerate()
        .map(|(i, url)| {
            let vid = format!("challenger-{}", i + 1);
            let label = names
                .get(i)
                .filter(|n| !n.is_empty())
                .cloned()
                .unwrap_or_else(|| vid.clone());
            let split = splits.get(i).and_then(|s| Split::parse_percent(s));
            let variant = VariantConfig::new(label, url.clone(), ctx.resolve_reference(url));
            (vid, variant, split)
        })
        .collect();

    Ok(header.build(id, ctx, None, challengers))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ExperimentType, VariantSource, CONTROL};
    use pretty_assertions::assert_eq;
    use url::Url;

    fn page() -> Url {
        Url::parse("https://example.com/experiments/page-level").unwrap()
    }

    fn meta() -> Metadata {
        Metadata::new()
            .with("experiment", "foo")
            .with(
                "experiment-variants",
                "/experiments/page-level-v1, /experiments/page-level-v2",
            )
            .with("experiment-names", "V1, V2")
    }

    #[test]
    fn parses_variants_in_order_with_even_split() {
        let url = page();
        let ctx = ParseContext::new(&url, ExperimentType::Page);
        let cfg = parse_inline("foo", &meta(), &ctx).unwrap().unwrap();

        assert_eq!(
            cfg.variant_ids().collect::<Vec<_>>(),
            vec![CONTROL, "challenger-1", "challenger-2"]
        );
        let splits: Vec<String> = cfg
            .variants
            .values()
            .map(|v| v.percentage_split.to_string())
            .collect();
        assert_eq!(splits, vec!["0.3334", "0.3333", "0.3333"]);
        assert_eq!(cfg.variants["challenger-1"].label, "V1");
        assert_eq!(cfg.variants[CONTROL].label, "control");
        assert_eq!(cfg.variants[CONTROL].url, "/experiments/page-level");
        assert_eq!(cfg.label, "Experiment foo");
        assert!(!cfg.run);
    }

    #[test]
    fn authored_split_leaves_remainder_to_control() {
        let url = page();
        let ctx = ParseContext::new(&url, ExperimentType::Page);
        let cfg = parse_inline("foo", &meta().with("experiment-split", "0, 100"), &ctx)
            .unwrap()
            .unwrap();
        assert_eq!(cfg.variants[CONTROL].percentage_split.basis_points(), 0);
        assert_eq!(cfg.variants["challenger-1"].percentage_split.basis_points(), 0);
        assert_eq!(
            cfg.variants["challenger-2"].percentage_split.basis_points(),
            10_000
        );
    }

    #[test]
    fn empty_experiments_are_dropped() {
        let url = page();
        let ctx = ParseContext::new(&url, ExperimentType::Page);
        let no_variants = Metadata::new().with("experiment", "foo");
        assert!(parse_inline("foo", &no_variants, &ctx).unwrap().is_none());

        let blank = Metadata::new()
            .with("experiment", "foo")
            .with("experiment-variants", " , ");
        assert!(parse_inline("foo", &blank, &ctx).unwrap().is_none());

        assert!(parse_inline("  ", &meta(), &ctx).unwrap().is_none());
    }

    #[test]
    fn invalid_reference_keeps_the_variant() {
        let url = page();
        let ctx = ParseContext::new(&url, ExperimentType::Page);
        let m = Metadata::new()
            .with("experiment", "foo")
            .with("experiment-variants", "https://elsewhere.org/v1");
        let cfg = parse_inline("foo", &m, &ctx).unwrap().unwrap();
        assert!(matches!(
            cfg.variants["challenger-1"].source,
            VariantSource::Invalid(_)
        ));
    }

    #[test]
    fn header_fields_are_carried() {
        let url = page();
        let ctx = ParseContext::new(&url, ExperimentType::Section).with_thumbnail(Some("/thumb.png"));
        let m = meta()
            .with("experiment-status", "inactive")
            .with("experiment-requires-consent", "true")
            .with("experiment-label", "Homepage hero")
            .with("experiment-audience", "mobile, desktop");
        let cfg = parse_inline("bar", &m, &ctx).unwrap().unwrap();
        assert_eq!(cfg.experiment_type, ExperimentType::Section);
        assert!(!cfg.status.is_active());
        assert!(cfg.requires_consent);
        assert_eq!(cfg.label, "Homepage hero");
        assert_eq!(cfg.audiences, vec!["mobile", "desktop"]);
        assert_eq!(cfg.thumbnail.as_deref(), Some("/thumb.png"));
    }
}

//! Functional tests for page-level experiments.
//!
//! Guarantees exercised here:
//! - The main content is replaced by the selected variant, in place.
//! - Repeated visits by the same visitor see the same variant.
//! - Status, schedule and audience gates suppress the experiment.
//! - Request overrides pick the variant; unknown references are ignored.
//! - Body classes, telemetry, the DOM event and the registry all describe
//!   what was actually served.

use chrono::{Duration as ChronoDuration, Utc};
use pex_core::{ElementRef, Ineligibility};
use pex_manifest::ExperimentStatus;
use pex_test_utils::{page_document, page_level, page_level_metadata, page_with, site, Harness, FIXTURES};
use pretty_assertions::assert_eq;
use std::time::Duration;

fn harness() -> Harness {
    Harness::new(page_document(), site())
}

fn is_hello(text: &str) -> bool {
    ["Hello World!", "Hello v1!", "Hello v2!"].contains(&text)
}

/// Guarantee: the page content becomes one of the variants.
#[tokio::test]
async fn replaces_the_page_content_with_the_variant() {
    let h = harness();
    let (_, report) = h.run(&page_level("")).await;

    assert!(is_hello(&h.main()), "unexpected main: {}", h.main());
    assert_eq!(report.applied.len(), 1);
}

/// Guarantee: a visitor keeps the variant they were first assigned.
#[tokio::test]
async fn visiting_the_page_multiple_times_yields_the_same_variant() {
    let first = harness();
    first.run(&page_level("")).await;
    let text = first.main();

    for _ in 0..3 {
        let again = first.reload(page_document());
        again.run(&page_level("")).await;
        assert_eq!(again.main(), text);
    }
}

/// Guarantee: inactive experiments are skipped unless a variant is forced.
#[tokio::test]
async fn does_not_run_inactive_experiments() {
    let head = page_level_metadata().with("experiment-status", "inactive");

    let h = harness();
    let (engine, report) = h.run(&page_with("page-level--inactive", head.clone(), "")).await;
    assert_eq!(h.main(), "Hello World!");
    assert!(engine.registry().is_empty());
    assert_eq!(
        report.gated,
        vec![("foo".to_string(), Ineligibility::NotActive(ExperimentStatus::Inactive))]
    );

    let forced = harness();
    forced
        .run(&page_with("page-level--inactive", head, "?experiment=foo/challenger-1"))
        .await;
    assert_eq!(forced.main(), "Hello v1!");
}

/// Guarantee: audience predicates gate the experiment, sync or async.
#[tokio::test]
async fn serves_the_variant_if_the_configured_audience_is_resolved() {
    let head = page_level_metadata().with("experiment-audience", "bar");
    let page = |query: &str| page_with("page-level--audiences", head.clone(), query);

    let rejected = harness().with_audiences(
        pex_core::StaticAudienceRegistry::new().with_sync("bar", || false),
    );
    rejected.run(&page("?experiment=foo/challenger-1")).await;
    assert_eq!(rejected.main(), "Hello World!");

    let accepted =
        harness().with_audiences(pex_core::StaticAudienceRegistry::new().with_sync("bar", || true));
    accepted.run(&page("?experiment=foo/challenger-1")).await;
    assert_eq!(accepted.main(), "Hello v1!");

    let awaited = harness().with_audiences(pex_core::StaticAudienceRegistry::new().with_async(
        "bar",
        || async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            true
        },
    ));
    awaited.run(&page("?experiment=foo/challenger-2")).await;
    assert_eq!(awaited.main(), "Hello v2!");
}

/// Guarantee: an unregistered audience makes the experiment ineligible.
#[tokio::test]
async fn missing_audience_predicate_is_ineligible() {
    let head = page_level_metadata().with("experiment-audience", "bar");
    let h = harness();
    let (_, report) = h.run(&page_with("page-level--audiences", head, "")).await;
    assert_eq!(h.main(), "Hello World!");
    assert_eq!(
        report.gated,
        vec![("foo".to_string(), Ineligibility::AudienceMissing("bar".into()))]
    );
}

/// Guarantee: only experiments inside `[start, end)` run.
#[tokio::test]
async fn supports_start_and_end_dates() {
    let now = Utc::now();
    let fmt = |d: chrono::DateTime<Utc>| d.to_rfc3339();

    let running = page_level_metadata()
        .with("experiment-start-date", fmt(now - ChronoDuration::days(1)))
        .with("experiment-end-date", fmt(now + ChronoDuration::days(1)));
    let h = harness();
    let (_, report) = h.run(&page_with("page-level--time-bound", running, "")).await;
    assert_eq!(report.applied.len(), 1);

    let future = page_level_metadata()
        .with("experiment-start-date", fmt(now + ChronoDuration::days(1)));
    let h = harness();
    let (_, report) = h.run(&page_with("page-level--time-bound-start", future, "")).await;
    assert_eq!(h.main(), "Hello World!");
    assert_eq!(report.gated[0].1, Ineligibility::NotStarted);

    let past = page_level_metadata().with("experiment-end-date", fmt(now - ChronoDuration::days(1)));
    let h = harness();
    let (_, report) = h.run(&page_with("page-level--time-bound-end", past, "")).await;
    assert_eq!(h.main(), "Hello World!");
    assert_eq!(report.gated[0].1, Ineligibility::Ended);
}

/// Guarantee: authored splits drive the draw.
#[tokio::test]
async fn supports_the_split_metadata() {
    let head = page_level_metadata().with("experiment-split", "0, 100");
    for seed in 0..10 {
        let h = harness();
        h.engine(seed)
            .run(&page_with("page-level--split", head.clone(), ""))
            .await;
        assert_eq!(h.main(), "Hello v2!");
    }
}

/// Guarantee: body classes reflect the experiment and the served variant.
#[tokio::test]
async fn sets_classes_on_the_body_for_the_experiment() {
    for variant in ["control", "challenger-1", "challenger-2"] {
        let h = harness();
        h.run(&page_level(&format!("?experiment=foo/{variant}"))).await;
        let classes = h.body_classes();
        assert!(classes.contains(&"experiment-foo".to_string()));
        assert!(classes.contains(&format!("variant-{variant}")));
    }
}

/// Guarantee: experiments without usable variants leave no trace.
#[tokio::test]
async fn ignores_empty_experiments() {
    let empty = pex_manifest::Metadata::new().with("experiment", "foo");
    let blank = pex_manifest::Metadata::new()
        .with("experiment", "foo")
        .with("experiment-variants", " , ");

    for (name, head) in [("page-level--empty", empty), ("page-level--empty2", blank)] {
        let h = harness();
        let (engine, report) = h.run(&page_with(name, head, "?experiment=foo/challenger-1")).await;
        assert_eq!(h.main(), "Hello World!");
        assert!(h.body_classes().is_empty());
        assert!(engine.registry().is_empty());
        assert!(h.telemetry.calls().is_empty());
        assert_eq!(report.dropped, vec!["foo".to_string()]);
    }
}

/// Guarantee: an override naming an unknown variant is ignored.
#[tokio::test]
async fn ignores_invalid_experiment_references_in_the_query_parameters() {
    let h = harness();
    let (_, report) = h.run(&page_level("?experiment=foo/invalid")).await;
    assert!(is_hello(&h.main()));
    assert_eq!(report.applied.len(), 1);
}

/// Guarantee: a variant URL that cannot be resolved serves control.
#[tokio::test]
async fn ignores_invalid_variant_urls() {
    let head = pex_manifest::Metadata::new()
        .with("experiment", "foo")
        .with("experiment-variants", "https://elsewhere.example/page-v1, /missing-v2");
    let h = harness();
    h.run(&page_with("page-level--invalid-url", head, "?experiment=foo/challenger-1"))
        .await;
    assert_eq!(h.main(), "Hello World!");
    let classes = h.body_classes();
    assert!(classes.contains(&"experiment-foo".to_string()));
    assert!(classes.contains(&"variant-control".to_string()));
}

/// Guarantee: code variants keep the content but still carry classes.
#[tokio::test]
async fn supports_code_experiments() {
    let head = pex_manifest::Metadata::new()
        .with("experiment", "foo")
        .with(
            "experiment-variants",
            format!("{FIXTURES}/page-level--code, {FIXTURES}/page-level--code"),
        );
    let h = harness();
    h.run(&page_with("page-level--code", head, "?experiment=foo/challenger-1"))
        .await;
    assert_eq!(h.main(), "Hello World!");
    let classes = h.body_classes();
    assert!(classes.contains(&"experiment-foo".to_string()));
    assert!(classes.contains(&"variant-challenger-1".to_string()));
}

/// Guarantee: exactly one telemetry call per applied experiment.
#[tokio::test]
async fn tracks_the_experiment_in_telemetry() {
    let h = harness();
    let (_, report) = h.run(&page_level("")).await;
    let calls = h.telemetry.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "experiment");
    assert_eq!(calls[0].1.source, "foo");
    assert_eq!(Some(calls[0].1.target.as_str()), report.served_variant("foo"));
}

/// Guarantee: the redirect is issued only after telemetry and the event.
#[tokio::test]
async fn telemetry_is_fired_before_redirect() {
    let head = page_level_metadata().with("experiment-resolution", "redirect");
    let h = harness();
    let (_, report) = h
        .run(&page_with("page-level--redirect", head, "?experiment=foo/challenger-1"))
        .await;

    let target = format!("{FIXTURES}/page-level-v1");
    assert_eq!(report.navigation.as_deref(), Some(target.as_str()));
    assert_eq!(h.document.location().as_deref(), Some(target.as_str()));
    assert_eq!(
        h.timeline.entries(),
        vec![
            "telemetry:foo:challenger-1".to_string(),
            "event:foo:challenger-1".to_string(),
            format!("navigate:{target}"),
        ]
    );
    assert!(h.lifetime.is_cancelled());
    assert!(h.source.requests().is_empty());
}

/// Guarantee: a redirect experiment serving control stays on the page.
#[tokio::test]
async fn redirect_experiment_serving_control_does_not_navigate() {
    let head = page_level_metadata().with("experiment-resolution", "redirect");
    let h = harness();
    let (_, report) = h
        .run(&page_with("page-level--redirect", head, "?experiment=foo/control"))
        .await;
    assert_eq!(report.navigation, None);
    assert_eq!(h.document.location(), None);
    assert_eq!(h.main(), "Hello World!");
}

/// Guarantee: the registry exposes the resolved configuration.
#[tokio::test]
async fn exposes_the_experiment_in_the_registry() {
    let h = harness();
    let (engine, _) = h.run(&page_level("")).await;
    let json = engine.registry().to_json();
    let entry = &json[0];

    assert_eq!(entry["type"], "page");
    assert_eq!(entry["config"]["id"], "foo");
    assert_eq!(entry["config"]["run"], true);
    assert_eq!(entry["config"]["status"], "active");
    assert_eq!(entry["config"]["label"], "Experiment foo");
    assert_eq!(entry["config"]["optimizingTarget"], "conversion");
    assert_eq!(entry["config"]["thumbnail"], "/media/thumbnail.png");
    assert_eq!(entry["config"]["requiresConsent"], false);
    assert_eq!(entry["config"]["variants"]["control"]["percentageSplit"], "0.3334");
    assert_eq!(entry["config"]["variants"]["challenger-1"]["percentageSplit"], "0.3333");
    assert_eq!(entry["config"]["variants"]["challenger-2"]["percentageSplit"], "0.3333");
    assert_eq!(entry["config"]["variants"]["challenger-1"]["label"], "V1");
    assert_eq!(entry["config"]["variants"]["challenger-2"]["label"], "V2");
    assert!(entry["servedExperience"]
        .as_str()
        .unwrap()
        .starts_with(&format!("{FIXTURES}/page-level")));
}

/// Guarantee: the query string controls the variant.
#[tokio::test]
async fn controls_the_variant_shown_via_query_parameters() {
    let h = harness();
    h.run(&page_level("?experiment=foo/control")).await;
    assert_eq!(h.main(), "Hello World!");

    let h = harness();
    h.run(&page_level("?experiment=foo/challenger-1")).await;
    assert_eq!(h.main(), "Hello v1!");
}

/// Guarantee: matching overrides win, others are ignored; the two-parameter
/// form and forced audiences work.
#[tokio::test]
async fn supports_overriding_the_shown_experiment_and_variant() {
    let h = harness();
    h.run(&page_level("?experiment=foo/challenger-2&experiment=bar/challenger-1"))
        .await;
    assert_eq!(h.main(), "Hello v2!");

    let h = harness();
    h.run(&page_level("?experiment=foo&experiment-variant=challenger-1"))
        .await;
    assert_eq!(h.main(), "Hello v1!");

    let head = page_level_metadata().with("experiment-audience", "bar");
    let h = harness();
    h.run(&page_with(
        "page-level--audiences",
        head,
        "?experiment=foo&experiment-variant=challenger-2&audience=bar",
    ))
    .await;
    assert_eq!(h.main(), "Hello v2!");
}

/// Guarantee: the DOM event references the body and the served variant.
#[tokio::test]
async fn triggers_a_dom_event_with_the_experiment_detail() {
    let h = harness();
    h.run(&page_level("?experiment=foo&experiment-variant=challenger-1"))
        .await;
    let events = h.notifications.events();
    assert_eq!(events.len(), 1);
    let (name, event) = &events[0];
    assert_eq!(name, "aem:experimentation");
    assert_eq!(event.kind, "experiment");
    assert_eq!(event.element, ElementRef::Body);
    assert_eq!(event.experiment, "foo");
    assert_eq!(event.variant, "challenger-1");
    assert!(event.bubbles);
}

/// Guarantee: overrides are a per-request view and never change stickiness.
#[tokio::test]
async fn overrides_do_not_replace_the_sticky_assignment() {
    let first = harness();
    let (_, report) = first.run(&page_level("")).await;
    let sticky = report.served_variant("foo").unwrap().to_string();
    let other = if sticky == "challenger-1" { "challenger-2" } else { "challenger-1" };

    let forced = first.reload(page_document());
    let (_, report) = forced
        .run(&page_level(&format!("?experiment=foo/{other}")))
        .await;
    assert_eq!(report.served_variant("foo"), Some(other));

    let plain = first.reload(page_document());
    let (_, report) = plain.run(&page_level("")).await;
    assert_eq!(report.served_variant("foo"), Some(sticky.as_str()));
}

/// Guarantee: a variant that redirects elsewhere is not served in place.
#[tokio::test]
async fn redirected_variant_content_falls_back_to_control() {
    let head = pex_manifest::Metadata::new()
        .with("experiment", "foo")
        .with("experiment-variants", format!("{FIXTURES}/alias"));
    let h = harness();
    let (_, report) = h
        .run(&page_with("page-level--alias", head, "?experiment=foo/challenger-1"))
        .await;
    assert_eq!(h.main(), "Hello World!");
    assert!(h.body_classes().contains(&"variant-control".to_string()));
    assert_eq!(h.telemetry.calls()[0].1.target, "control");
    assert_eq!(report.served_variant("foo"), Some("control"));
    assert_eq!(report.selected_variant("foo"), Some("challenger-1"));
}

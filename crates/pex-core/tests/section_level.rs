//! Functional tests for section-level experiments.
//!
//! A section experiment is declared in a section's metadata and only ever
//! touches that section container: content, classes, and the element named
//! by the event.

use pex_core::ElementRef;
use pex_test_utils::{section_document, section_level, site, Harness, FIXTURES};
use pretty_assertions::assert_eq;

fn harness() -> Harness {
    Harness::new(section_document(), site())
}

/// Guarantee: the section content becomes the selected variant.
#[tokio::test]
async fn replaces_the_section_content_with_the_variant() {
    let h = harness();
    h.run(&section_level("")).await;
    assert!(["Hello World!", "Hello v1!", "Hello v2!"].contains(&h.section(0).as_str()));

    for (variant, text) in [
        ("control", "Hello World!"),
        ("challenger-1", "Hello v1!"),
        ("challenger-2", "Hello v2!"),
    ] {
        let h = harness();
        h.run(&section_level(&format!("?experiment=bar/{variant}"))).await;
        assert_eq!(h.section(0), text);
        assert_eq!(h.main(), "Hello World!");
    }
}

/// Guarantee: classes land on the section, never on the body.
#[tokio::test]
async fn sets_classes_on_the_section_for_the_experiment() {
    for variant in ["control", "challenger-1", "challenger-2"] {
        let h = harness();
        h.run(&section_level(&format!("?experiment=bar/{variant}"))).await;
        let classes = h.document.classes(&ElementRef::Section(0));
        assert!(classes.contains(&"experiment-bar".to_string()));
        assert!(classes.contains(&format!("variant-{variant}")));
        assert!(h.body_classes().is_empty());
    }
}

/// Guarantee: the registry records a section-scope entry.
#[tokio::test]
async fn exposes_the_experiment_in_the_registry() {
    let h = harness();
    let (engine, _) = h.run(&section_level("")).await;
    let entry = engine.registry().find("bar").unwrap();
    let json = serde_json::to_value(&entry).unwrap();

    assert_eq!(json["type"], "section");
    assert_eq!(json["config"]["run"], true);
    assert_eq!(json["config"]["status"], "active");
    assert_eq!(json["config"]["variants"]["control"]["percentageSplit"], "0.3334");
    assert_eq!(json["config"]["variants"]["challenger-1"]["percentageSplit"], "0.3333");
    assert_eq!(json["config"]["variants"]["challenger-2"]["percentageSplit"], "0.3333");
    let served = json["servedExperience"].as_str().unwrap();
    assert!(
        served.starts_with(&format!("{FIXTURES}/section-level")),
        "unexpected served experience {served}"
    );
}

/// Guarantee: the event references the section element and the exact ids.
#[tokio::test]
async fn triggers_a_dom_event_with_the_experiment_detail() {
    let h = harness();
    h.run(&section_level("?experiment=bar/challenger-2")).await;
    let events = h.notifications.events();
    assert_eq!(events.len(), 1);
    let (_, event) = &events[0];
    assert_eq!(event.element, ElementRef::Section(0));
    assert_eq!(event.experiment, "bar");
    assert_eq!(event.variant, "challenger-2");
}

/// Guarantee: page and section experiments on one page both land in the
/// registry, each at its own scope.
#[tokio::test]
async fn page_and_section_experiments_accumulate() {
    let page = pex_test_utils::page_level("?experiment=foo/challenger-1&experiment=bar/challenger-2")
        .with_section(pex_test_utils::section_level_metadata());
    let h = harness();
    let (engine, report) = h.run(&page).await;

    assert_eq!(report.applied.len(), 2);
    assert_eq!(engine.registry().len(), 2);
    assert_eq!(h.main(), "Hello v1!");
    assert_eq!(h.section(0), "Hello v2!");
    assert!(h.body_classes().contains(&"experiment-foo".to_string()));
    assert!(h
        .document
        .classes(&ElementRef::Section(0))
        .contains(&"experiment-bar".to_string()));
}

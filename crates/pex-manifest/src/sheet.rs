//! Sheet manifests fetched from the site
//!
//! A sheet is JSON of the form `{ "data": [ {row}, ... ] }`. A bare array of
//! rows and a multi-sheet document (`{ "experiments": { "data": [...] } }`)
//! are accepted too. Column names are case-insensitive and may be singular
//! or plural:
//!
//! | column                 | meaning                                   |
//! |------------------------|-------------------------------------------|
//! | `Experiment(s)`        | experiment id, rows are grouped by it     |
//! | `Variant(s)`           | variant id                                |
//! | `Split(s)`             | percentage of traffic                     |
//! | `Name(s)`              | variant label                             |
//! | `Url(s)`               | variant content reference                 |
//! | `Selector(s)`          | fragment mount point                      |
//! | `Page(s)`              | restricts the row to one page path        |
//! | `Label(s)`             | experiment label                          |
//! | `Content(s)`           | pre-resolved fragment markup              |

use crate::error::{ManifestError, ManifestResult};
use crate::header::{ExperimentHeader, ParseContext};
use crate::split::Split;
use crate::types::{ExperimentConfig, ExperimentType, VariantConfig, VariantSource, CONTROL};
use indexmap::IndexMap;
use serde_json::Value;

const COLUMNS: &[&str] = &[
    "experiment",
    "variant",
    "split",
    "name",
    "url",
    "selector",
    "page",
    "label",
    "content",
];

/// One normalised manifest row
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManifestRow {
    cells: IndexMap<&'static str, String>,
}

impl ManifestRow {
    /// Cell value for a canonical (singular) column, empty cells are absent
    #[must_use]
    pub fn get(&self, column: &str) -> Option<&str> {
        self.cells
            .get(column)
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
    }

    fn from_object(obj: &serde_json::Map<String, Value>) -> Self {
        let mut cells = IndexMap::new();
        for (key, value) in obj {
            let Some(column) = canonical_column(key) else {
                continue;
            };
            let text = match value {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                _ => continue,
            };
            cells.insert(column, text);
        }
        Self { cells }
    }
}

/// Map a singular or plural header to its canonical singular name
#[must_use]
pub fn canonical_column(raw: &str) -> Option<&'static str> {
    let key = raw.trim().to_ascii_lowercase();
    let singular = key.strip_suffix('s').unwrap_or(&key);
    COLUMNS
        .iter()
        .find(|c| **c == key || **c == singular)
        .copied()
}

/// Decode the rows of a sheet document
///
/// # Errors
/// - `ManifestError::Json` for malformed JSON
/// - `ManifestError::NoRows` when no sheet of row objects is found
pub fn parse_rows(body: &str) -> ManifestResult<Vec<ManifestRow>> {
    let doc: Value = serde_json::from_str(body)?;
    let rows = find_rows(&doc)
        .ok_or_else(|| ManifestError::NoRows("expected a 'data' array".to_string()))?;
    Ok(rows
        .iter()
        .filter_map(Value::as_object)
        .map(ManifestRow::from_object)
        .collect())
}

fn find_rows(doc: &Value) -> Option<&Vec<Value>> {
    match doc {
        Value::Array(rows) => Some(rows),
        Value::Object(obj) => obj
            .get("data")
            .and_then(Value::as_array)
            .or_else(|| {
                obj.iter()
                    .find(|(k, _)| canonical_column(k) == Some("experiment"))
                    .and_then(|(_, sheet)| sheet.get("data"))
                    .and_then(Value::as_array)
            }),
        _ => None,
    }
}

/// Build every experiment a sheet declares for the current page
///
/// Rows are grouped by experiment id in first-seen order. Rows whose `page`
/// differs from the current page are skipped. A variant row carrying a
/// selector makes the experiment fragment-scoped. Experiments left without
/// challengers are dropped.
///
/// # Errors
/// See [`parse_rows`]
pub fn parse_sheet(
    body: &str,
    header: &ExperimentHeader,
    ctx: &ParseContext<'_>,
) -> ManifestResult<Vec<ExperimentConfig>> {
    let rows = parse_rows(body)?;
    let mut grouped: IndexMap<String, Vec<ManifestRow>> = IndexMap::new();
    for row in rows {
        if let Some(page) = row.get("page") {
            if page != ctx.page_path() {
                continue;
            }
        }
        let Some(id) = row.get("experiment").map(str::to_string) else {
            tracing::debug!("manifest row without experiment id skipped");
            continue;
        };
        grouped.entry(id).or_default().push(row);
    }

    Ok(grouped
        .into_iter()
        .filter_map(|(id, rows)| build_experiment(&id, &rows, header, ctx))
        .collect())
}

fn build_experiment(
    id: &str,
    rows: &[ManifestRow],
    header: &ExperimentHeader,
    ctx: &ParseContext<'_>,
) -> Option<ExperimentConfig> {
    let mut header = header.clone();
    if let Some(label) = rows.iter().find_map(|r| r.get("label")) {
        header.label = Some(label.to_string());
    }

    let scope = if rows.iter().any(|r| r.get("selector").is_some()) {
        ExperimentType::Fragment
    } else {
        ctx.experiment_type
    };
    let ctx = ParseContext {
        experiment_type: scope,
        ..*ctx
    };

    let mut control = None;
    let mut challengers: Vec<(String, VariantConfig, Option<Split>)> = Vec::new();
    for row in rows {
        let Some(vid) = row.get("variant") else {
            tracing::debug!(experiment = id, "manifest row without variant id skipped");
            continue;
        };
        let split = row.get("split").and_then(Split::parse_percent);
        let selector = row.get("selector").map(str::to_string);
        let url = row.get("url").unwrap_or_default();

        if vid == CONTROL {
            let source = match row.get("content") {
                Some(markup) => VariantSource::Inline(markup.to_string()),
                None => VariantSource::Control,
            };
            let variant = VariantConfig::new(
                row.get("name").unwrap_or(CONTROL),
                if url.is_empty() { ctx.page_path() } else { url },
                source,
            )
            .with_selector(selector);
            control = Some((variant, split));
            continue;
        }

        if challengers.iter().any(|(existing, _, _)| existing == vid) {
            tracing::debug!(experiment = id, variant = vid, "duplicate variant row skipped");
            continue;
        }

        let source = match row.get("content") {
            Some(markup) => VariantSource::Inline(markup.to_string()),
            None => ctx.resolve_reference(url),
        };
        let variant =
            VariantConfig::new(row.get("name").unwrap_or(vid), url, source).with_selector(selector);
        challengers.push((vid.to_string(), variant, split));
    }

    header.build(id, &ctx, control, challengers)
}

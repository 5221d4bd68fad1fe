//! Checks every `ContentStore` backend must pass.
//!
//! Published schema versions never change, commits get fresh container ids
//! and are checked against their schema, predecessors must exist and belong
//! to the same content item, and paging a schema version visits each
//! container once even while other tasks commit.
//!
//! A backend runs the suite from its own tests, handing in a factory for
//! empty stores:
//!
//! ```ignore
//! use morph_storage::conformance::run_conformance_suite;
//!
//! #[tokio::test]
//! async fn sqlite_conformance() {
//!     let report = run_conformance_suite(|| async { create_test_store().await }).await;
//!     assert!(report.is_clean(), "{report}");
//! }
//! ```

mod chain;
mod commit;
mod concurrent;
mod listing;
mod schema;

use std::fmt;
use std::future::Future;

use morph_core::{
    FieldKind, FieldMap, FieldSchema, FieldType, FieldValue, NewContainer, SchemaVersion,
    SchemaVersionId,
};

use crate::ContentStore;

/// One named check and, when it did not hold, what the store did instead.
#[derive(Debug, Clone)]
pub struct CheckOutcome {
    /// `schema`, `commit`, `chain`, `listing` or `concurrent`.
    pub area: &'static str,
    pub check: &'static str,
    pub failure: Option<String>,
}

impl CheckOutcome {
    fn new(area: &'static str, check: &'static str, result: Result<(), String>) -> Self {
        Self {
            area,
            check,
            failure: result.err(),
        }
    }

    pub fn passed(&self) -> bool {
        self.failure.is_none()
    }
}

/// Every check of a suite run, in the order the areas ran.
#[derive(Debug, Clone, Default)]
pub struct ConformanceReport {
    pub outcomes: Vec<CheckOutcome>,
}

impl ConformanceReport {
    pub fn total(&self) -> usize {
        self.outcomes.len()
    }

    pub fn failures(&self) -> impl Iterator<Item = &CheckOutcome> {
        self.outcomes.iter().filter(|o| !o.passed())
    }

    pub fn failed(&self) -> usize {
        self.failures().count()
    }

    pub fn is_clean(&self) -> bool {
        self.failures().next().is_none()
    }
}

impl fmt::Display for ConformanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "store conformance: {} of {} checks failed",
            self.failed(),
            self.total()
        )?;
        for outcome in self.failures() {
            if let Some(failure) = &outcome.failure {
                writeln!(f, "  {}::{} {}", outcome.area, outcome.check, failure)?;
            }
        }
        Ok(())
    }
}

/// Run every area against stores built by `factory`.
///
/// Each check gets its own store, so a check may leave data behind.
pub async fn run_conformance_suite<S, F, Fut>(factory: F) -> ConformanceReport
where
    S: ContentStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut report = ConformanceReport::default();
    report.outcomes.extend(schema::run_schema_tests(&factory).await);
    report.outcomes.extend(commit::run_commit_tests(&factory).await);
    report.outcomes.extend(chain::run_chain_tests(&factory).await);
    report.outcomes.extend(listing::run_listing_tests(&factory).await);
    report.outcomes.extend(concurrent::run_concurrent_tests(&factory).await);
    report
}

// ── Fixtures ─────────────────────────────────────────────────────────────────

/// `article@version` with a string `title` and a list-of-string `tags`.
fn article(version: u32) -> SchemaVersion {
    SchemaVersion {
        name: "article".to_string(),
        version,
        fields: vec![
            FieldSchema::new("title", FieldType::single(FieldKind::String)),
            FieldSchema::new("tags", FieldType::list_of(FieldKind::String)),
        ],
    }
}

fn article_id(version: u32) -> SchemaVersionId {
    SchemaVersionId::new("article", version)
}

fn draft(content_id: &str, title: &str) -> NewContainer {
    let mut fields = FieldMap::new();
    fields.insert("title".to_string(), FieldValue::String(title.to_string()));
    NewContainer {
        content_id: content_id.to_string(),
        schema: article_id(1),
        fields,
        predecessor: None,
    }
}

/// Fresh store with `article@1` already published.
async fn store_with_article<S, F, Fut>(factory: &F) -> Result<S, String>
where
    S: ContentStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory().await;
    store
        .publish_schema(article(1))
        .await
        .map_err(|e| format!("publish article@1: {e}"))?;
    Ok(store)
}

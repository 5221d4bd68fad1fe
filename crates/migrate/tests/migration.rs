//! End-to-end migrations against the in-memory store.
//!
//! Covers built-in conversions, renames and removals, custom scripts
//! (well-behaved, throwing, host-escaping, looping, mistyped), planning
//! errors, paging and repeated runs.

use std::collections::BTreeSet;
use std::sync::Arc;

use morph_core::{
    ContainerId, ContentContainer, FieldKind, FieldMap, FieldSchema, FieldType, FieldValue,
    NewContainer, SchemaVersion, SchemaVersionId,
};
use morph_migrate::{
    ContainerOutcome, MigrationConfig, MigrationError, MigrationErrorKind, MigrationOrchestrator,
    MigrationRequest, MigrationStatus,
};
use morph_storage::{ContentStore, MemoryStore, StorageError};

// ──────────────────────────────────────────────
// Fixtures
// ──────────────────────────────────────────────

const PREPEND_SCRIPT: &str = "function migrate(node, fieldname) {node.fields[fieldname] = 'modified ' + node.fields[fieldname]; return node;}";

const KILLER_SCRIPT: &str = "function migrate(node, fieldname) { System.exit(0); return node; }";

const INVALID_SCRIPT: &str = "function migrate(node, fieldname) { node.fields[fieldname] = 'x' return node;";

fn html(name: &str) -> FieldSchema {
    FieldSchema::new(name, FieldType::single(FieldKind::Html))
}

fn article(version: u32, fields: Vec<FieldSchema>) -> SchemaVersion {
    SchemaVersion::new("article", version, fields).unwrap()
}

fn v(version: u32) -> SchemaVersionId {
    SchemaVersionId::new("article", version)
}

fn config() -> MigrationConfig {
    MigrationConfig {
        workers: 4,
        page_size: 3,
        retry_backoff_ms: 1,
        ..MigrationConfig::default()
    }
}

/// Publish both schemas and commit one `article@1` container per entry.
async fn seed(
    from: SchemaVersion,
    to: SchemaVersion,
    containers: Vec<(&str, FieldValue)>,
) -> (Arc<MemoryStore>, Vec<ContentContainer>) {
    let store = Arc::new(MemoryStore::new());
    store.publish_schema(from).await.unwrap();
    store.publish_schema(to).await.unwrap();
    let mut committed = Vec::new();
    for (i, (field, value)) in containers.into_iter().enumerate() {
        let mut fields = FieldMap::new();
        fields.insert(field.to_string(), value);
        let c = store
            .commit_container(NewContainer {
                content_id: format!("content-{i}"),
                schema: v(1),
                fields,
                predecessor: None,
            })
            .await
            .unwrap();
        committed.push(c);
    }
    (store, committed)
}

async fn html_store(values: &[&str]) -> (Arc<MemoryStore>, Vec<ContentContainer>) {
    seed(
        article(1, vec![html("content")]),
        article(2, vec![html("content")]),
        values
            .iter()
            .map(|s| ("content", FieldValue::Html(s.to_string())))
            .collect(),
    )
    .await
}

async fn migrated_fields(store: &MemoryStore, outcome: &ContainerOutcome) -> FieldMap {
    match outcome {
        ContainerOutcome::Success { migrated, .. } => {
            store.get_container(migrated).await.unwrap().fields
        }
        ContainerOutcome::Failure { detail, .. } => panic!("expected success, got {detail}"),
    }
}

// ──────────────────────────────────────────────
// Custom scripts
// ──────────────────────────────────────────────

#[tokio::test]
async fn script_prepends_to_html_field() {
    let (store, sources) = html_store(&["<b>HTML</b> content"]).await;
    let orchestrator = MigrationOrchestrator::new(store.clone(), config());
    let request = MigrationRequest::new(v(1), v(2)).script("content", PREPEND_SCRIPT);

    let report = orchestrator.run(&request).await.unwrap();
    assert_eq!(report.status, MigrationStatus::Completed);
    assert_eq!(report.attempted, 1);
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.scripts["content"].len(), 64);

    let fields = migrated_fields(&store, &report.outcomes[0]).await;
    assert_eq!(
        fields.get("content"),
        Some(&FieldValue::Html("modified <b>HTML</b> content".into()))
    );

    let migrated = match &report.outcomes[0] {
        ContainerOutcome::Success { migrated, .. } => migrated.clone(),
        _ => unreachable!(),
    };
    let new = store.get_container(&migrated).await.unwrap();
    assert_eq!(new.schema, v(2));
    assert_eq!(new.predecessor.as_ref(), Some(&sources[0].id));
}

#[tokio::test]
async fn killer_script_fails_containers_and_host_survives() {
    let (store, _) = html_store(&["a", "b"]).await;
    let orchestrator = MigrationOrchestrator::new(store.clone(), config());
    let request = MigrationRequest::new(v(1), v(2)).script("content", KILLER_SCRIPT);

    let report = orchestrator.run(&request).await.unwrap();
    assert_eq!(report.status, MigrationStatus::Completed);
    assert_eq!(report.failed, 2);
    for outcome in &report.outcomes {
        match outcome {
            ContainerOutcome::Failure { kind, field, .. } => {
                assert_eq!(*kind, MigrationErrorKind::ScriptSecurityViolation);
                assert_eq!(field.as_deref(), Some("content"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }
    // Only the two sources exist; nothing was committed.
    assert_eq!(store.container_count().await, 2);
}

#[tokio::test]
async fn invalid_script_aborts_before_any_container() {
    let (store, _) = html_store(&["a", "b"]).await;
    let orchestrator = MigrationOrchestrator::new(store.clone(), config());
    let request = MigrationRequest::new(v(1), v(2)).script("content", INVALID_SCRIPT);

    let err = orchestrator.run(&request).await.unwrap_err();
    assert_eq!(err.kind(), MigrationErrorKind::ScriptCompile);
    assert!(matches!(err, MigrationError::Compile { ref field, .. } if field == "content"));
    assert_eq!(store.container_count().await, 2);
}

#[tokio::test]
async fn throwing_script_only_fails_its_container() {
    let (store, _) = html_store(&["fine", "bad", "also fine"]).await;
    let orchestrator = MigrationOrchestrator::new(store.clone(), config());
    let script = "function migrate(node, f) {\n\
        if (node.fields[f] == 'bad') { throw 'cannot migrate ' + node.uuid; }\n\
        node.fields[f] = node.fields[f].toUpperCase();\n\
        return node;\n\
    }";
    let request = MigrationRequest::new(v(1), v(2)).script("content", script);

    let report = orchestrator.run(&request).await.unwrap();
    assert_eq!(report.status, MigrationStatus::Completed);
    assert_eq!(report.attempted, 3);
    assert_eq!(report.succeeded, 2);

    let failure = report.failures().next().unwrap();
    assert_eq!(failure.content_id(), "content-1");
    match failure {
        ContainerOutcome::Failure { kind, detail, .. } => {
            assert_eq!(*kind, MigrationErrorKind::ScriptRuntime);
            assert!(detail.contains("cannot migrate content-1"), "{detail}");
        }
        _ => unreachable!(),
    }

    for outcome in report.outcomes.iter().filter(|o| o.is_success()) {
        let fields = migrated_fields(&store, outcome).await;
        assert!(matches!(fields.get("content"), Some(FieldValue::Html(s)) if s == &s.to_uppercase()));
    }
}

#[tokio::test]
async fn looping_script_times_out_per_container() {
    let (store, _) = html_store(&["a"]).await;
    let config = MigrationConfig {
        script_timeout_ms: 50,
        ..config()
    };
    let orchestrator = MigrationOrchestrator::new(store, config);
    let request = MigrationRequest::new(v(1), v(2))
        .script("content", "function migrate(node, f) { while (true) {} }");

    let report = orchestrator.run(&request).await.unwrap();
    assert_eq!(report.status, MigrationStatus::Completed);
    assert!(matches!(
        &report.outcomes[0],
        ContainerOutcome::Failure { kind: MigrationErrorKind::ScriptTimeout, .. }
    ));
}

#[tokio::test]
async fn mistyped_script_result_is_a_soft_failure() {
    let (store, _) = html_store(&["a"]).await;
    let orchestrator = MigrationOrchestrator::new(store.clone(), config());
    let request = MigrationRequest::new(v(1), v(2))
        .script("content", "function migrate(node, f) { node.fields[f] = [1, 2]; return node; }");

    let report = orchestrator.run(&request).await.unwrap();
    assert_eq!(report.succeeded, 1);
    match &report.outcomes[0] {
        ContainerOutcome::Success { soft_failures, .. } => {
            assert_eq!(soft_failures.len(), 1);
            assert_eq!(soft_failures[0].field, "content");
        }
        other => panic!("expected success, got {other:?}"),
    }
    let fields = migrated_fields(&store, &report.outcomes[0]).await;
    assert!(!fields.contains_key("content"));
}

#[tokio::test]
async fn script_passes_full_range_integers_through_unchanged() {
    let number = FieldSchema::new("n", FieldType::single(FieldKind::Number));
    let values = [
        9_007_199_254_740_992_i64,
        9_007_199_254_740_993,
        -9_007_199_254_740_993,
        i64::MAX,
        1_700_000_000_000,
    ];
    let (store, sources) = seed(
        article(1, vec![number.clone()]),
        article(2, vec![number]),
        values.iter().map(|n| ("n", FieldValue::Number(*n))).collect(),
    )
    .await;
    let orchestrator = MigrationOrchestrator::new(store.clone(), config());
    let request = MigrationRequest::new(v(1), v(2))
        .script("n", "function migrate(node, f) { return node; }");

    let report = orchestrator.run(&request).await.unwrap();
    assert_eq!(report.succeeded, values.len());
    for (source, expected) in sources.iter().zip(values) {
        let outcome = report.outcome_for(&source.id).unwrap();
        match outcome {
            ContainerOutcome::Success { soft_failures, .. } => {
                assert!(soft_failures.is_empty(), "{expected}: {soft_failures:?}");
            }
            other => panic!("expected success, got {other:?}"),
        }
        let fields = migrated_fields(&store, outcome).await;
        assert_eq!(fields.get("n"), Some(&FieldValue::Number(expected)));
    }
}

#[tokio::test]
async fn script_arithmetic_on_dates_yields_integers() {
    let date = FieldSchema::new("published", FieldType::single(FieldKind::Date));
    let (store, _) = seed(
        article(1, vec![date.clone()]),
        article(2, vec![date]),
        vec![("published", FieldValue::Date(1_700_000_000_000))],
    )
    .await;
    let orchestrator = MigrationOrchestrator::new(store.clone(), config());
    let request = MigrationRequest::new(v(1), v(2)).script(
        "published",
        "function migrate(node, f) { node.fields[f] = node.fields[f] + 86400000; return node; }",
    );

    let report = orchestrator.run(&request).await.unwrap();
    let fields = migrated_fields(&store, &report.outcomes[0]).await;
    assert_eq!(fields.get("published"), Some(&FieldValue::Date(1_700_000_086_400_000)));
}

// ──────────────────────────────────────────────
// Built-in operations
// ──────────────────────────────────────────────

#[tokio::test]
async fn html_to_date_converts_numeric_text_and_drops_the_rest() {
    let (store, sources) = seed(
        article(1, vec![html("content")]),
        article(2, vec![FieldSchema::new("content", FieldType::single(FieldKind::Date))]),
        vec![
            ("content", FieldValue::Html("0".into())),
            ("content", FieldValue::Html("1".into())),
            ("content", FieldValue::Html("some text".into())),
        ],
    )
    .await;
    let orchestrator = MigrationOrchestrator::new(store.clone(), config());
    let report = orchestrator
        .run(&MigrationRequest::new(v(1), v(2)))
        .await
        .unwrap();
    assert_eq!(report.succeeded, 3);

    let expected = [Some(FieldValue::Date(0)), Some(FieldValue::Date(1)), None];
    for (source, expected) in sources.iter().zip(expected) {
        let outcome = report.outcome_for(&source.id).unwrap();
        let fields = migrated_fields(&store, outcome).await;
        assert_eq!(fields.get("content").cloned(), expected);
        if let ContainerOutcome::Success { dropped_fields, .. } = outcome {
            assert_eq!(dropped_fields.is_empty(), expected.is_some());
        }
    }
}

#[tokio::test]
async fn html_to_boolean_follows_the_matrix() {
    let values = ["true", "1", "false", "0", "some text"];
    let (store, sources) = seed(
        article(1, vec![html("flag")]),
        article(2, vec![FieldSchema::new("flag", FieldType::single(FieldKind::Boolean))]),
        values
            .iter()
            .map(|s| ("flag", FieldValue::Html(s.to_string())))
            .collect(),
    )
    .await;
    let orchestrator = MigrationOrchestrator::new(store.clone(), config());
    let report = orchestrator
        .run(&MigrationRequest::new(v(1), v(2)))
        .await
        .unwrap();

    let expected = [Some(true), Some(true), Some(false), Some(false), None];
    for (source, expected) in sources.iter().zip(expected) {
        let fields = migrated_fields(&store, report.outcome_for(&source.id).unwrap()).await;
        assert_eq!(fields.get("flag").cloned(), expected.map(FieldValue::Boolean));
    }
}

#[tokio::test]
async fn html_to_html_list_wraps_the_original_string() {
    let (store, _) = seed(
        article(1, vec![html("content")]),
        article(2, vec![FieldSchema::new("content", FieldType::list_of(FieldKind::Html))]),
        vec![("content", FieldValue::Html("<b>HTML</b> content".into()))],
    )
    .await;
    let orchestrator = MigrationOrchestrator::new(store.clone(), config());
    let report = orchestrator
        .run(&MigrationRequest::new(v(1), v(2)))
        .await
        .unwrap();
    let fields = migrated_fields(&store, &report.outcomes[0]).await;
    assert_eq!(
        fields.get("content"),
        Some(&FieldValue::HtmlList(vec!["<b>HTML</b> content".into()]))
    );
}

#[tokio::test]
async fn rename_and_remove_reshape_the_field_map() {
    let store = Arc::new(MemoryStore::new());
    store
        .publish_schema(article(1, vec![html("content"), html("teaser")]))
        .await
        .unwrap();
    store
        .publish_schema(article(2, vec![html("body")]))
        .await
        .unwrap();
    let mut fields = FieldMap::new();
    fields.insert("content".into(), FieldValue::Html("<p>body</p>".into()));
    fields.insert("teaser".into(), FieldValue::Html("short".into()));
    store
        .commit_container(NewContainer {
            content_id: "c1".into(),
            schema: v(1),
            fields,
            predecessor: None,
        })
        .await
        .unwrap();

    let orchestrator = MigrationOrchestrator::new(store.clone(), config());
    let report = orchestrator
        .run(&MigrationRequest::new(v(1), v(2)).rename("content", "body"))
        .await
        .unwrap();
    let fields = migrated_fields(&store, &report.outcomes[0]).await;
    assert_eq!(fields.len(), 1);
    assert_eq!(fields.get("body"), Some(&FieldValue::Html("<p>body</p>".into())));
}

#[tokio::test]
async fn unchanged_fields_carry_over_verbatim() {
    let (store, sources) = html_store(&["<p>same</p>"]).await;
    let orchestrator = MigrationOrchestrator::new(store.clone(), config());
    let plan = orchestrator
        .plan(&MigrationRequest::new(v(1), v(2)))
        .await
        .unwrap();
    assert!(plan.operations.is_empty());

    let report = orchestrator
        .run(&MigrationRequest::new(v(1), v(2)))
        .await
        .unwrap();
    let fields = migrated_fields(&store, &report.outcomes[0]).await;
    assert_eq!(fields, sources[0].fields);
}

// ──────────────────────────────────────────────
// Planning errors
// ──────────────────────────────────────────────

#[tokio::test]
async fn ambiguous_rename_aborts_planning() {
    let store = Arc::new(MemoryStore::new());
    store
        .publish_schema(article(1, vec![html("a"), html("b")]))
        .await
        .unwrap();
    store
        .publish_schema(article(2, vec![html("c")]))
        .await
        .unwrap();
    let orchestrator = MigrationOrchestrator::new(store.clone(), config());
    let err = orchestrator
        .run(&MigrationRequest::new(v(1), v(2)).rename("a", "c").rename("b", "c"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), MigrationErrorKind::SchemaComparison);
    assert_eq!(store.container_count().await, 0);
}

#[tokio::test]
async fn unknown_schema_version_is_a_store_error() {
    let (store, _) = html_store(&["a"]).await;
    let orchestrator = MigrationOrchestrator::new(store, config());
    let err = orchestrator
        .run(&MigrationRequest::new(v(1), v(7)))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        MigrationError::Store(StorageError::SchemaNotFound { .. })
    ));
    assert_eq!(err.kind(), MigrationErrorKind::StoreRead);
}

// ──────────────────────────────────────────────
// Paging and repeated runs
// ──────────────────────────────────────────────

#[tokio::test]
async fn every_container_is_attempted_exactly_once() {
    let values: Vec<String> = (0..17).map(|i| format!("<p>{i}</p>")).collect();
    let refs: Vec<&str> = values.iter().map(String::as_str).collect();
    let (store, sources) = html_store(&refs).await;
    let orchestrator = MigrationOrchestrator::new(store.clone(), config());

    let report = orchestrator
        .run(&MigrationRequest::new(v(1), v(2)).script("content", PREPEND_SCRIPT))
        .await
        .unwrap();
    assert_eq!(report.attempted, 17);
    assert_eq!(report.succeeded, 17);

    let attempted: BTreeSet<&ContainerId> = report.outcomes.iter().map(|o| o.source()).collect();
    let expected: BTreeSet<&ContainerId> = sources.iter().map(|c| &c.id).collect();
    assert_eq!(attempted, expected);
    assert_eq!(store.container_count().await, 34);
}

#[tokio::test]
async fn second_run_builds_an_independent_chain() {
    let (store, sources) = html_store(&["x"]).await;
    let orchestrator = MigrationOrchestrator::new(store.clone(), config());
    let request = MigrationRequest::new(v(1), v(2)).script("content", PREPEND_SCRIPT);

    let first = orchestrator.run(&request).await.unwrap();
    let first_id = match &first.outcomes[0] {
        ContainerOutcome::Success { migrated, .. } => migrated.clone(),
        other => panic!("{other:?}"),
    };
    let first_container = store.get_container(&first_id).await.unwrap();

    let second = orchestrator.run(&request).await.unwrap();
    assert_eq!(second.attempted, 1, "second run must not revisit article@2 output");
    let second_id = match &second.outcomes[0] {
        ContainerOutcome::Success { migrated, .. } => migrated.clone(),
        other => panic!("{other:?}"),
    };
    assert_ne!(first_id, second_id);

    // Both runs branch from the same source and neither touched the other.
    let second_container = store.get_container(&second_id).await.unwrap();
    assert_eq!(second_container.predecessor.as_ref(), Some(&sources[0].id));
    assert_eq!(store.get_container(&first_id).await.unwrap(), first_container);
    assert_eq!(second_container.fields, first_container.fields);
    assert_eq!(store.get_container(&sources[0].id).await.unwrap(), sources[0]);
    assert_eq!(store.list_versions("content-0").await.unwrap().len(), 3);
}

#[tokio::test]
async fn report_serializes_for_callers() {
    let (store, _) = html_store(&["a"]).await;
    let orchestrator = MigrationOrchestrator::new(store, config());
    let report = orchestrator
        .run(&MigrationRequest::new(v(1), v(2)).script("content", KILLER_SCRIPT))
        .await
        .unwrap();
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["status"], "completed");
    assert_eq!(json["from"]["name"], "article");
    assert_eq!(json["outcomes"][0]["result"], "failure");
    assert_eq!(json["outcomes"][0]["kind"], "SCRIPT_SECURITY_VIOLATION");
    assert_eq!(json["outcomes"][0]["content_id"], "content-0");
}

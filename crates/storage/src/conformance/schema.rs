use std::future::Future;

use morph_core::{FieldKind, FieldSchema, FieldType, SchemaVersion, SchemaVersionId};

use super::{article, article_id, CheckOutcome};
use crate::{ContentStore, StorageError};

pub(super) async fn run_schema_tests<S, F, Fut>(factory: &F) -> Vec<CheckOutcome>
where
    S: ContentStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        CheckOutcome::new(
            "schema",
            "publish_then_get_returns_same_schema",
            publish_then_get_returns_same_schema(factory).await,
        ),
        CheckOutcome::new(
            "schema",
            "republish_is_rejected",
            republish_is_rejected(factory).await,
        ),
        CheckOutcome::new(
            "schema",
            "unknown_schema_not_found",
            unknown_schema_not_found(factory).await,
        ),
        CheckOutcome::new(
            "schema",
            "duplicate_field_names_rejected",
            duplicate_field_names_rejected(factory).await,
        ),
        CheckOutcome::new(
            "schema",
            "list_schemas_is_ordered",
            list_schemas_is_ordered(factory).await,
        ),
    ]
}

async fn publish_then_get_returns_same_schema<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ContentStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory().await;
    store
        .publish_schema(article(1))
        .await
        .map_err(|e| format!("publish: {e}"))?;
    let got = store
        .get_schema(&article_id(1))
        .await
        .map_err(|e| format!("get: {e}"))?;
    if got != article(1) {
        return Err(format!("schema changed on round trip: {got:?}"));
    }
    Ok(())
}

async fn republish_is_rejected<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ContentStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory().await;
    store
        .publish_schema(article(1))
        .await
        .map_err(|e| format!("publish: {e}"))?;

    let mut changed = article(1);
    changed.fields.pop();
    match store.publish_schema(changed).await {
        Err(StorageError::SchemaAlreadyPublished { .. }) => {}
        Err(e) => return Err(format!("expected SchemaAlreadyPublished, got {e}")),
        Ok(()) => return Err("republishing article@1 succeeded".into()),
    }

    let got = store
        .get_schema(&article_id(1))
        .await
        .map_err(|e| format!("get: {e}"))?;
    if got.fields.len() != 2 {
        return Err("published schema was modified by a rejected republish".into());
    }
    Ok(())
}

async fn unknown_schema_not_found<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ContentStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory().await;
    match store.get_schema(&SchemaVersionId::new("ghost", 1)).await {
        Err(StorageError::SchemaNotFound { schema }) if schema.name == "ghost" => Ok(()),
        Err(e) => Err(format!("expected SchemaNotFound, got {e}")),
        Ok(s) => Err(format!("unexpected schema {s:?}")),
    }
}

async fn duplicate_field_names_rejected<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ContentStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory().await;
    let bad = SchemaVersion {
        name: "dup".to_string(),
        version: 1,
        fields: vec![
            FieldSchema::new("a", FieldType::single(FieldKind::String)),
            FieldSchema::new("a", FieldType::single(FieldKind::Number)),
        ],
    };
    match store.publish_schema(bad).await {
        Err(StorageError::InvalidSchema(_)) => Ok(()),
        Err(e) => Err(format!("expected InvalidSchema, got {e}")),
        Ok(()) => Err("schema with duplicate field names was accepted".into()),
    }
}

async fn list_schemas_is_ordered<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ContentStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory().await;
    for v in [2, 1, 3] {
        store
            .publish_schema(article(v))
            .await
            .map_err(|e| format!("publish v{v}: {e}"))?;
    }
    let ids = store
        .list_schemas()
        .await
        .map_err(|e| format!("list: {e}"))?;
    let expected = vec![article_id(1), article_id(2), article_id(3)];
    if ids != expected {
        return Err(format!("expected {expected:?}, got {ids:?}"));
    }
    Ok(())
}

use std::collections::BTreeSet;
use std::future::Future;

use morph_core::{ContainerId, ConformanceError, FieldValue, SchemaVersionId};

use super::{draft, store_with_article, CheckOutcome};
use crate::{ContentStore, StorageError};

pub(super) async fn run_commit_tests<S, F, Fut>(factory: &F) -> Vec<CheckOutcome>
where
    S: ContentStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        CheckOutcome::new(
            "commit",
            "commit_assigns_unique_ids",
            commit_assigns_unique_ids(factory).await,
        ),
        CheckOutcome::new(
            "commit",
            "commit_roundtrips_fields",
            commit_roundtrips_fields(factory).await,
        ),
        CheckOutcome::new(
            "commit",
            "commit_to_unknown_schema_rejected",
            commit_to_unknown_schema_rejected(factory).await,
        ),
        CheckOutcome::new(
            "commit",
            "unknown_field_rejected",
            unknown_field_rejected(factory).await,
        ),
        CheckOutcome::new(
            "commit",
            "type_mismatch_rejected",
            type_mismatch_rejected(factory).await,
        ),
        CheckOutcome::new(
            "commit",
            "rejected_commit_leaves_no_trace",
            rejected_commit_leaves_no_trace(factory).await,
        ),
        CheckOutcome::new(
            "commit",
            "unknown_container_not_found",
            unknown_container_not_found(factory).await,
        ),
    ]
}

async fn commit_assigns_unique_ids<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ContentStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = store_with_article(factory).await?;
    let mut ids = BTreeSet::new();
    for i in 0..5 {
        let c = store
            .commit_container(draft(&format!("c{i}"), "t"))
            .await
            .map_err(|e| format!("commit {i}: {e}"))?;
        if !ids.insert(c.id.clone()) {
            return Err(format!("id {} assigned twice", c.id));
        }
        if c.created_at.is_empty() {
            return Err(format!("container {} has no created_at", c.id));
        }
    }
    Ok(())
}

async fn commit_roundtrips_fields<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ContentStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = store_with_article(factory).await?;
    let mut new = draft("c1", "Hello");
    new.fields.insert(
        "tags".to_string(),
        FieldValue::StringList(vec!["a".into(), "".into()]),
    );
    let committed = store
        .commit_container(new.clone())
        .await
        .map_err(|e| format!("commit: {e}"))?;
    let read = store
        .get_container(&committed.id)
        .await
        .map_err(|e| format!("get: {e}"))?;
    if read != committed {
        return Err(format!("read {read:?} differs from committed {committed:?}"));
    }
    if read.fields != new.fields || read.content_id != "c1" || read.predecessor.is_some() {
        return Err(format!("stored container lost data: {read:?}"));
    }
    Ok(())
}

async fn commit_to_unknown_schema_rejected<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ContentStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = store_with_article(factory).await?;
    let mut new = draft("c1", "t");
    new.schema = SchemaVersionId::new("article", 9);
    match store.commit_container(new).await {
        Err(StorageError::SchemaNotFound { .. }) => Ok(()),
        Err(e) => Err(format!("expected SchemaNotFound, got {e}")),
        Ok(c) => Err(format!("commit to unknown schema succeeded: {}", c.id)),
    }
}

async fn unknown_field_rejected<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ContentStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = store_with_article(factory).await?;
    let mut new = draft("c1", "t");
    new.fields
        .insert("body".to_string(), FieldValue::Html("<p/>".into()));
    match store.commit_container(new).await {
        Err(StorageError::InvalidContainer(ConformanceError::UnknownField { field, .. }))
            if field == "body" =>
        {
            Ok(())
        }
        Err(e) => Err(format!("expected InvalidContainer(UnknownField), got {e}")),
        Ok(c) => Err(format!("container with unknown field committed: {}", c.id)),
    }
}

async fn type_mismatch_rejected<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ContentStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = store_with_article(factory).await?;
    let mut new = draft("c1", "t");
    new.fields
        .insert("tags".to_string(), FieldValue::String("single".into()));
    match store.commit_container(new).await {
        Err(StorageError::InvalidContainer(ConformanceError::TypeMismatch { .. })) => Ok(()),
        Err(e) => Err(format!("expected InvalidContainer(TypeMismatch), got {e}")),
        Ok(c) => Err(format!("mistyped container committed: {}", c.id)),
    }
}

async fn rejected_commit_leaves_no_trace<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ContentStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = store_with_article(factory).await?;
    let mut bad = draft("c1", "t");
    bad.fields
        .insert("nope".to_string(), FieldValue::Boolean(true));
    if store.commit_container(bad).await.is_ok() {
        return Err("invalid container was committed".into());
    }
    let versions = store
        .list_versions("c1")
        .await
        .map_err(|e| format!("list_versions: {e}"))?;
    if !versions.is_empty() {
        return Err(format!("rejected commit is visible: {versions:?}"));
    }
    Ok(())
}

async fn unknown_container_not_found<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ContentStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = store_with_article(factory).await?;
    match store.get_container(&ContainerId::new("missing")).await {
        Err(StorageError::ContainerNotFound { .. }) => Ok(()),
        Err(e) => Err(format!("expected ContainerNotFound, got {e}")),
        Ok(c) => Err(format!("unexpected container {}", c.id)),
    }
}

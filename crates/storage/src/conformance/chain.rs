use std::future::Future;

use morph_core::{ContainerId, FieldValue};

use super::{draft, store_with_article, CheckOutcome};
use crate::{ContentStore, StorageError};

pub(super) async fn run_chain_tests<S, F, Fut>(factory: &F) -> Vec<CheckOutcome>
where
    S: ContentStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        CheckOutcome::new(
            "chain",
            "successor_references_predecessor",
            successor_references_predecessor(factory).await,
        ),
        CheckOutcome::new(
            "chain",
            "missing_predecessor_rejected",
            missing_predecessor_rejected(factory).await,
        ),
        CheckOutcome::new(
            "chain",
            "foreign_predecessor_rejected",
            foreign_predecessor_rejected(factory).await,
        ),
        CheckOutcome::new(
            "chain",
            "predecessor_unchanged_by_successor",
            predecessor_unchanged_by_successor(factory).await,
        ),
        CheckOutcome::new(
            "chain",
            "independent_successors_of_one_predecessor",
            independent_successors_of_one_predecessor(factory).await,
        ),
    ]
}

async fn successor_references_predecessor<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ContentStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = store_with_article(factory).await?;
    let first = store
        .commit_container(draft("c1", "v1"))
        .await
        .map_err(|e| format!("commit v1: {e}"))?;
    let mut next = draft("c1", "v2");
    next.predecessor = Some(first.id.clone());
    let second = store
        .commit_container(next)
        .await
        .map_err(|e| format!("commit v2: {e}"))?;

    if second.predecessor.as_ref() != Some(&first.id) {
        return Err(format!(
            "expected predecessor {}, got {:?}",
            first.id, second.predecessor
        ));
    }
    let versions = store
        .list_versions("c1")
        .await
        .map_err(|e| format!("list_versions: {e}"))?;
    let ids: Vec<&ContainerId> = versions.iter().map(|c| &c.id).collect();
    if ids != vec![&first.id, &second.id] {
        return Err(format!("expected versions in commit order, got {ids:?}"));
    }
    Ok(())
}

async fn missing_predecessor_rejected<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ContentStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = store_with_article(factory).await?;
    let mut new = draft("c1", "t");
    new.predecessor = Some(ContainerId::new("nowhere"));
    match store.commit_container(new).await {
        Err(StorageError::ContainerNotFound { id }) if id.as_str() == "nowhere" => Ok(()),
        Err(e) => Err(format!("expected ContainerNotFound, got {e}")),
        Ok(c) => Err(format!("dangling predecessor accepted: {}", c.id)),
    }
}

async fn foreign_predecessor_rejected<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ContentStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = store_with_article(factory).await?;
    let other = store
        .commit_container(draft("c2", "other"))
        .await
        .map_err(|e| format!("commit c2: {e}"))?;
    let mut new = draft("c1", "t");
    new.predecessor = Some(other.id);
    match store.commit_container(new).await {
        Err(StorageError::PredecessorMismatch { .. }) => Ok(()),
        Err(e) => Err(format!("expected PredecessorMismatch, got {e}")),
        Ok(c) => Err(format!("cross-content predecessor accepted: {}", c.id)),
    }
}

async fn predecessor_unchanged_by_successor<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ContentStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = store_with_article(factory).await?;
    let first = store
        .commit_container(draft("c1", "original"))
        .await
        .map_err(|e| format!("commit v1: {e}"))?;
    let mut next = draft("c1", "rewritten");
    next.predecessor = Some(first.id.clone());
    store
        .commit_container(next)
        .await
        .map_err(|e| format!("commit v2: {e}"))?;

    let reread = store
        .get_container(&first.id)
        .await
        .map_err(|e| format!("get v1: {e}"))?;
    if reread != first {
        return Err(format!("predecessor changed after successor commit: {reread:?}"));
    }
    if reread.fields.get("title") != Some(&FieldValue::String("original".into())) {
        return Err("predecessor lost its original title".into());
    }
    Ok(())
}

/// The chain is append-only, not linear: two successors of one container
/// are both kept and neither affects the other.
async fn independent_successors_of_one_predecessor<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ContentStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = store_with_article(factory).await?;
    let root = store
        .commit_container(draft("c1", "root"))
        .await
        .map_err(|e| format!("commit root: {e}"))?;

    let mut a = draft("c1", "a");
    a.predecessor = Some(root.id.clone());
    let mut b = draft("c1", "b");
    b.predecessor = Some(root.id.clone());
    let a = store
        .commit_container(a)
        .await
        .map_err(|e| format!("commit a: {e}"))?;
    let b = store
        .commit_container(b)
        .await
        .map_err(|e| format!("commit b: {e}"))?;

    if a.id == b.id {
        return Err("successors share an id".into());
    }
    for (c, title) in [(&a, "a"), (&b, "b")] {
        let read = store
            .get_container(&c.id)
            .await
            .map_err(|e| format!("get {}: {e}", c.id))?;
        if read.fields.get("title") != Some(&FieldValue::String(title.into())) {
            return Err(format!("successor {} has wrong title", c.id));
        }
    }
    Ok(())
}

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;

use super::{article_id, draft, store_with_article, CheckOutcome};
use crate::{ContentStore, StorageError};

/// Number of concurrent tasks to spawn in each test.
const N: usize = 10;

pub(super) async fn run_concurrent_tests<S, F, Fut>(factory: &F) -> Vec<CheckOutcome>
where
    S: ContentStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        CheckOutcome::new(
            "concurrent",
            "concurrent_commits_all_succeed",
            concurrent_commits_all_succeed(factory).await,
        ),
        CheckOutcome::new(
            "concurrent",
            "concurrent_successors_all_kept",
            concurrent_successors_all_kept(factory).await,
        ),
        CheckOutcome::new(
            "concurrent",
            "reads_during_commits_see_whole_containers",
            reads_during_commits_see_whole_containers(factory).await,
        ),
    ]
}

// ── Unrelated commits: no false conflicts ───────────────────────────────────

/// N tasks each commit a container for a different content instance. All
/// succeed and every id is distinct.
async fn concurrent_commits_all_succeed<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ContentStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = Arc::new(store_with_article(factory).await?);

    let mut handles = Vec::new();
    for i in 0..N {
        let s = store.clone();
        handles.push(tokio::spawn(async move {
            s.commit_container(draft(&format!("c{i}"), "t")).await
        }));
    }

    let mut ids = BTreeSet::new();
    for handle in handles {
        let c = handle
            .await
            .map_err(|e| format!("task panic: {e}"))?
            .map_err(|e: StorageError| format!("storage error: {e}"))?;
        ids.insert(c.id);
    }
    if ids.len() != N {
        return Err(format!("expected {N} distinct ids, got {}", ids.len()));
    }
    Ok(())
}

// ── Same predecessor from many tasks ────────────────────────────────────────

/// N tasks each commit a successor of the same container. The store is
/// append-only, so every successor is kept as its own version.
async fn concurrent_successors_all_kept<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ContentStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = Arc::new(store_with_article(factory).await?);
    let root = store
        .commit_container(draft("c1", "root"))
        .await
        .map_err(|e| format!("commit root: {e}"))?;

    let mut handles = Vec::new();
    for i in 0..N {
        let s = store.clone();
        let pred = root.id.clone();
        handles.push(tokio::spawn(async move {
            let mut next = draft("c1", &format!("v{i}"));
            next.predecessor = Some(pred);
            s.commit_container(next).await
        }));
    }
    for handle in handles {
        handle
            .await
            .map_err(|e| format!("task panic: {e}"))?
            .map_err(|e: StorageError| format!("storage error: {e}"))?;
    }

    let versions = store
        .list_versions("c1")
        .await
        .map_err(|e| format!("list_versions: {e}"))?;
    if versions.len() != N + 1 {
        return Err(format!("expected {} versions, got {}", N + 1, versions.len()));
    }
    if versions
        .iter()
        .skip(1)
        .any(|v| v.predecessor.as_ref() != Some(&root.id))
    {
        return Err("a successor lost its predecessor link".into());
    }
    Ok(())
}

// ── Readers alongside writers ───────────────────────────────────────────────

/// Listing while commits are in flight never yields a partially written
/// container.
async fn reads_during_commits_see_whole_containers<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ContentStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = Arc::new(store_with_article(factory).await?);

    let writer = {
        let s = store.clone();
        tokio::spawn(async move {
            for i in 0..N {
                s.commit_container(draft(&format!("c{i}"), "title")).await?;
                tokio::task::yield_now().await;
            }
            Ok::<(), StorageError>(())
        })
    };
    let reader = {
        let s = store.clone();
        tokio::spawn(async move {
            for _ in 0..N {
                let page = s.list_containers(&article_id(1), None, 100).await?;
                for c in &page.containers {
                    if c.fields.get("title").is_none() || c.created_at.is_empty() {
                        return Ok::<bool, StorageError>(false);
                    }
                }
                tokio::task::yield_now().await;
            }
            Ok(true)
        })
    };

    writer
        .await
        .map_err(|e| format!("writer panic: {e}"))?
        .map_err(|e| format!("writer: {e}"))?;
    let whole = reader
        .await
        .map_err(|e| format!("reader panic: {e}"))?
        .map_err(|e| format!("reader: {e}"))?;
    if !whole {
        return Err("reader observed a partially written container".into());
    }
    Ok(())
}

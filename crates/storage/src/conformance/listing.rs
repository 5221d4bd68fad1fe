use std::collections::BTreeSet;
use std::future::Future;

use morph_core::SchemaVersionId;

use super::{article, article_id, draft, store_with_article, CheckOutcome};
use crate::{ContentStore, StorageError};

pub(super) async fn run_listing_tests<S, F, Fut>(factory: &F) -> Vec<CheckOutcome>
where
    S: ContentStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        CheckOutcome::new(
            "listing",
            "paging_covers_every_container_once",
            paging_covers_every_container_once(factory).await,
        ),
        CheckOutcome::new(
            "listing",
            "listing_filters_by_schema",
            listing_filters_by_schema(factory).await,
        ),
        CheckOutcome::new(
            "listing",
            "empty_schema_lists_nothing",
            empty_schema_lists_nothing(factory).await,
        ),
        CheckOutcome::new(
            "listing",
            "unknown_schema_listing_fails",
            unknown_schema_listing_fails(factory).await,
        ),
        CheckOutcome::new(
            "listing",
            "later_commits_excluded_from_listing",
            later_commits_excluded_from_listing(factory).await,
        ),
    ]
}

async fn paging_covers_every_container_once<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ContentStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = store_with_article(factory).await?;
    let mut expected = BTreeSet::new();
    for i in 0..7 {
        let c = store
            .commit_container(draft(&format!("c{i}"), "t"))
            .await
            .map_err(|e| format!("commit {i}: {e}"))?;
        expected.insert(c.id);
    }

    let mut seen = BTreeSet::new();
    let mut cursor = None;
    let mut pages = 0;
    loop {
        let page = store
            .list_containers(&article_id(1), cursor.as_ref(), 3)
            .await
            .map_err(|e| format!("page {pages}: {e}"))?;
        pages += 1;
        if page.containers.len() > 3 {
            return Err(format!("page of {} exceeds limit 3", page.containers.len()));
        }
        for c in page.containers {
            if !seen.insert(c.id.clone()) {
                return Err(format!("container {} listed twice", c.id));
            }
        }
        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
        if pages > 10 {
            return Err("listing did not terminate".into());
        }
    }
    if seen != expected {
        return Err(format!("expected {expected:?}, listed {seen:?}"));
    }
    Ok(())
}

async fn listing_filters_by_schema<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ContentStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = store_with_article(factory).await?;
    store
        .publish_schema(article(2))
        .await
        .map_err(|e| format!("publish v2: {e}"))?;
    store
        .commit_container(draft("c1", "old"))
        .await
        .map_err(|e| format!("commit v1: {e}"))?;
    let mut newer = draft("c2", "new");
    newer.schema = article_id(2);
    store
        .commit_container(newer)
        .await
        .map_err(|e| format!("commit v2: {e}"))?;

    let page = store
        .list_containers(&article_id(2), None, 100)
        .await
        .map_err(|e| format!("list: {e}"))?;
    if page.containers.len() != 1 || page.containers[0].content_id != "c2" {
        return Err(format!("expected only c2, got {:?}", page.containers));
    }
    Ok(())
}

async fn empty_schema_lists_nothing<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ContentStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = store_with_article(factory).await?;
    let page = store
        .list_containers(&article_id(1), None, 10)
        .await
        .map_err(|e| format!("list: {e}"))?;
    if !page.containers.is_empty() || page.next_cursor.is_some() {
        return Err(format!("expected an empty final page, got {page:?}"));
    }
    Ok(())
}

async fn unknown_schema_listing_fails<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ContentStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory().await;
    match store
        .list_containers(&SchemaVersionId::new("ghost", 1), None, 10)
        .await
    {
        Err(StorageError::SchemaNotFound { .. }) => Ok(()),
        Err(e) => Err(format!("expected SchemaNotFound, got {e}")),
        Ok(p) => Err(format!("listing unknown schema returned {p:?}")),
    }
}

/// A listing reflects the containers present when its first page was
/// served, so a migration that commits while it pages never revisits its
/// own output.
async fn later_commits_excluded_from_listing<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: ContentStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = store_with_article(factory).await?;
    for i in 0..4 {
        store
            .commit_container(draft(&format!("c{i}"), "t"))
            .await
            .map_err(|e| format!("commit {i}: {e}"))?;
    }
    let first = store
        .list_containers(&article_id(1), None, 2)
        .await
        .map_err(|e| format!("first page: {e}"))?;
    for i in 0..3 {
        store
            .commit_container(draft(&format!("late{i}"), "t"))
            .await
            .map_err(|e| format!("late commit {i}: {e}"))?;
    }

    let mut total = first.containers.len();
    let mut cursor = first.next_cursor;
    while let Some(c) = cursor {
        let page = store
            .list_containers(&article_id(1), Some(&c), 2)
            .await
            .map_err(|e| format!("next page: {e}"))?;
        if page.containers.iter().any(|c| c.content_id.starts_with("late")) {
            return Err("listing includes containers committed after it began".into());
        }
        total += page.containers.len();
        cursor = page.next_cursor;
    }
    if total != 4 {
        return Err(format!("expected 4 containers, listed {total}"));
    }
    Ok(())
}

//! Orchestrator behavior when the store misbehaves or the run is cancelled.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use morph_core::{
    ContainerId, ContentContainer, FieldKind, FieldMap, FieldSchema, FieldType, FieldValue,
    NewContainer, SchemaVersion, SchemaVersionId,
};
use morph_migrate::{
    CancellationToken, ContainerOutcome, MigrationConfig, MigrationError, MigrationErrorKind,
    MigrationOrchestrator, MigrationRequest, MigrationStatus,
};
use morph_storage::{ContainerPage, ContentStore, MemoryStore, PageCursor, StorageError};

// ──────────────────────────────────────────────
// Fault-injecting store
// ──────────────────────────────────────────────

/// Wraps a `MemoryStore` and fails selected calls.
#[derive(Default)]
struct FaultyStore {
    inner: MemoryStore,
    /// Remaining commit calls to fail with `Unavailable`.
    transient_commit_failures: AtomicUsize,
    /// Fail every commit with a non-retryable backend error.
    broken_commits: bool,
    /// Fail listing calls that carry a cursor (every page after the first).
    broken_paging: bool,
    /// Fail the first listing call too.
    broken_listing: bool,
    /// Panic while committing this content id.
    panic_on_commit: Option<String>,
    /// Cancelled once this many commits succeeded.
    cancel_after: Option<(usize, CancellationToken)>,
    commit_calls: AtomicUsize,
    commits: AtomicUsize,
}

#[async_trait]
impl ContentStore for FaultyStore {
    async fn publish_schema(&self, schema: SchemaVersion) -> Result<(), StorageError> {
        self.inner.publish_schema(schema).await
    }

    async fn get_schema(&self, id: &SchemaVersionId) -> Result<SchemaVersion, StorageError> {
        self.inner.get_schema(id).await
    }

    async fn list_schemas(&self) -> Result<Vec<SchemaVersionId>, StorageError> {
        self.inner.list_schemas().await
    }

    async fn list_containers(
        &self,
        schema: &SchemaVersionId,
        cursor: Option<&PageCursor>,
        limit: usize,
    ) -> Result<ContainerPage, StorageError> {
        if self.broken_listing || (self.broken_paging && cursor.is_some()) {
            return Err(StorageError::Backend("listing connection reset".into()));
        }
        self.inner.list_containers(schema, cursor, limit).await
    }

    async fn get_container(&self, id: &ContainerId) -> Result<ContentContainer, StorageError> {
        self.inner.get_container(id).await
    }

    async fn list_versions(&self, content_id: &str) -> Result<Vec<ContentContainer>, StorageError> {
        self.inner.list_versions(content_id).await
    }

    async fn commit_container(
        &self,
        container: NewContainer,
    ) -> Result<ContentContainer, StorageError> {
        self.commit_calls.fetch_add(1, Ordering::SeqCst);
        if self.panic_on_commit.as_deref() == Some(container.content_id.as_str()) {
            panic!("storage driver bug while committing {}", container.content_id);
        }
        if self.broken_commits {
            return Err(StorageError::Backend("disk full".into()));
        }
        let remaining = self.transient_commit_failures.load(Ordering::SeqCst);
        if remaining > 0
            && self
                .transient_commit_failures
                .compare_exchange(remaining, remaining - 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            return Err(StorageError::Unavailable("leader election".into()));
        }
        let committed = self.inner.commit_container(container).await?;
        let done = self.commits.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((after, token)) = &self.cancel_after {
            if done >= *after {
                token.cancel();
            }
        }
        Ok(committed)
    }
}

// ──────────────────────────────────────────────
// Fixtures
// ──────────────────────────────────────────────

fn v(version: u32) -> SchemaVersionId {
    SchemaVersionId::new("article", version)
}

fn config() -> MigrationConfig {
    MigrationConfig {
        workers: 2,
        page_size: 2,
        retry_backoff_ms: 1,
        ..MigrationConfig::default()
    }
}

async fn seed(store: FaultyStore, count: usize) -> Arc<FaultyStore> {
    let html = FieldType::single(FieldKind::Html);
    for version in [1, 2] {
        store
            .publish_schema(
                SchemaVersion::new("article", version, vec![FieldSchema::new("content", html)])
                    .unwrap(),
            )
            .await
            .unwrap();
    }
    for i in 0..count {
        let mut fields = FieldMap::new();
        fields.insert("content".into(), FieldValue::Html(format!("<p>{i}</p>")));
        store
            .inner
            .commit_container(NewContainer {
                content_id: format!("content-{i}"),
                schema: v(1),
                fields,
                predecessor: None,
            })
            .await
            .unwrap();
    }
    Arc::new(store)
}

// ──────────────────────────────────────────────
// Commit retries
// ──────────────────────────────────────────────

#[tokio::test]
async fn transient_commit_failures_are_retried() {
    let store = seed(
        FaultyStore {
            transient_commit_failures: AtomicUsize::new(2),
            ..FaultyStore::default()
        },
        3,
    )
    .await;
    let config = MigrationConfig {
        workers: 1,
        commit_retries: 3,
        ..config()
    };
    let orchestrator = MigrationOrchestrator::new(store.clone(), config);

    let report = orchestrator.run(&MigrationRequest::new(v(1), v(2))).await.unwrap();
    assert_eq!(report.status, MigrationStatus::Completed);
    assert_eq!(report.succeeded, 3);
    assert_eq!(store.commit_calls.load(Ordering::SeqCst), 5);
}

#[tokio::test]
async fn exhausted_retries_fail_only_that_container() {
    let store = seed(
        FaultyStore {
            transient_commit_failures: AtomicUsize::new(3),
            ..FaultyStore::default()
        },
        2,
    )
    .await;
    let config = MigrationConfig {
        workers: 1,
        commit_retries: 2,
        ..config()
    };
    let orchestrator = MigrationOrchestrator::new(store.clone(), config);

    let report = orchestrator.run(&MigrationRequest::new(v(1), v(2))).await.unwrap();
    assert_eq!(report.status, MigrationStatus::Completed);
    assert_eq!(report.failed, 1);
    assert_eq!(report.succeeded, 1);
    let failure = report.failures().next().unwrap();
    assert!(matches!(
        failure,
        ContainerOutcome::Failure { kind: MigrationErrorKind::StoreCommit, .. }
    ));
}

#[tokio::test]
async fn permanent_commit_errors_are_not_retried() {
    let store = seed(
        FaultyStore {
            broken_commits: true,
            ..FaultyStore::default()
        },
        2,
    )
    .await;
    let orchestrator = MigrationOrchestrator::new(store.clone(), config());

    let report = orchestrator.run(&MigrationRequest::new(v(1), v(2))).await.unwrap();
    assert_eq!(report.status, MigrationStatus::Completed);
    assert_eq!(report.failed, 2);
    assert_eq!(store.commit_calls.load(Ordering::SeqCst), 2);
    for outcome in &report.outcomes {
        match outcome {
            ContainerOutcome::Failure { kind, detail, .. } => {
                assert_eq!(*kind, MigrationErrorKind::StoreCommit);
                assert!(detail.contains("disk full"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn panicking_commit_is_reported_as_internal_failure() {
    let store = seed(
        FaultyStore {
            panic_on_commit: Some("content-1".into()),
            ..FaultyStore::default()
        },
        3,
    )
    .await;
    let orchestrator = MigrationOrchestrator::new(store.clone(), config());

    let report = orchestrator.run(&MigrationRequest::new(v(1), v(2))).await.unwrap();
    assert_eq!(report.status, MigrationStatus::Completed);
    assert_eq!(report.attempted, 3);
    assert_eq!(report.succeeded, 2);
    assert_eq!(report.failed, 1);
    let ids: Vec<&str> = report.outcomes.iter().map(|o| o.content_id()).collect();
    assert_eq!(ids, ["content-0", "content-1", "content-2"]);
    match report.failures().next().unwrap() {
        ContainerOutcome::Failure {
            content_id,
            kind,
            detail,
            ..
        } => {
            assert_eq!(content_id, "content-1");
            assert_eq!(*kind, MigrationErrorKind::Internal);
            assert!(detail.contains("panicked"), "{detail}");
        }
        other => panic!("expected failure, got {other:?}"),
    };
}

// ──────────────────────────────────────────────
// Listing failures
// ──────────────────────────────────────────────

#[tokio::test]
async fn listing_failure_mid_run_aborts_and_keeps_committed_work() {
    let store = seed(
        FaultyStore {
            broken_paging: true,
            ..FaultyStore::default()
        },
        5,
    )
    .await;
    let orchestrator = MigrationOrchestrator::new(store.clone(), config());

    let report = orchestrator.run(&MigrationRequest::new(v(1), v(2))).await.unwrap();
    assert_eq!(report.status, MigrationStatus::Aborted);
    assert!(report
        .abort_reason
        .as_deref()
        .unwrap()
        .contains("listing connection reset"));
    assert_eq!(report.attempted, 2);
    assert_eq!(report.succeeded, 2);
    assert_eq!(store.inner.container_count().await, 7);
}

#[tokio::test]
async fn listing_failure_before_dispatch_is_fatal() {
    let store = seed(
        FaultyStore {
            broken_listing: true,
            ..FaultyStore::default()
        },
        3,
    )
    .await;
    let orchestrator = MigrationOrchestrator::new(store.clone(), config());

    let err = orchestrator
        .run(&MigrationRequest::new(v(1), v(2)))
        .await
        .unwrap_err();
    assert!(matches!(err, MigrationError::Store(StorageError::Backend(_))));
    assert_eq!(store.commit_calls.load(Ordering::SeqCst), 0);
}

// ──────────────────────────────────────────────
// Cancellation
// ──────────────────────────────────────────────

#[tokio::test]
async fn cancellation_stops_dispatch_after_in_flight_work() {
    let token = CancellationToken::new();
    let store = seed(
        FaultyStore {
            cancel_after: Some((1, token.clone())),
            ..FaultyStore::default()
        },
        6,
    )
    .await;
    let config = MigrationConfig {
        workers: 1,
        ..config()
    };
    let orchestrator = MigrationOrchestrator::new(store.clone(), config);

    let report = orchestrator
        .run_with_cancel(&MigrationRequest::new(v(1), v(2)), &token)
        .await
        .unwrap();
    assert_eq!(report.status, MigrationStatus::Cancelled);
    assert_eq!(report.attempted, 1);
    assert_eq!(report.succeeded, 1);
    assert_eq!(store.inner.container_count().await, 7);
}

#[tokio::test]
async fn cancelled_before_start_attempts_nothing() {
    let store = seed(FaultyStore::default(), 3).await;
    let orchestrator = MigrationOrchestrator::new(store.clone(), config());
    let token = CancellationToken::new();
    token.cancel();

    let report = orchestrator
        .run_with_cancel(&MigrationRequest::new(v(1), v(2)), &token)
        .await
        .unwrap();
    assert_eq!(report.status, MigrationStatus::Cancelled);
    assert_eq!(report.attempted, 0);
    assert_eq!(store.commit_calls.load(Ordering::SeqCst), 0);
}

// ──────────────────────────────────────────────
// Concurrency
// ──────────────────────────────────────────────

#[tokio::test]
async fn unrelated_migrations_run_concurrently() {
    let store = Arc::new(MemoryStore::new());
    let html = FieldType::single(FieldKind::Html);
    for name in ["article", "page"] {
        for version in [1, 2] {
            store
                .publish_schema(
                    SchemaVersion::new(name, version, vec![FieldSchema::new("content", html)])
                        .unwrap(),
                )
                .await
                .unwrap();
        }
        for i in 0..10 {
            let mut fields = FieldMap::new();
            fields.insert("content".into(), FieldValue::Html(format!("{name} {i}")));
            store
                .commit_container(NewContainer {
                    content_id: format!("{name}-{i}"),
                    schema: SchemaVersionId::new(name, 1),
                    fields,
                    predecessor: None,
                })
                .await
                .unwrap();
        }
    }

    let mut handles = Vec::new();
    for name in ["article", "page"] {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            let orchestrator = MigrationOrchestrator::new(store, config());
            orchestrator
                .run(&MigrationRequest::new(
                    SchemaVersionId::new(name, 1),
                    SchemaVersionId::new(name, 2),
                ))
                .await
        }));
    }
    for handle in handles {
        let report = handle.await.unwrap().unwrap();
        assert_eq!(report.status, MigrationStatus::Completed);
        assert_eq!(report.succeeded, 10);
    }
    assert_eq!(store.container_count().await, 40);
}

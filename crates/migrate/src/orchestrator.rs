//! Runs a migration over every container bound to a schema version.
//!
//! A run moves through `Planning` and `Running` before ending as
//! `Completed`, `Aborted` or `Cancelled`. Planning loads both schema versions,
//! compares them and compiles every script; any failure there is returned as
//! a [`MigrationError`] with nothing touched. While running, containers are
//! paged from the store and migrated on a bounded pool of tasks. Each
//! container is independent: its failure is recorded in the report and the
//! run moves on. There is no rollback; versions already committed stay.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use morph_core::{
    ContainerId, ContentContainer, FieldHints, NewContainer, SchemaVersionId,
    TypeConverterRegistry,
};
use morph_script::ScriptSandbox;
use morph_storage::{ContentStore, PageCursor};
use tokio::sync::Semaphore;
use tokio::task::{self, JoinError, JoinSet};

use crate::cancel::CancellationToken;
use crate::config::MigrationConfig;
use crate::error::{ContainerError, MigrationError, MigrationErrorKind};
use crate::plan::{MigrationPlan, Transformed};
use crate::report::{ContainerOutcome, MigrationReport, MigrationStatus};

/// What to migrate, from the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationRequest {
    pub from: SchemaVersionId,
    pub to: SchemaVersionId,
    /// Old field name to new field name.
    pub renames: BTreeMap<String, String>,
    /// New field name to script source.
    pub scripts: BTreeMap<String, String>,
}

impl MigrationRequest {
    pub fn new(from: SchemaVersionId, to: SchemaVersionId) -> Self {
        MigrationRequest {
            from,
            to,
            renames: BTreeMap::new(),
            scripts: BTreeMap::new(),
        }
    }

    pub fn rename(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.renames.insert(from.into(), to.into());
        self
    }

    pub fn script(mut self, field: impl Into<String>, source: impl Into<String>) -> Self {
        self.scripts.insert(field.into(), source.into());
        self
    }

    fn hints(&self) -> FieldHints {
        FieldHints {
            renames: self.renames.clone(),
            scripts: self.scripts.clone(),
        }
    }
}

pub struct MigrationOrchestrator<S: ContentStore> {
    store: Arc<S>,
    config: MigrationConfig,
    sandbox: ScriptSandbox,
    converters: TypeConverterRegistry,
}

impl<S: ContentStore> MigrationOrchestrator<S> {
    pub fn new(store: Arc<S>, config: MigrationConfig) -> Self {
        let sandbox = ScriptSandbox::new(config.sandbox_limits());
        MigrationOrchestrator {
            store,
            config,
            sandbox,
            converters: TypeConverterRegistry::new(),
        }
    }

    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    /// The planning phase on its own: load, compare, compile.
    pub async fn plan(&self, request: &MigrationRequest) -> Result<MigrationPlan, MigrationError> {
        tracing::info!(from = %request.from, to = %request.to, phase = "planning", "migration phase");
        let from = self.store.get_schema(&request.from).await?;
        let to = self.store.get_schema(&request.to).await?;
        let plan = MigrationPlan::build(from, to, &request.hints(), &self.sandbox);
        if let Err(e) = &plan {
            tracing::warn!(from = %request.from, to = %request.to, error = %e, "migration aborted during planning");
        }
        plan
    }

    pub async fn run(&self, request: &MigrationRequest) -> Result<MigrationReport, MigrationError> {
        self.run_with_cancel(request, &CancellationToken::new()).await
    }

    /// Run the migration until every container was attempted or `cancel`
    /// fires. Cancellation lets in-flight containers finish.
    pub async fn run_with_cancel(
        &self,
        request: &MigrationRequest,
        cancel: &CancellationToken,
    ) -> Result<MigrationReport, MigrationError> {
        let plan = Arc::new(self.plan(request).await?);
        let from = plan.from.id();
        let to = plan.to.id();

        // Listing the first page is still planning: a failure here is fatal.
        let mut page = self
            .store
            .list_containers(&from, None, self.config.page_size)
            .await?;

        tracing::info!(
            %from, %to,
            phase = "running",
            operations = plan.operations.len(),
            workers = self.config.workers,
            "migration phase"
        );

        let worker = Arc::new(Worker {
            store: Arc::clone(&self.store),
            plan: Arc::clone(&plan),
            sandbox: self.sandbox.clone(),
            converters: self.converters,
            config: self.config.clone(),
        });
        let permits = Arc::new(Semaphore::new(self.config.workers.max(1)));
        let mut tasks: JoinSet<ContainerOutcome> = JoinSet::new();
        let mut in_flight = InFlight::new();
        let mut outcomes = Vec::new();
        let mut status = MigrationStatus::Completed;
        let mut abort_reason = None;

        'pages: loop {
            for container in page.containers {
                if cancel.is_cancelled() {
                    status = MigrationStatus::Cancelled;
                    break 'pages;
                }
                let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
                    status = MigrationStatus::Aborted;
                    abort_reason = Some("worker pool closed".to_string());
                    break 'pages;
                };
                if cancel.is_cancelled() {
                    status = MigrationStatus::Cancelled;
                    break 'pages;
                }
                while let Some(done) = tasks.try_join_next_with_id() {
                    in_flight.collect(done, &mut outcomes);
                }
                let key = (container.content_id.clone(), container.id.clone());
                let worker = Arc::clone(&worker);
                let handle = tasks.spawn(async move {
                    let outcome = worker.migrate(container).await;
                    drop(permit);
                    outcome
                });
                in_flight.insert(handle.id(), key);
            }

            let Some(cursor) = page.next_cursor else {
                break;
            };
            if cancel.is_cancelled() {
                status = MigrationStatus::Cancelled;
                break;
            }
            page = match self.next_page(&from, &cursor).await {
                Ok(next) => next,
                Err(e) => {
                    tracing::warn!(%from, %to, error = %e, "listing failed mid-run, stopping dispatch");
                    status = MigrationStatus::Aborted;
                    abort_reason = Some(e.to_string());
                    break;
                }
            };
        }

        while let Some(done) = tasks.join_next_with_id().await {
            in_flight.collect(done, &mut outcomes);
        }

        let report = MigrationReport::new(
            from,
            to,
            status,
            abort_reason,
            plan.script_digests(),
            outcomes,
        );
        tracing::info!(
            from = %report.from,
            to = %report.to,
            status = %report.status,
            attempted = report.attempted,
            failed = report.failed,
            "migration finished"
        );
        Ok(report)
    }

    async fn next_page(
        &self,
        from: &SchemaVersionId,
        cursor: &PageCursor,
    ) -> Result<morph_storage::ContainerPage, morph_storage::StorageError> {
        self.store
            .list_containers(from, Some(cursor), self.config.page_size)
            .await
    }
}

/// Content id and source container of every spawned task, so a task that
/// dies still gets an outcome.
#[derive(Default)]
struct InFlight {
    tasks: HashMap<task::Id, (String, ContainerId)>,
}

impl InFlight {
    fn new() -> Self {
        InFlight::default()
    }

    fn insert(&mut self, id: task::Id, key: (String, ContainerId)) {
        self.tasks.insert(id, key);
    }

    fn collect(
        &mut self,
        done: Result<(task::Id, ContainerOutcome), JoinError>,
        outcomes: &mut Vec<ContainerOutcome>,
    ) {
        match done {
            Ok((id, outcome)) => {
                self.tasks.remove(&id);
                outcomes.push(outcome);
            }
            Err(e) => {
                let Some((content_id, source)) = self.tasks.remove(&e.id()) else {
                    tracing::error!(error = %e, "untracked migration task died");
                    return;
                };
                tracing::error!(%content_id, %source, error = %e, "migration task died");
                let error = ContainerError::new(
                    MigrationErrorKind::Internal,
                    format!("migration task failed: {e}"),
                );
                outcomes.push(ContainerOutcome::failure(content_id, source, error));
            }
        }
    }
}

/// Per-container migration, shared by all tasks of one run.
struct Worker<S: ContentStore> {
    store: Arc<S>,
    plan: Arc<MigrationPlan>,
    sandbox: ScriptSandbox,
    converters: TypeConverterRegistry,
    config: MigrationConfig,
}

impl<S: ContentStore> Worker<S> {
    async fn migrate(&self, container: ContentContainer) -> ContainerOutcome {
        let content_id = container.content_id.clone();
        let source = container.id.clone();

        let outcome = match self.transform(container).await {
            Ok(transformed) => self.commit(&content_id, &source, transformed).await,
            Err(e) => Err(e),
        };
        match outcome {
            Ok(outcome) => {
                tracing::debug!(%content_id, %source, "container migrated");
                outcome
            }
            Err(e) => {
                tracing::warn!(%content_id, %source, kind = %e.kind, detail = %e.detail, "container migration failed");
                ContainerOutcome::failure(content_id, source, e)
            }
        }
    }

    /// Field transformation may block on script execution.
    async fn transform(&self, container: ContentContainer) -> Result<Transformed, ContainerError> {
        let plan = Arc::clone(&self.plan);
        let sandbox = self.sandbox.clone();
        let converters = self.converters;
        tokio::task::spawn_blocking(move || plan.apply(&container, &converters, &sandbox))
            .await
            .map_err(|e| {
                ContainerError::new(MigrationErrorKind::Internal, format!("transform task failed: {e}"))
            })?
    }

    async fn commit(
        &self,
        content_id: &str,
        source: &ContainerId,
        transformed: Transformed,
    ) -> Result<ContainerOutcome, ContainerError> {
        let new = NewContainer {
            content_id: content_id.to_string(),
            schema: self.plan.to.id(),
            fields: transformed.fields,
            predecessor: Some(source.clone()),
        };

        let mut attempt = 0;
        let committed = loop {
            match self.store.commit_container(new.clone()).await {
                Ok(committed) => break committed,
                Err(e) if e.is_retryable() && attempt < self.config.commit_retries => {
                    let delay = self.config.retry_delay(attempt);
                    tracing::debug!(%content_id, attempt, ?delay, error = %e, "retrying commit");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(ContainerError::commit(&e)),
            }
        };

        Ok(ContainerOutcome::Success {
            content_id: content_id.to_string(),
            source: source.clone(),
            migrated: committed.id,
            dropped_fields: transformed.dropped_fields,
            soft_failures: transformed.soft_failures,
        })
    }
}

use std::collections::BTreeMap;
use std::fmt;

use morph_core::{ContainerId, SchemaVersionId};
use serde::Serialize;

use crate::error::{ContainerError, MigrationErrorKind};

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStatus {
    /// Every container bound to the old schema version was attempted.
    Completed,
    /// Listing failed after dispatch began. Already committed versions remain.
    Aborted,
    /// A cancellation signal stopped dispatch.
    Cancelled,
}

impl fmt::Display for MigrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MigrationStatus::Completed => "completed",
            MigrationStatus::Aborted => "aborted",
            MigrationStatus::Cancelled => "cancelled",
        })
    }
}

/// A script result that could not be stored in its field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SoftFailure {
    pub field: String,
    pub detail: String,
}

/// What happened to one source container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ContainerOutcome {
    Success {
        content_id: String,
        source: ContainerId,
        /// The newly committed version.
        migrated: ContainerId,
        /// Fields whose built-in conversion produced no value.
        #[serde(skip_serializing_if = "Vec::is_empty")]
        dropped_fields: Vec<String>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        soft_failures: Vec<SoftFailure>,
    },
    Failure {
        content_id: String,
        source: ContainerId,
        kind: MigrationErrorKind,
        #[serde(skip_serializing_if = "Option::is_none")]
        field: Option<String>,
        detail: String,
    },
}

impl ContainerOutcome {
    pub fn failure(content_id: String, source: ContainerId, error: ContainerError) -> Self {
        ContainerOutcome::Failure {
            content_id,
            source,
            kind: error.kind,
            field: error.field,
            detail: error.detail,
        }
    }

    pub fn content_id(&self) -> &str {
        match self {
            ContainerOutcome::Success { content_id, .. }
            | ContainerOutcome::Failure { content_id, .. } => content_id,
        }
    }

    pub fn source(&self) -> &ContainerId {
        match self {
            ContainerOutcome::Success { source, .. } | ContainerOutcome::Failure { source, .. } => {
                source
            }
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ContainerOutcome::Success { .. })
    }
}

/// Aggregate result of one migration run. Immutable once returned.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationReport {
    pub from: SchemaVersionId,
    pub to: SchemaVersionId,
    pub status: MigrationStatus,
    /// Set when the run was aborted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abort_reason: Option<String>,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// SHA-256 digest of each custom script, keyed by target field.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub scripts: BTreeMap<String, String>,
    /// One entry per attempted container, ordered by source container id.
    pub outcomes: Vec<ContainerOutcome>,
}

impl MigrationReport {
    pub(crate) fn new(
        from: SchemaVersionId,
        to: SchemaVersionId,
        status: MigrationStatus,
        abort_reason: Option<String>,
        scripts: BTreeMap<String, String>,
        mut outcomes: Vec<ContainerOutcome>,
    ) -> Self {
        outcomes.sort_by(|a, b| a.source().cmp(b.source()));
        let succeeded = outcomes.iter().filter(|o| o.is_success()).count();
        MigrationReport {
            from,
            to,
            status,
            abort_reason,
            attempted: outcomes.len(),
            succeeded,
            failed: outcomes.len() - succeeded,
            scripts,
            outcomes,
        }
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }

    pub fn failures(&self) -> impl Iterator<Item = &ContainerOutcome> {
        self.outcomes.iter().filter(|o| !o.is_success())
    }

    /// Outcome for the container that was migrated from `source`.
    pub fn outcome_for(&self, source: &ContainerId) -> Option<&ContainerOutcome> {
        self.outcomes.iter().find(|o| o.source() == source)
    }
}

impl fmt::Display for MigrationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Migration {} -> {}: {} ({}/{} succeeded, {} failed)",
            self.from, self.to, self.status, self.succeeded, self.attempted, self.failed
        )?;
        if let Some(reason) = &self.abort_reason {
            writeln!(f, "  aborted: {}", reason)?;
        }
        for outcome in &self.outcomes {
            match outcome {
                ContainerOutcome::Success {
                    content_id,
                    source,
                    migrated,
                    dropped_fields,
                    soft_failures,
                } => {
                    writeln!(f, "  ok   {} {} -> {}", content_id, source, migrated)?;
                    if !dropped_fields.is_empty() {
                        writeln!(f, "       dropped: {}", dropped_fields.join(", "))?;
                    }
                    for soft in soft_failures {
                        writeln!(f, "       soft failure in '{}': {}", soft.field, soft.detail)?;
                    }
                }
                ContainerOutcome::Failure {
                    content_id,
                    source,
                    kind,
                    field,
                    detail,
                } => {
                    write!(f, "  FAIL {} {} [{}]", content_id, source, kind)?;
                    if let Some(field) = field {
                        write!(f, " field '{}'", field)?;
                    }
                    writeln!(f, ": {}", detail)?;
                }
            }
        }
        Ok(())
    }
}

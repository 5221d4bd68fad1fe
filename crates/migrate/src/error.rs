use std::fmt;

use morph_core::ComparisonError;
use morph_script::{CompileError, ScriptError};
use morph_storage::StorageError;
use serde::Serialize;

/// Machine-readable error category carried by fatal errors and failed
/// container outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MigrationErrorKind {
    SchemaComparison,
    ScriptCompile,
    ScriptRuntime,
    ScriptTimeout,
    ScriptSecurityViolation,
    StoreCommit,
    StoreRead,
    /// The migrated field map does not conform to the target schema.
    InvalidResult,
    /// A worker failed outside of script execution.
    Internal,
}

impl MigrationErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MigrationErrorKind::SchemaComparison => "SCHEMA_COMPARISON",
            MigrationErrorKind::ScriptCompile => "SCRIPT_COMPILE",
            MigrationErrorKind::ScriptRuntime => "SCRIPT_RUNTIME",
            MigrationErrorKind::ScriptTimeout => "SCRIPT_TIMEOUT",
            MigrationErrorKind::ScriptSecurityViolation => "SCRIPT_SECURITY_VIOLATION",
            MigrationErrorKind::StoreCommit => "STORE_COMMIT",
            MigrationErrorKind::StoreRead => "STORE_READ",
            MigrationErrorKind::InvalidResult => "INVALID_RESULT",
            MigrationErrorKind::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for MigrationErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fatal errors. A run that fails with one of these returns no report and
/// has not touched any container.
#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    #[error("schema comparison failed: {0}")]
    Comparison(#[from] ComparisonError),

    #[error("script for field '{field}' does not compile: {source}")]
    Compile {
        field: String,
        #[source]
        source: CompileError,
    },

    #[error("storage error: {0}")]
    Store(#[from] StorageError),
}

impl MigrationError {
    pub fn kind(&self) -> MigrationErrorKind {
        match self {
            MigrationError::Comparison(_) => MigrationErrorKind::SchemaComparison,
            MigrationError::Compile { .. } => MigrationErrorKind::ScriptCompile,
            MigrationError::Store(_) => MigrationErrorKind::StoreRead,
        }
    }
}

/// Why a single container could not be migrated. Recorded in the report;
/// never stops the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerError {
    pub kind: MigrationErrorKind,
    /// Field whose operation failed, when the failure belongs to one.
    pub field: Option<String>,
    pub detail: String,
}

impl ContainerError {
    pub fn new(kind: MigrationErrorKind, detail: impl Into<String>) -> Self {
        ContainerError {
            kind,
            field: None,
            detail: detail.into(),
        }
    }

    pub fn script(field: &str, err: ScriptError) -> Self {
        let kind = match &err {
            ScriptError::Runtime { .. } => MigrationErrorKind::ScriptRuntime,
            ScriptError::Timeout { .. } => MigrationErrorKind::ScriptTimeout,
            ScriptError::SecurityViolation { .. } => MigrationErrorKind::ScriptSecurityViolation,
        };
        ContainerError {
            kind,
            field: Some(field.to_string()),
            detail: err.to_string(),
        }
    }

    pub fn commit(err: &StorageError) -> Self {
        let kind = match err {
            StorageError::InvalidContainer(_) => MigrationErrorKind::InvalidResult,
            _ => MigrationErrorKind::StoreCommit,
        };
        ContainerError::new(kind, err.to_string())
    }
}

impl fmt::Display for ContainerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.field {
            Some(field) => write!(f, "[{}] field '{}': {}", self.kind, field, self.detail),
            None => write!(f, "[{}] {}", self.kind, self.detail),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use morph_core::ConformanceError;
    use morph_script::TimeoutBudget;
    use std::time::Duration;

    #[test]
    fn kinds_serialize_screaming_snake_case() {
        let json = serde_json::to_value(MigrationErrorKind::ScriptSecurityViolation).unwrap();
        assert_eq!(json, serde_json::json!("SCRIPT_SECURITY_VIOLATION"));
        assert_eq!(
            serde_json::json!(MigrationErrorKind::StoreCommit.to_string()),
            serde_json::to_value(MigrationErrorKind::StoreCommit).unwrap()
        );
    }

    #[test]
    fn script_errors_map_to_their_kinds() {
        let cases = [
            (ScriptError::runtime("boom"), MigrationErrorKind::ScriptRuntime),
            (
                ScriptError::Timeout {
                    budget: TimeoutBudget::WallClock(Duration::from_millis(5)),
                },
                MigrationErrorKind::ScriptTimeout,
            ),
            (
                ScriptError::SecurityViolation {
                    capability: "System".into(),
                },
                MigrationErrorKind::ScriptSecurityViolation,
            ),
        ];
        for (err, kind) in cases {
            let e = ContainerError::script("content", err);
            assert_eq!(e.kind, kind);
            assert_eq!(e.field.as_deref(), Some("content"));
        }
    }

    #[test]
    fn rejected_result_is_not_a_store_failure() {
        let err = StorageError::InvalidContainer(ConformanceError::UnknownField {
            schema: "article@2".into(),
            field: "x".into(),
        });
        assert_eq!(ContainerError::commit(&err).kind, MigrationErrorKind::InvalidResult);
        let err = StorageError::Backend("disk full".into());
        assert_eq!(ContainerError::commit(&err).kind, MigrationErrorKind::StoreCommit);
    }
}

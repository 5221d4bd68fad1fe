use morph_core::{ConformanceError, ContainerId, SchemaError, SchemaVersionId};

/// All errors that can be returned by a ContentStore implementation.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// No schema version with this id has been published.
    #[error("schema version not found: {schema}")]
    SchemaNotFound { schema: SchemaVersionId },

    /// Schema versions are immutable once published.
    #[error("schema version already published: {schema}")]
    SchemaAlreadyPublished { schema: SchemaVersionId },

    /// The schema definition itself is malformed.
    #[error("invalid schema: {0}")]
    InvalidSchema(#[from] SchemaError),

    #[error("container not found: {id}")]
    ContainerNotFound { id: ContainerId },

    /// A new container names a predecessor that belongs to another content instance.
    #[error("predecessor {predecessor} belongs to content {actual}, not {expected}")]
    PredecessorMismatch {
        predecessor: ContainerId,
        expected: String,
        actual: String,
    },

    /// A new container does not conform to the schema version it is bound to.
    #[error("container rejected: {0}")]
    InvalidContainer(#[from] ConformanceError),

    /// A page cursor that this store did not issue.
    #[error("invalid page cursor: {0}")]
    InvalidCursor(String),

    /// Transient failure; the same call may succeed if retried.
    #[error("storage temporarily unavailable: {0}")]
    Unavailable(String),

    /// A backend-specific storage error (DB connection, serialization, etc.).
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StorageError {
    /// Whether retrying the failed call could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StorageError::Unavailable(_))
    }
}

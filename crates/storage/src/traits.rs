use async_trait::async_trait;
use morph_core::{ContainerId, ContentContainer, NewContainer, SchemaVersion, SchemaVersionId};

use crate::error::StorageError;
use crate::record::{ContainerPage, PageCursor};

/// The storage trait for versioned content backends.
///
/// A `ContentStore` holds published schema versions and an append-only set
/// of content containers. Containers are immutable once committed: a new
/// version of a content instance is a new container that names its
/// predecessor by id.
///
/// ## Listing
///
/// `list_containers` pages through every container bound to a schema
/// version. A listing started with `cursor = None` covers the containers
/// committed before the first page was served; containers committed later
/// do not appear in that listing, so a caller that writes while it pages
/// never sees its own writes.
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync + 'static` to be shared between
/// migration workers.
#[async_trait]
pub trait ContentStore: Send + Sync + 'static {
    // ── Schemas ───────────────────────────────────────────────────────────────

    /// Publish a schema version.
    ///
    /// Returns `Err(StorageError::SchemaAlreadyPublished)` if the id is taken.
    async fn publish_schema(&self, schema: SchemaVersion) -> Result<(), StorageError>;

    /// Returns `Err(StorageError::SchemaNotFound)` if the id was never published.
    async fn get_schema(&self, id: &SchemaVersionId) -> Result<SchemaVersion, StorageError>;

    /// Ids of every published schema version, ordered.
    async fn list_schemas(&self) -> Result<Vec<SchemaVersionId>, StorageError>;

    // ── Containers ────────────────────────────────────────────────────────────

    /// Page through the containers bound to `schema`, at most `limit` per page.
    async fn list_containers(
        &self,
        schema: &SchemaVersionId,
        cursor: Option<&PageCursor>,
        limit: usize,
    ) -> Result<ContainerPage, StorageError>;

    /// Returns `Err(StorageError::ContainerNotFound)` if no such container exists.
    async fn get_container(&self, id: &ContainerId) -> Result<ContentContainer, StorageError>;

    /// Every container of one content instance, in commit order.
    async fn list_versions(&self, content_id: &str)
        -> Result<Vec<ContentContainer>, StorageError>;

    /// Validate and append a new container, assigning its id and timestamp.
    ///
    /// Rejects containers bound to an unknown schema, containers that do not
    /// conform to their schema, and predecessors that are missing or belong
    /// to another content instance.
    async fn commit_container(&self, container: NewContainer)
        -> Result<ContentContainer, StorageError>;
}

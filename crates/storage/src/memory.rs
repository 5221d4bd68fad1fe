//! In-memory `ContentStore`.
//!
//! Backs the CLI and the test suites. All state lives behind one tokio
//! `RwLock`; readers never block each other and a commit holds the write
//! lock only for validation and the append.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use morph_core::{ContainerId, ContentContainer, NewContainer, SchemaVersion, SchemaVersionId};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use crate::error::StorageError;
use crate::record::{ContainerPage, PageCursor};
use crate::traits::ContentStore;

#[derive(Debug, Default)]
struct Inner {
    schemas: BTreeMap<SchemaVersionId, SchemaVersion>,
    /// Append-only; a container's index never changes.
    containers: Vec<ContentContainer>,
    by_id: HashMap<ContainerId, usize>,
    by_schema: HashMap<SchemaVersionId, Vec<usize>>,
    by_content: HashMap<String, Vec<usize>>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of committed containers across all schemas.
    pub async fn container_count(&self) -> usize {
        self.inner.read().await.containers.len()
    }
}

/// Cursor layout: `<next position>:<high-water mark>` within the schema's index.
fn encode_cursor(next: usize, high_water: usize) -> PageCursor {
    PageCursor(format!("{}:{}", next, high_water))
}

fn decode_cursor(cursor: &PageCursor) -> Result<(usize, usize), StorageError> {
    let invalid = || StorageError::InvalidCursor(cursor.0.clone());
    let (next, high_water) = cursor.0.split_once(':').ok_or_else(invalid)?;
    let next: usize = next.parse().map_err(|_| invalid())?;
    let high_water: usize = high_water.parse().map_err(|_| invalid())?;
    if next > high_water {
        return Err(invalid());
    }
    Ok((next, high_water))
}

fn now_rfc3339() -> Result<String, StorageError> {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .map_err(|e| StorageError::Backend(format!("timestamp formatting failed: {e}")))
}

#[async_trait]
impl ContentStore for MemoryStore {
    async fn publish_schema(&self, schema: SchemaVersion) -> Result<(), StorageError> {
        schema.validate()?;
        let mut inner = self.inner.write().await;
        let id = schema.id();
        if inner.schemas.contains_key(&id) {
            return Err(StorageError::SchemaAlreadyPublished { schema: id });
        }
        inner.schemas.insert(id, schema);
        Ok(())
    }

    async fn get_schema(&self, id: &SchemaVersionId) -> Result<SchemaVersion, StorageError> {
        self.inner
            .read()
            .await
            .schemas
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::SchemaNotFound { schema: id.clone() })
    }

    async fn list_schemas(&self) -> Result<Vec<SchemaVersionId>, StorageError> {
        Ok(self.inner.read().await.schemas.keys().cloned().collect())
    }

    async fn list_containers(
        &self,
        schema: &SchemaVersionId,
        cursor: Option<&PageCursor>,
        limit: usize,
    ) -> Result<ContainerPage, StorageError> {
        let inner = self.inner.read().await;
        if !inner.schemas.contains_key(schema) {
            return Err(StorageError::SchemaNotFound {
                schema: schema.clone(),
            });
        }
        let index = inner.by_schema.get(schema).map(Vec::as_slice).unwrap_or(&[]);
        let (start, high_water) = match cursor {
            Some(c) => decode_cursor(c)?,
            None => (0, index.len()),
        };
        if high_water > index.len() {
            return Err(StorageError::InvalidCursor(format!(
                "{} (schema {} has {} containers)",
                encode_cursor(start, high_water),
                schema,
                index.len()
            )));
        }
        let end = start.saturating_add(limit.max(1)).min(high_water);
        let containers = index[start..end]
            .iter()
            .map(|&i| inner.containers[i].clone())
            .collect();
        let next_cursor = (end < high_water).then(|| encode_cursor(end, high_water));
        Ok(ContainerPage {
            containers,
            next_cursor,
        })
    }

    async fn get_container(&self, id: &ContainerId) -> Result<ContentContainer, StorageError> {
        let inner = self.inner.read().await;
        inner
            .by_id
            .get(id)
            .map(|&i| inner.containers[i].clone())
            .ok_or_else(|| StorageError::ContainerNotFound { id: id.clone() })
    }

    async fn list_versions(
        &self,
        content_id: &str,
    ) -> Result<Vec<ContentContainer>, StorageError> {
        let inner = self.inner.read().await;
        Ok(inner
            .by_content
            .get(content_id)
            .map(|idx| idx.iter().map(|&i| inner.containers[i].clone()).collect())
            .unwrap_or_default())
    }

    async fn commit_container(
        &self,
        container: NewContainer,
    ) -> Result<ContentContainer, StorageError> {
        let created_at = now_rfc3339()?;
        let mut inner = self.inner.write().await;

        let schema = inner
            .schemas
            .get(&container.schema)
            .ok_or_else(|| StorageError::SchemaNotFound {
                schema: container.schema.clone(),
            })?;
        container.conforms_to(schema)?;

        if let Some(pred_id) = &container.predecessor {
            let pred = inner
                .by_id
                .get(pred_id)
                .map(|&i| &inner.containers[i])
                .ok_or_else(|| StorageError::ContainerNotFound {
                    id: pred_id.clone(),
                })?;
            if pred.content_id != container.content_id {
                return Err(StorageError::PredecessorMismatch {
                    predecessor: pred_id.clone(),
                    expected: container.content_id.clone(),
                    actual: pred.content_id.clone(),
                });
            }
        }

        let index = inner.containers.len();
        let committed = ContentContainer {
            id: ContainerId::new(format!("ctr-{:06}", index + 1)),
            content_id: container.content_id,
            schema: container.schema,
            fields: container.fields,
            predecessor: container.predecessor,
            created_at,
        };
        inner.by_id.insert(committed.id.clone(), index);
        inner
            .by_schema
            .entry(committed.schema.clone())
            .or_default()
            .push(index);
        inner
            .by_content
            .entry(committed.content_id.clone())
            .or_default()
            .push(index);
        inner.containers.push(committed.clone());
        Ok(committed)
    }
}

//! Loading schemas, scripts and fixture stores from disk.

use std::collections::BTreeMap;
use std::path::Path;

use morph_core::{NewContainer, SchemaVersion};
use morph_storage::{ContentStore, MemoryStore};
use serde::Deserialize;

/// A store snapshot: schema versions to publish, then containers to commit
/// in file order.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct Fixture {
    #[serde(default)]
    pub schemas: Vec<SchemaVersion>,
    #[serde(default)]
    pub containers: Vec<NewContainer>,
}

pub(crate) fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("error reading '{}': {}", path.display(), e))?;
    serde_json::from_str(&content)
        .map_err(|e| format!("error parsing JSON in '{}': {}", path.display(), e))
}

pub(crate) fn load_schema(path: &Path) -> Result<SchemaVersion, String> {
    let schema: SchemaVersion = read_json(path)?;
    schema
        .validate()
        .map_err(|e| format!("invalid schema in '{}': {}", path.display(), e))?;
    Ok(schema)
}

/// Read each `field=path` script argument into field to source.
pub(crate) fn load_scripts(pairs: &[(String, String)]) -> Result<BTreeMap<String, String>, String> {
    pairs
        .iter()
        .map(|(field, path)| {
            std::fs::read_to_string(path)
                .map(|source| (field.clone(), source))
                .map_err(|e| format!("error reading script '{}': {}", path, e))
        })
        .collect()
}

pub(crate) async fn load_store(path: &Path) -> Result<MemoryStore, String> {
    let fixture: Fixture = read_json(path)?;
    tracing::debug!(
        path = %path.display(),
        schemas = fixture.schemas.len(),
        containers = fixture.containers.len(),
        "loading fixture"
    );
    let store = MemoryStore::new();
    for schema in fixture.schemas {
        let id = schema.id();
        store
            .publish_schema(schema)
            .await
            .map_err(|e| format!("cannot publish schema {}: {}", id, e))?;
    }
    for container in fixture.containers {
        let content_id = container.content_id.clone();
        store
            .commit_container(container)
            .await
            .map_err(|e| format!("cannot load container '{}': {}", content_id, e))?;
    }
    Ok(store)
}

//! Content containers: immutable versions of a content instance's data.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::field::{FieldMap, FieldType};
use crate::schema::{SchemaVersion, SchemaVersionId};

/// Store-assigned identifier of a committed container.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerId(pub String);

impl ContainerId {
    pub fn new(id: impl Into<String>) -> Self {
        ContainerId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One committed version of a content instance.
///
/// Containers are never modified after commit. A new version references its
/// predecessor by id, forming an append-only chain per content instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentContainer {
    pub id: ContainerId,
    pub content_id: String,
    pub schema: SchemaVersionId,
    #[serde(default)]
    pub fields: FieldMap,
    #[serde(default)]
    pub predecessor: Option<ContainerId>,
    /// RFC 3339 timestamp assigned by the store.
    #[serde(default)]
    pub created_at: String,
}

/// A container not yet committed. The store assigns `id` and `created_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewContainer {
    pub content_id: String,
    pub schema: SchemaVersionId,
    #[serde(default)]
    pub fields: FieldMap,
    #[serde(default)]
    pub predecessor: Option<ContainerId>,
}

/// A way in which a field map fails to conform to its schema.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConformanceError {
    #[error("schema {schema} has no field '{field}'")]
    UnknownField { schema: String, field: String },

    #[error("field '{field}' holds {actual}, schema declares {declared}")]
    TypeMismatch {
        field: String,
        declared: FieldType,
        actual: FieldType,
    },

    #[error("container is bound to {bound}, checked against {checked}")]
    WrongSchema { bound: String, checked: String },
}

/// Check that every present field exists in `schema` with a matching type.
pub fn check_fields(fields: &FieldMap, schema: &SchemaVersion) -> Result<(), ConformanceError> {
    for (name, value) in fields {
        let decl = schema
            .field(name)
            .ok_or_else(|| ConformanceError::UnknownField {
                schema: schema.id().to_string(),
                field: name.clone(),
            })?;
        let actual = value.field_type();
        if actual != decl.field_type {
            return Err(ConformanceError::TypeMismatch {
                field: name.clone(),
                declared: decl.field_type,
                actual,
            });
        }
    }
    Ok(())
}

impl ContentContainer {
    pub fn conforms_to(&self, schema: &SchemaVersion) -> Result<(), ConformanceError> {
        if self.schema != schema.id() {
            return Err(ConformanceError::WrongSchema {
                bound: self.schema.to_string(),
                checked: schema.id().to_string(),
            });
        }
        check_fields(&self.fields, schema)
    }
}

impl NewContainer {
    pub fn conforms_to(&self, schema: &SchemaVersion) -> Result<(), ConformanceError> {
        if self.schema != schema.id() {
            return Err(ConformanceError::WrongSchema {
                bound: self.schema.to_string(),
                checked: schema.id().to_string(),
            });
        }
        check_fields(&self.fields, schema)
    }
}

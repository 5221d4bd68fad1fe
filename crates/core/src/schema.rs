//! Schema versions and field declarations.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::field::FieldType;

/// Errors raised while building or parsing schema definitions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error("duplicate field '{field}' in schema {schema}")]
    DuplicateField { schema: String, field: String },

    #[error("unknown field type '{0}'")]
    UnknownType(String),

    #[error("invalid schema version id '{0}': expected <name>@<version>")]
    InvalidVersionId(String),
}

/// Identifies one published version of a schema.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SchemaVersionId {
    pub name: String,
    pub version: u32,
}

impl SchemaVersionId {
    pub fn new(name: impl Into<String>, version: u32) -> Self {
        SchemaVersionId {
            name: name.into(),
            version,
        }
    }
}

impl fmt::Display for SchemaVersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

impl FromStr for SchemaVersionId {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, version) = s
            .rsplit_once('@')
            .ok_or_else(|| SchemaError::InvalidVersionId(s.to_string()))?;
        let version = version
            .parse()
            .map_err(|_| SchemaError::InvalidVersionId(s.to_string()))?;
        if name.is_empty() {
            return Err(SchemaError::InvalidVersionId(s.to_string()));
        }
        Ok(SchemaVersionId::new(name, version))
    }
}

/// Declaration of a single field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
}

impl FieldSchema {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        FieldSchema {
            name: name.into(),
            field_type,
            required: false,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// An immutable, published schema version.
///
/// Field order is preserved; field names are unique. Construct through
/// [`SchemaVersion::new`] (or deserialize and call [`SchemaVersion::validate`])
/// so the uniqueness invariant holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaVersion {
    pub name: String,
    pub version: u32,
    pub fields: Vec<FieldSchema>,
}

impl SchemaVersion {
    pub fn new(
        name: impl Into<String>,
        version: u32,
        fields: Vec<FieldSchema>,
    ) -> Result<Self, SchemaError> {
        let schema = SchemaVersion {
            name: name.into(),
            version,
            fields,
        };
        schema.validate()?;
        Ok(schema)
    }

    pub fn validate(&self) -> Result<(), SchemaError> {
        let mut seen = BTreeSet::new();
        for field in &self.fields {
            if !seen.insert(field.name.as_str()) {
                return Err(SchemaError::DuplicateField {
                    schema: self.id().to_string(),
                    field: field.name.clone(),
                });
            }
        }
        Ok(())
    }

    pub fn id(&self) -> SchemaVersionId {
        SchemaVersionId::new(self.name.clone(), self.version)
    }

    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldKind;

    #[test]
    fn duplicate_field_names_rejected() {
        let err = SchemaVersion::new(
            "article",
            1,
            vec![
                FieldSchema::new("title", FieldType::single(FieldKind::String)),
                FieldSchema::new("title", FieldType::single(FieldKind::Html)),
            ],
        )
        .unwrap_err();
        assert_eq!(
            err,
            SchemaError::DuplicateField {
                schema: "article@1".into(),
                field: "title".into()
            }
        );
    }

    #[test]
    fn version_id_round_trips_through_display() {
        let id: SchemaVersionId = "blog-post@3".parse().unwrap();
        assert_eq!(id, SchemaVersionId::new("blog-post", 3));
        assert_eq!(id.to_string(), "blog-post@3");
        assert!("nover".parse::<SchemaVersionId>().is_err());
        assert!("@2".parse::<SchemaVersionId>().is_err());
        assert!("x@two".parse::<SchemaVersionId>().is_err());
    }

    #[test]
    fn schema_deserializes_from_json() {
        let schema: SchemaVersion = serde_json::from_value(serde_json::json!({
            "name": "article",
            "version": 2,
            "fields": [
                {"name": "title", "type": "string", "required": true},
                {"name": "tags", "type": "list<string>"}
            ]
        }))
        .unwrap();
        assert_eq!(schema.fields.len(), 2);
        assert!(schema.fields[0].required);
        assert_eq!(
            schema.field("tags").unwrap().field_type,
            FieldType::list_of(FieldKind::String)
        );
    }
}

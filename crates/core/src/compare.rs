//! Schema comparison: diff two schema versions into an ordered list of
//! field operations.
//!
//! Applying the operations in order to a container of the old version yields
//! a field map that conforms to the new version. Order is:
//!
//! 1. `Remove` for fields with no counterpart in the new version (old order)
//! 2. `Rename` for fields moved to a new name
//! 3. `Retype` for fields whose declared type changed, and for fields carrying
//!    a custom script
//! 4. `Add` for new fields (new order)
//!
//! Fields unchanged in name and type need no operation.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Serialize;

use crate::schema::{FieldSchema, SchemaVersion};

/// Caller-supplied hints that the schemas alone cannot express.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldHints {
    /// Old field name to new field name.
    pub renames: BTreeMap<String, String>,
    /// New field name to custom script source.
    pub scripts: BTreeMap<String, String>,
}

impl FieldHints {
    pub fn new() -> Self {
        FieldHints::default()
    }

    pub fn rename(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.renames.insert(from.into(), to.into());
        self
    }

    pub fn script(mut self, field: impl Into<String>, source: impl Into<String>) -> Self {
        self.scripts.insert(field.into(), source.into());
        self
    }
}

/// What a single field operation does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum FieldOperationKind {
    Add { field: FieldSchema },
    Remove { field: String },
    Rename { from: String, to: String },
    Retype { from: FieldSchema, to: FieldSchema },
}

/// A planned transformation of one field. Transient: never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldOperation {
    #[serde(flatten)]
    pub kind: FieldOperationKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
}

impl FieldOperation {
    fn new(kind: FieldOperationKind) -> Self {
        FieldOperation { kind, script: None }
    }

    /// Name of the field in the new schema this operation produces, if any.
    pub fn target_field(&self) -> Option<&str> {
        match &self.kind {
            FieldOperationKind::Add { field } => Some(&field.name),
            FieldOperationKind::Remove { .. } => None,
            FieldOperationKind::Rename { to, .. } => Some(to),
            FieldOperationKind::Retype { to, .. } => Some(&to.name),
        }
    }
}

impl fmt::Display for FieldOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            FieldOperationKind::Add { field } => {
                write!(f, "+ {}: {}", field.name, field.field_type)?
            }
            FieldOperationKind::Remove { field } => write!(f, "- {}", field)?,
            FieldOperationKind::Rename { from, to } => write!(f, "~ {} -> {}", from, to)?,
            FieldOperationKind::Retype { from, to } => write!(
                f,
                "* {}: {} -> {}",
                to.name, from.field_type, to.field_type
            )?,
        }
        if self.script.is_some() {
            write!(f, " [script]")?;
        }
        Ok(())
    }
}

/// Configuration errors found while comparing schemas. These are fatal: they
/// are reported before any container is touched.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ComparisonError {
    #[error("cannot migrate between different schemas '{old}' and '{new}'")]
    SchemaMismatch { old: String, new: String },

    #[error("source and target are the same schema version {0}")]
    SameVersion(String),

    #[error("fields {claimants:?} are all renamed to '{target}'")]
    AmbiguousRename {
        target: String,
        claimants: Vec<String>,
    },

    #[error("invalid rename '{from}' -> '{to}': {reason}")]
    InvalidRename {
        from: String,
        to: String,
        reason: String,
    },

    #[error("script targets field '{0}' which does not exist in the new schema")]
    UnknownScriptTarget(String),
}

/// Diffs schema versions into field operations.
#[derive(Debug, Clone, Copy, Default)]
pub struct SchemaComparator;

impl SchemaComparator {
    pub fn new() -> Self {
        SchemaComparator
    }

    pub fn compare(
        &self,
        old: &SchemaVersion,
        new: &SchemaVersion,
        hints: &FieldHints,
    ) -> Result<Vec<FieldOperation>, ComparisonError> {
        if old.name != new.name {
            return Err(ComparisonError::SchemaMismatch {
                old: old.name.clone(),
                new: new.name.clone(),
            });
        }
        if old.version == new.version {
            return Err(ComparisonError::SameVersion(old.id().to_string()));
        }

        check_renames(old, new, &hints.renames)?;
        for target in hints.scripts.keys() {
            if !new.has_field(target) {
                return Err(ComparisonError::UnknownScriptTarget(target.clone()));
            }
        }

        // New name for every old field that survives.
        let survivor = |old_field: &FieldSchema| -> Option<String> {
            match hints.renames.get(&old_field.name) {
                Some(to) => Some(to.clone()),
                None if new.has_field(&old_field.name) => Some(old_field.name.clone()),
                None => None,
            }
        };

        let mut removes = Vec::new();
        let mut renames = Vec::new();
        let mut retypes = Vec::new();
        let mut claimed = BTreeSet::new();

        for old_field in &old.fields {
            let Some(new_name) = survivor(old_field) else {
                removes.push(FieldOperation::new(FieldOperationKind::Remove {
                    field: old_field.name.clone(),
                }));
                continue;
            };
            let Some(new_field) = new.field(&new_name) else {
                continue;
            };
            claimed.insert(new_name.clone());

            if new_name != old_field.name {
                renames.push(FieldOperation::new(FieldOperationKind::Rename {
                    from: old_field.name.clone(),
                    to: new_name.clone(),
                }));
            }

            let script = hints.scripts.get(&new_name).cloned();
            if new_field.field_type != old_field.field_type || script.is_some() {
                let mut retype_from = old_field.clone();
                retype_from.name = new_name.clone();
                retypes.push(FieldOperation {
                    kind: FieldOperationKind::Retype {
                        from: retype_from,
                        to: new_field.clone(),
                    },
                    script,
                });
            }
        }

        let adds = new
            .fields
            .iter()
            .filter(|f| !claimed.contains(&f.name))
            .map(|f| FieldOperation {
                kind: FieldOperationKind::Add { field: f.clone() },
                script: hints.scripts.get(&f.name).cloned(),
            });

        let mut ops = removes;
        ops.extend(renames);
        ops.extend(retypes);
        ops.extend(adds);
        Ok(ops)
    }
}

fn check_renames(
    old: &SchemaVersion,
    new: &SchemaVersion,
    renames: &BTreeMap<String, String>,
) -> Result<(), ComparisonError> {
    let mut by_target: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    for (from, to) in renames {
        by_target.entry(to.as_str()).or_default().push(from.clone());
    }
    for (target, claimants) in by_target {
        if claimants.len() > 1 {
            return Err(ComparisonError::AmbiguousRename {
                target: target.to_string(),
                claimants,
            });
        }
    }

    for (from, to) in renames {
        let invalid = |reason: &str| ComparisonError::InvalidRename {
            from: from.clone(),
            to: to.clone(),
            reason: reason.to_string(),
        };
        if from == to {
            return Err(invalid("source and target names are equal"));
        }
        if !old.has_field(from) {
            return Err(invalid("source field does not exist in the old schema"));
        }
        if new.has_field(from) {
            return Err(invalid("source field still exists in the new schema"));
        }
        if !new.has_field(to) {
            return Err(invalid("target field does not exist in the new schema"));
        }
        if old.has_field(to) && !renames.contains_key(to) {
            return Err(invalid("target field already exists in the old schema"));
        }
    }
    Ok(())
}

//! A migration plan and its application to a single container.
//!
//! The plan is built once per run and shared read-only by every worker:
//! the operation list from the comparator plus one compiled script per
//! scripted target field.

use std::collections::BTreeMap;

use morph_core::{
    check_fields, ContentContainer, FieldHints, FieldMap, FieldOperation, FieldOperationKind,
    FieldType, SchemaComparator, SchemaVersion, TypeConverterRegistry,
};
use morph_script::{field_output, CompiledScript, ScriptSandbox};

use crate::error::{ContainerError, MigrationError, MigrationErrorKind};
use crate::node::{field_from_json, json_type_name, node_json};
use crate::report::SoftFailure;

#[derive(Debug, Clone)]
pub struct MigrationPlan {
    pub from: SchemaVersion,
    pub to: SchemaVersion,
    pub operations: Vec<FieldOperation>,
    scripts: BTreeMap<String, CompiledScript>,
}

/// The new field map for one container, with what was lost on the way.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transformed {
    pub fields: FieldMap,
    pub dropped_fields: Vec<String>,
    pub soft_failures: Vec<SoftFailure>,
}

impl MigrationPlan {
    /// Compare the schemas and compile every script. Fails before any
    /// container is touched.
    pub fn build(
        from: SchemaVersion,
        to: SchemaVersion,
        hints: &FieldHints,
        sandbox: &ScriptSandbox,
    ) -> Result<Self, MigrationError> {
        let operations = SchemaComparator::new().compare(&from, &to, hints)?;

        let mut scripts = BTreeMap::new();
        for op in &operations {
            let (Some(source), Some(field)) = (&op.script, op.target_field()) else {
                continue;
            };
            let compiled = sandbox
                .compile(source)
                .map_err(|source| MigrationError::Compile {
                    field: field.to_string(),
                    source,
                })?;
            scripts.insert(field.to_string(), compiled);
        }

        Ok(MigrationPlan {
            from,
            to,
            operations,
            scripts,
        })
    }

    /// Target field to hex SHA-256 of its script source.
    pub fn script_digests(&self) -> BTreeMap<String, String> {
        self.scripts
            .iter()
            .map(|(field, script)| (field.clone(), script.digest().to_string()))
            .collect()
    }

    /// Apply every operation, in order, to a copy of `container`'s fields.
    ///
    /// A conversion without result drops the field. A script error fails the
    /// whole container. A script value of the wrong type drops the field and
    /// is recorded as a soft failure.
    pub fn apply(
        &self,
        container: &ContentContainer,
        converters: &TypeConverterRegistry,
        sandbox: &ScriptSandbox,
    ) -> Result<Transformed, ContainerError> {
        let mut out = Transformed {
            fields: container.fields.clone(),
            ..Transformed::default()
        };

        for op in &self.operations {
            match &op.kind {
                FieldOperationKind::Remove { field } => {
                    out.fields.remove(field);
                }
                FieldOperationKind::Rename { from, to } => {
                    if let Some(value) = out.fields.remove(from) {
                        out.fields.insert(to.clone(), value);
                    }
                }
                FieldOperationKind::Retype { from, to } => match &op.script {
                    Some(_) => {
                        self.run_script(sandbox, container, &to.name, to.field_type, &mut out)?
                    }
                    None => {
                        if let Some(value) = out.fields.remove(&to.name) {
                            match converters.convert(from.field_type, to.field_type, &value) {
                                Some(converted) => {
                                    out.fields.insert(to.name.clone(), converted);
                                }
                                None => out.dropped_fields.push(to.name.clone()),
                            }
                        }
                    }
                },
                FieldOperationKind::Add { field } => {
                    if op.script.is_some() {
                        let target = field.field_type;
                        self.run_script(sandbox, container, &field.name, target, &mut out)?;
                    }
                }
            }
        }

        check_fields(&out.fields, &self.to)
            .map_err(|e| ContainerError::new(MigrationErrorKind::InvalidResult, e.to_string()))?;
        Ok(out)
    }

    fn run_script(
        &self,
        sandbox: &ScriptSandbox,
        container: &ContentContainer,
        field: &str,
        target: FieldType,
        out: &mut Transformed,
    ) -> Result<(), ContainerError> {
        let script = self.scripts.get(field).ok_or_else(|| ContainerError {
            kind: MigrationErrorKind::Internal,
            field: Some(field.to_string()),
            detail: "no compiled script for field".into(),
        })?;

        let node = node_json(&container.content_id, &container.schema, &out.fields);
        let result = sandbox
            .execute(script, &node, field)
            .map_err(|e| ContainerError::script(field, e))?;

        match field_output(&result, field) {
            None => {
                out.fields.remove(field);
            }
            Some(json) => match field_from_json(json, target) {
                Some(value) => {
                    out.fields.insert(field.to_string(), value);
                }
                None => {
                    out.fields.remove(field);
                    out.soft_failures.push(SoftFailure {
                        field: field.to_string(),
                        detail: format!(
                            "script produced {} for a {} field",
                            json_type_name(json),
                            target
                        ),
                    });
                }
            },
        }
        Ok(())
    }
}

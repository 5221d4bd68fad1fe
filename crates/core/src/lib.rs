//! morph-core: content model, type conversions and schema diffing.
//!
//! # Public API
//!
//! - [`SchemaVersion`], [`FieldSchema`], [`SchemaVersionId`] -- published schema definitions
//! - [`FieldType`], [`FieldKind`], [`FieldValue`] -- the closed field type set
//! - [`ContentContainer`], [`NewContainer`] -- immutable content versions
//! - [`TypeConverterRegistry`] -- built-in conversions between every pair of field types
//! - [`SchemaComparator`] -- ordered [`FieldOperation`] list between two schema versions

pub mod compare;
pub mod container;
pub mod convert;
pub mod field;
pub mod schema;

pub use compare::{
    ComparisonError, FieldHints, FieldOperation, FieldOperationKind, SchemaComparator,
};
pub use container::{check_fields, ConformanceError, ContainerId, ContentContainer, NewContainer};
pub use convert::{convert_scalar, TypeConverterRegistry};
pub use field::{BinaryRef, FieldKind, FieldMap, FieldType, FieldValue, Micronode, NodeRef, Scalar};
pub use schema::{FieldSchema, SchemaError, SchemaVersion, SchemaVersionId};

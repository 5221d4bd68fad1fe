//! Field types and runtime field values.
//!
//! The type set is closed: eight element kinds, each available as a single
//! value or as a list. `FieldValue` mirrors that set one variant per
//! (kind, cardinality) pair so conversions can be checked exhaustively.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::schema::SchemaError;

/// Element kind of a field, independent of cardinality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    String,
    Number,
    Boolean,
    Date,
    Html,
    Binary,
    Node,
    Micronode,
}

impl FieldKind {
    pub const ALL: [FieldKind; 8] = [
        FieldKind::String,
        FieldKind::Number,
        FieldKind::Boolean,
        FieldKind::Date,
        FieldKind::Html,
        FieldKind::Binary,
        FieldKind::Node,
        FieldKind::Micronode,
    ];

    pub fn name(self) -> &'static str {
        match self {
            FieldKind::String => "string",
            FieldKind::Number => "number",
            FieldKind::Boolean => "boolean",
            FieldKind::Date => "date",
            FieldKind::Html => "html",
            FieldKind::Binary => "binary",
            FieldKind::Node => "node",
            FieldKind::Micronode => "micronode",
        }
    }

    /// String and Html carry free text.
    pub fn is_textual(self) -> bool {
        matches!(self, FieldKind::String | FieldKind::Html)
    }

    /// Binary, Node and Micronode have no text-derived representation.
    pub fn is_opaque(self) -> bool {
        matches!(self, FieldKind::Binary | FieldKind::Node | FieldKind::Micronode)
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FieldKind {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FieldKind::ALL
            .iter()
            .copied()
            .find(|k| k.name() == s)
            .ok_or_else(|| SchemaError::UnknownType(s.to_string()))
    }
}

/// Declared type of a field: an element kind plus a list flag.
///
/// Serialized as `"html"` or `"list<html>"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FieldType {
    pub kind: FieldKind,
    pub list: bool,
}

impl FieldType {
    pub const fn single(kind: FieldKind) -> Self {
        FieldType { kind, list: false }
    }

    pub const fn list_of(kind: FieldKind) -> Self {
        FieldType { kind, list: true }
    }

    /// All sixteen field types, singles first.
    pub fn all() -> Vec<FieldType> {
        FieldKind::ALL
            .iter()
            .map(|k| FieldType::single(*k))
            .chain(FieldKind::ALL.iter().map(|k| FieldType::list_of(*k)))
            .collect()
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.list {
            write!(f, "list<{}>", self.kind)
        } else {
            write!(f, "{}", self.kind)
        }
    }
}

impl FromStr for FieldType {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.strip_prefix("list<").and_then(|r| r.strip_suffix('>')) {
            Some(inner) => Ok(FieldType::list_of(inner.trim().parse()?)),
            None => Ok(FieldType::single(s.parse()?)),
        }
    }
}

impl TryFrom<String> for FieldType {
    type Error = SchemaError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<FieldType> for String {
    fn from(t: FieldType) -> Self {
        t.to_string()
    }
}

/// Reference to a stored binary blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryRef {
    pub sha512sum: String,
    pub file_name: String,
    pub mime_type: String,
    pub size: u64,
}

/// Reference to another content instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRef {
    pub uuid: String,
}

/// An embedded, schema-less-to-us content fragment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Micronode {
    pub microschema: String,
    #[serde(default)]
    pub fields: FieldMap,
}

/// Field name to value. An absent key means the field is undefined.
pub type FieldMap = BTreeMap<String, FieldValue>;

/// A single element of the value set, used when converting element-wise.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    String(String),
    Number(i64),
    Boolean(bool),
    Date(i64),
    Html(String),
    Binary(BinaryRef),
    Node(NodeRef),
    Micronode(Micronode),
}

impl Scalar {
    pub fn kind(&self) -> FieldKind {
        match self {
            Scalar::String(_) => FieldKind::String,
            Scalar::Number(_) => FieldKind::Number,
            Scalar::Boolean(_) => FieldKind::Boolean,
            Scalar::Date(_) => FieldKind::Date,
            Scalar::Html(_) => FieldKind::Html,
            Scalar::Binary(_) => FieldKind::Binary,
            Scalar::Node(_) => FieldKind::Node,
            Scalar::Micronode(_) => FieldKind::Micronode,
        }
    }
}

/// Runtime value of a field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    String(String),
    Number(i64),
    Boolean(bool),
    Date(i64),
    Html(String),
    Binary(BinaryRef),
    Node(NodeRef),
    Micronode(Micronode),
    StringList(Vec<String>),
    NumberList(Vec<i64>),
    BooleanList(Vec<bool>),
    DateList(Vec<i64>),
    HtmlList(Vec<String>),
    BinaryList(Vec<BinaryRef>),
    NodeList(Vec<NodeRef>),
    MicronodeList(Vec<Micronode>),
}

impl FieldValue {
    pub fn field_type(&self) -> FieldType {
        match self {
            FieldValue::String(_) => FieldType::single(FieldKind::String),
            FieldValue::Number(_) => FieldType::single(FieldKind::Number),
            FieldValue::Boolean(_) => FieldType::single(FieldKind::Boolean),
            FieldValue::Date(_) => FieldType::single(FieldKind::Date),
            FieldValue::Html(_) => FieldType::single(FieldKind::Html),
            FieldValue::Binary(_) => FieldType::single(FieldKind::Binary),
            FieldValue::Node(_) => FieldType::single(FieldKind::Node),
            FieldValue::Micronode(_) => FieldType::single(FieldKind::Micronode),
            FieldValue::StringList(_) => FieldType::list_of(FieldKind::String),
            FieldValue::NumberList(_) => FieldType::list_of(FieldKind::Number),
            FieldValue::BooleanList(_) => FieldType::list_of(FieldKind::Boolean),
            FieldValue::DateList(_) => FieldType::list_of(FieldKind::Date),
            FieldValue::HtmlList(_) => FieldType::list_of(FieldKind::Html),
            FieldValue::BinaryList(_) => FieldType::list_of(FieldKind::Binary),
            FieldValue::NodeList(_) => FieldType::list_of(FieldKind::Node),
            FieldValue::MicronodeList(_) => FieldType::list_of(FieldKind::Micronode),
        }
    }

    pub fn is_list(&self) -> bool {
        self.field_type().list
    }

    /// Decompose into elements. A single value yields one element.
    pub fn into_scalars(self) -> Vec<Scalar> {
        match self {
            FieldValue::String(s) => vec![Scalar::String(s)],
            FieldValue::Number(n) => vec![Scalar::Number(n)],
            FieldValue::Boolean(b) => vec![Scalar::Boolean(b)],
            FieldValue::Date(d) => vec![Scalar::Date(d)],
            FieldValue::Html(h) => vec![Scalar::Html(h)],
            FieldValue::Binary(b) => vec![Scalar::Binary(b)],
            FieldValue::Node(n) => vec![Scalar::Node(n)],
            FieldValue::Micronode(m) => vec![Scalar::Micronode(m)],
            FieldValue::StringList(v) => v.into_iter().map(Scalar::String).collect(),
            FieldValue::NumberList(v) => v.into_iter().map(Scalar::Number).collect(),
            FieldValue::BooleanList(v) => v.into_iter().map(Scalar::Boolean).collect(),
            FieldValue::DateList(v) => v.into_iter().map(Scalar::Date).collect(),
            FieldValue::HtmlList(v) => v.into_iter().map(Scalar::Html).collect(),
            FieldValue::BinaryList(v) => v.into_iter().map(Scalar::Binary).collect(),
            FieldValue::NodeList(v) => v.into_iter().map(Scalar::Node).collect(),
            FieldValue::MicronodeList(v) => v.into_iter().map(Scalar::Micronode).collect(),
        }
    }

    /// Build a single value from one element.
    pub fn from_scalar(scalar: Scalar) -> FieldValue {
        match scalar {
            Scalar::String(s) => FieldValue::String(s),
            Scalar::Number(n) => FieldValue::Number(n),
            Scalar::Boolean(b) => FieldValue::Boolean(b),
            Scalar::Date(d) => FieldValue::Date(d),
            Scalar::Html(h) => FieldValue::Html(h),
            Scalar::Binary(b) => FieldValue::Binary(b),
            Scalar::Node(n) => FieldValue::Node(n),
            Scalar::Micronode(m) => FieldValue::Micronode(m),
        }
    }

    /// Build a list of `kind` from elements. Returns `None` if any element
    /// is of a different kind.
    pub fn list_from_scalars(kind: FieldKind, scalars: Vec<Scalar>) -> Option<FieldValue> {
        fn collect<T>(scalars: Vec<Scalar>, f: impl Fn(Scalar) -> Option<T>) -> Option<Vec<T>> {
            scalars.into_iter().map(f).collect()
        }
        let value = match kind {
            FieldKind::String => FieldValue::StringList(collect(scalars, |s| match s {
                Scalar::String(v) => Some(v),
                _ => None,
            })?),
            FieldKind::Number => FieldValue::NumberList(collect(scalars, |s| match s {
                Scalar::Number(v) => Some(v),
                _ => None,
            })?),
            FieldKind::Boolean => FieldValue::BooleanList(collect(scalars, |s| match s {
                Scalar::Boolean(v) => Some(v),
                _ => None,
            })?),
            FieldKind::Date => FieldValue::DateList(collect(scalars, |s| match s {
                Scalar::Date(v) => Some(v),
                _ => None,
            })?),
            FieldKind::Html => FieldValue::HtmlList(collect(scalars, |s| match s {
                Scalar::Html(v) => Some(v),
                _ => None,
            })?),
            FieldKind::Binary => FieldValue::BinaryList(collect(scalars, |s| match s {
                Scalar::Binary(v) => Some(v),
                _ => None,
            })?),
            FieldKind::Node => FieldValue::NodeList(collect(scalars, |s| match s {
                Scalar::Node(v) => Some(v),
                _ => None,
            })?),
            FieldKind::Micronode => FieldValue::MicronodeList(collect(scalars, |s| match s {
                Scalar::Micronode(v) => Some(v),
                _ => None,
            })?),
        };
        Some(value)
    }
}

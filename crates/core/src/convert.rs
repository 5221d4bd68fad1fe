//! Built-in field type conversions.
//!
//! `convert` is total: every (source, target) pair either produces a value of
//! the target type or `None`. `None` means the field is dropped from the new
//! container. That is a supported, silent narrowing, not an error.
//!
//! The table is built from two layers:
//!
//! - [`convert_scalar`] maps one element to another element kind, matched
//!   exhaustively over every (element, kind) pair.
//! - [`TypeConverterRegistry::convert`] handles cardinality: wrapping a single
//!   value into a list, element-wise list conversion (all-or-nothing) and
//!   narrowing a list to a single value.

use crate::field::{FieldKind, FieldType, FieldValue, Scalar};

/// Separator used when a list is narrowed to a single text value.
pub const LIST_JOIN_SEPARATOR: &str = ",";

/// Stateless conversion table between all field types.
///
/// Holds no data; shared freely between workers.
#[derive(Debug, Clone, Copy, Default)]
pub struct TypeConverterRegistry;

impl TypeConverterRegistry {
    pub fn new() -> Self {
        TypeConverterRegistry
    }

    /// Convert `value`, declared as `source`, into `target`.
    ///
    /// Returns `None` when the conversion is unsupported or fails for this
    /// particular value, and also when `value` does not actually hold
    /// `source`.
    pub fn convert(
        &self,
        source: FieldType,
        target: FieldType,
        value: &FieldValue,
    ) -> Option<FieldValue> {
        if value.field_type() != source {
            return None;
        }
        if source == target {
            return Some(value.clone());
        }
        // Reference and opaque types have no derived representation.
        if target.kind.is_opaque() || source.kind.is_opaque() {
            return None;
        }

        let elements = value.clone().into_scalars();
        match (source.list, target.list) {
            (false, false) => {
                let element = elements.into_iter().next()?;
                convert_scalar(&element, target.kind).map(FieldValue::from_scalar)
            }
            (false, true) | (true, true) => {
                let converted = elements
                    .iter()
                    .map(|e| convert_scalar(e, target.kind))
                    .collect::<Option<Vec<_>>>()?;
                FieldValue::list_from_scalars(target.kind, converted)
            }
            (true, false) => narrow_list(elements, target.kind),
        }
    }

    /// Whether `source` can ever produce a value of `target`.
    ///
    /// A supported pair may still yield `None` for particular values, e.g.
    /// non-numeric text converted to a number.
    pub fn is_supported(&self, source: FieldType, target: FieldType) -> bool {
        source == target || !(source.kind.is_opaque() || target.kind.is_opaque())
    }
}

/// Convert one element into another element kind.
pub fn convert_scalar(value: &Scalar, target: FieldKind) -> Option<Scalar> {
    use FieldKind as K;

    match (value, target) {
        // Text to text: verbatim.
        (Scalar::String(s), K::String) | (Scalar::Html(s), K::String) => {
            Some(Scalar::String(s.clone()))
        }
        (Scalar::String(s), K::Html) | (Scalar::Html(s), K::Html) => Some(Scalar::Html(s.clone())),
        (Scalar::String(s), K::Boolean) | (Scalar::Html(s), K::Boolean) => {
            parse_bool(s).map(Scalar::Boolean)
        }
        (Scalar::String(s), K::Number) | (Scalar::Html(s), K::Number) => {
            parse_i64(s).map(Scalar::Number)
        }
        (Scalar::String(s), K::Date) | (Scalar::Html(s), K::Date) => parse_i64(s).map(Scalar::Date),

        (Scalar::Number(n), K::String) => Some(Scalar::String(n.to_string())),
        (Scalar::Number(n), K::Html) => Some(Scalar::Html(n.to_string())),
        (Scalar::Number(n), K::Number) => Some(Scalar::Number(*n)),
        (Scalar::Number(n), K::Date) => Some(Scalar::Date(*n)),
        (Scalar::Number(n), K::Boolean) => match *n {
            1 => Some(Scalar::Boolean(true)),
            0 => Some(Scalar::Boolean(false)),
            _ => None,
        },

        (Scalar::Boolean(b), K::String) => Some(Scalar::String(b.to_string())),
        (Scalar::Boolean(b), K::Html) => Some(Scalar::Html(b.to_string())),
        (Scalar::Boolean(b), K::Boolean) => Some(Scalar::Boolean(*b)),
        (Scalar::Boolean(b), K::Number) => Some(Scalar::Number(i64::from(*b))),
        (Scalar::Boolean(_), K::Date) => None,

        (Scalar::Date(d), K::String) => Some(Scalar::String(d.to_string())),
        (Scalar::Date(d), K::Html) => Some(Scalar::Html(d.to_string())),
        (Scalar::Date(d), K::Number) => Some(Scalar::Number(*d)),
        (Scalar::Date(d), K::Date) => Some(Scalar::Date(*d)),
        (Scalar::Date(_), K::Boolean) => None,

        (Scalar::Binary(b), K::Binary) => Some(Scalar::Binary(b.clone())),
        (Scalar::Node(n), K::Node) => Some(Scalar::Node(n.clone())),
        (Scalar::Micronode(m), K::Micronode) => Some(Scalar::Micronode(m.clone())),

        // Nothing converts into or out of an opaque kind.
        (_, K::Binary) | (_, K::Node) | (_, K::Micronode) => None,
        (Scalar::Binary(_), _) | (Scalar::Node(_), _) | (Scalar::Micronode(_), _) => None,
    }
}

/// Narrow a list to a single value: text targets join every element, other
/// targets take the first element. An empty list yields nothing.
fn narrow_list(elements: Vec<Scalar>, target: FieldKind) -> Option<FieldValue> {
    if elements.is_empty() {
        return None;
    }
    if target.is_textual() {
        let parts = elements
            .iter()
            .map(|e| match convert_scalar(e, FieldKind::String)? {
                Scalar::String(s) => Some(s),
                _ => None,
            })
            .collect::<Option<Vec<_>>>()?;
        let joined = parts.join(LIST_JOIN_SEPARATOR);
        let scalar = match target {
            FieldKind::Html => Scalar::Html(joined),
            _ => Scalar::String(joined),
        };
        return Some(FieldValue::from_scalar(scalar));
    }
    let first = elements.into_iter().next()?;
    convert_scalar(&first, target).map(FieldValue::from_scalar)
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim() {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

fn parse_i64(s: &str) -> Option<i64> {
    s.trim().parse::<i64>().ok()
}

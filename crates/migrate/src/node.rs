//! The view of a container handed to migration scripts, and the way script
//! output is turned back into typed field values.
//!
//! Text kinds become JSON strings, Number and Date become integers, Boolean
//! becomes a JSON bool and lists become arrays. Binary and Node references
//! keep their serialized object form. Micronodes carry their nested fields in
//! the tagged `{"type", "value"}` form so they survive a round trip unchanged.

use morph_core::{
    BinaryRef, FieldKind, FieldMap, FieldType, FieldValue, Micronode, NodeRef, Scalar,
    SchemaVersionId,
};
use serde_json::{json, Map, Value as Json};

/// `{ "uuid": .., "schema": { "name": .., "version": .. }, "fields": { .. } }`
pub fn node_json(content_id: &str, schema: &SchemaVersionId, fields: &FieldMap) -> Json {
    json!({
        "uuid": content_id,
        "schema": { "name": schema.name, "version": schema.version },
        "fields": fields_json(fields),
    })
}

pub fn fields_json(fields: &FieldMap) -> Json {
    let map: Map<String, Json> = fields
        .iter()
        .map(|(name, value)| (name.clone(), field_json(value)))
        .collect();
    Json::Object(map)
}

pub fn field_json(value: &FieldValue) -> Json {
    let list = value.is_list();
    let mut elements: Vec<Json> = value.clone().into_scalars().into_iter().map(scalar_json).collect();
    if list {
        Json::Array(elements)
    } else {
        elements.pop().unwrap_or(Json::Null)
    }
}

fn scalar_json(scalar: Scalar) -> Json {
    match scalar {
        Scalar::String(s) | Scalar::Html(s) => Json::String(s),
        Scalar::Number(n) | Scalar::Date(n) => Json::from(n),
        Scalar::Boolean(b) => Json::Bool(b),
        Scalar::Binary(b) => serde_json::to_value(b).unwrap_or(Json::Null),
        Scalar::Node(n) => serde_json::to_value(n).unwrap_or(Json::Null),
        Scalar::Micronode(m) => serde_json::to_value(m).unwrap_or(Json::Null),
    }
}

/// Read a script-produced value as `target`. `None` when the JSON does not
/// hold a value of that type; no conversion is attempted.
pub fn field_from_json(json: &Json, target: FieldType) -> Option<FieldValue> {
    if target.list {
        let scalars = json
            .as_array()?
            .iter()
            .map(|e| scalar_from_json(e, target.kind))
            .collect::<Option<Vec<_>>>()?;
        FieldValue::list_from_scalars(target.kind, scalars)
    } else {
        scalar_from_json(json, target.kind).map(FieldValue::from_scalar)
    }
}

fn scalar_from_json(json: &Json, kind: FieldKind) -> Option<Scalar> {
    let scalar = match kind {
        FieldKind::String => Scalar::String(json.as_str()?.to_string()),
        FieldKind::Html => Scalar::Html(json.as_str()?.to_string()),
        FieldKind::Number => Scalar::Number(json.as_i64()?),
        FieldKind::Date => Scalar::Date(json.as_i64()?),
        FieldKind::Boolean => Scalar::Boolean(json.as_bool()?),
        FieldKind::Binary => Scalar::Binary(serde_json::from_value::<BinaryRef>(json.clone()).ok()?),
        FieldKind::Node => Scalar::Node(serde_json::from_value::<NodeRef>(json.clone()).ok()?),
        FieldKind::Micronode => {
            Scalar::Micronode(serde_json::from_value::<Micronode>(json.clone()).ok()?)
        }
    };
    Some(scalar)
}

/// Short JSON type name for diagnostics.
pub fn json_type_name(json: &Json) -> &'static str {
    match json {
        Json::Null => "null",
        Json::Bool(_) => "boolean",
        Json::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "array",
        Json::Object(_) => "object",
    }
}

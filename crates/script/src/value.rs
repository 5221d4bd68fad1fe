//! Runtime values and their conversions to and from JSON.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use serde_json::{Map, Number, Value as Json};

use crate::error::ScriptError;

/// Deepest value nesting converted to or from JSON. Cyclic structures hit this.
const MAX_JSON_DEPTH: usize = 64;

pub type ObjectRef = Rc<RefCell<BTreeMap<String, Value>>>;
pub type ArrayRef = Rc<RefCell<Vec<Value>>>;

/// A script value. Arrays and objects are shared by reference, so mutating
/// `node.fields` inside a script is visible through every alias.
#[derive(Debug, Clone)]
pub enum Value {
    Undefined,
    Null,
    Bool(bool),
    /// An integer handed in by the host. Kept exact until arithmetic turns
    /// it into a `Num`.
    Int(i64),
    Num(f64),
    Str(Rc<str>),
    Array(ArrayRef),
    Object(ObjectRef),
}

impl Value {
    pub fn str(s: impl Into<Rc<str>>) -> Self {
        Value::Str(s.into())
    }

    pub fn array(items: Vec<Value>) -> Self {
        Value::Array(Rc::new(RefCell::new(items)))
    }

    pub fn object(entries: BTreeMap<String, Value>) -> Self {
        Value::Object(Rc::new(RefCell::new(entries)))
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Num(n) => *n != 0.0 && !n.is_nan(),
            Value::Str(s) => !s.is_empty(),
            Value::Array(_) | Value::Object(_) => true,
        }
    }

    pub fn to_number(&self) -> f64 {
        match self {
            Value::Undefined => f64::NAN,
            Value::Null => 0.0,
            Value::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            Value::Int(i) => *i as f64,
            Value::Num(n) => *n,
            Value::Str(s) => string_to_number(s),
            Value::Array(items) => {
                let items = items.borrow();
                match items.len() {
                    0 => 0.0,
                    1 => items[0].to_number(),
                    _ => f64::NAN,
                }
            }
            Value::Object(_) => f64::NAN,
        }
    }

    pub fn to_display(&self) -> String {
        match self {
            Value::Undefined => "undefined".into(),
            Value::Null => "null".into(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Num(n) => number_to_string(*n),
            Value::Str(s) => s.to_string(),
            Value::Array(items) => items
                .borrow()
                .iter()
                .map(|v| {
                    if v.is_nullish() {
                        String::new()
                    } else {
                        v.to_display()
                    }
                })
                .collect::<Vec<_>>()
                .join(","),
            Value::Object(_) => "[object Object]".into(),
        }
    }

    pub fn type_of(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null | Value::Array(_) | Value::Object(_) => "object",
            Value::Bool(_) => "boolean",
            Value::Int(_) | Value::Num(_) => "number",
            Value::Str(_) => "string",
        }
    }

    /// `===`
    pub fn strict_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Num(a), Value::Num(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Int(a), Value::Num(b)) | (Value::Num(b), Value::Int(a)) => int_equals_num(*a, *b),
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// `==`
    pub fn loose_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (a, b) if a.is_nullish() && b.is_nullish() => true,
            (a, b) if a.is_nullish() || b.is_nullish() => false,
            (Value::Num(_) | Value::Int(_), Value::Str(_))
            | (Value::Str(_), Value::Num(_) | Value::Int(_))
            | (Value::Bool(_), _)
            | (_, Value::Bool(_)) => {
                let (a, b) = (self.to_number(), other.to_number());
                a == b
            }
            (Value::Array(_) | Value::Object(_), Value::Num(_) | Value::Int(_) | Value::Str(_)) => {
                Value::str(self.to_display()).loose_equals(other)
            }
            (Value::Num(_) | Value::Int(_) | Value::Str(_), Value::Array(_) | Value::Object(_)) => {
                self.loose_equals(&Value::str(other.to_display()))
            }
            _ => self.strict_equals(other),
        }
    }

    // ── JSON bridge ───────────────────────────────

    pub fn from_json(json: &Json) -> Result<Value, ScriptError> {
        from_json_at(json, 0)
    }

    /// Convert to JSON. `undefined` object members are dropped, as are
    /// non-finite numbers (which become `null`).
    pub fn to_json(&self) -> Result<Json, ScriptError> {
        to_json_at(self, 0)
    }
}

fn from_json_at(json: &Json, depth: usize) -> Result<Value, ScriptError> {
    if depth > MAX_JSON_DEPTH {
        return Err(ScriptError::runtime("input nests too deeply"));
    }
    Ok(match json {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => Value::Num(n.as_f64().unwrap_or(f64::NAN)),
        },
        Json::String(s) => Value::str(s.as_str()),
        Json::Array(items) => Value::array(
            items
                .iter()
                .map(|v| from_json_at(v, depth + 1))
                .collect::<Result<_, _>>()?,
        ),
        Json::Object(map) => {
            let mut entries = BTreeMap::new();
            for (k, v) in map {
                entries.insert(k.clone(), from_json_at(v, depth + 1)?);
            }
            Value::object(entries)
        }
    })
}

fn to_json_at(value: &Value, depth: usize) -> Result<Json, ScriptError> {
    if depth > MAX_JSON_DEPTH {
        return Err(ScriptError::runtime(
            "value nests too deeply or refers to itself",
        ));
    }
    Ok(match value {
        Value::Undefined | Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Int(i) => Json::Number(Number::from(*i)),
        Value::Num(n) => number_to_json(*n),
        Value::Str(s) => Json::String(s.to_string()),
        Value::Array(items) => Json::Array(
            items
                .borrow()
                .iter()
                .map(|v| to_json_at(v, depth + 1))
                .collect::<Result<_, _>>()?,
        ),
        Value::Object(entries) => {
            let mut map = Map::new();
            for (k, v) in entries.borrow().iter() {
                if matches!(v, Value::Undefined) {
                    continue;
                }
                map.insert(k.clone(), to_json_at(v, depth + 1)?);
            }
            Json::Object(map)
        }
    })
}

/// Integral values inside the i64 range serialize as JSON integers.
fn number_to_json(n: f64) -> Json {
    match exact_i64(n) {
        Some(i) => Json::Number(Number::from(i)),
        None => Number::from_f64(n).map(Json::Number).unwrap_or(Json::Null),
    }
}

/// `n` as an i64 when it is integral and in range. `i64::MAX as f64` is 2^63,
/// one past the range.
fn exact_i64(n: f64) -> Option<i64> {
    if n.is_finite() && n.fract() == 0.0 && n >= i64::MIN as f64 && n < i64::MAX as f64 {
        Some(n as i64)
    } else {
        None
    }
}

fn int_equals_num(i: i64, n: f64) -> bool {
    exact_i64(n) == Some(i)
}

pub fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        "NaN".into()
    } else if n.is_infinite() {
        if n > 0.0 {
            "Infinity".into()
        } else {
            "-Infinity".into()
        }
    } else if n.fract() == 0.0 && n.abs() < 1e21 {
        format!("{}", n as i128)
    } else {
        format!("{}", n)
    }
}

pub fn string_to_number(s: &str) -> f64 {
    let t = s.trim();
    if t.is_empty() {
        return 0.0;
    }
    match t {
        "Infinity" | "+Infinity" => return f64::INFINITY,
        "-Infinity" => return f64::NEG_INFINITY,
        _ => {}
    }
    if let Some(hex) = t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
        return i64::from_str_radix(hex, 16)
            .map(|v| v as f64)
            .unwrap_or(f64::NAN);
    }
    // Rust accepts "inf"/"nan" spellings the script language does not.
    if t.chars().any(|c| c.is_ascii_alphabetic() && c != 'e' && c != 'E') {
        return f64::NAN;
    }
    t.parse::<f64>().unwrap_or(f64::NAN)
}

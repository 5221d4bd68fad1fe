use super::Interpreter;
use crate::error::ScriptError;
use crate::value::{string_to_number, Value};

const NAMESPACES: &[&str] = &["Math", "JSON", "Object", "Array"];

const GLOBAL_FUNCTIONS: &[&str] = &[
    "parseInt",
    "parseFloat",
    "String",
    "Number",
    "Boolean",
    "isNaN",
    "isFinite",
];

pub(super) fn is_namespace(name: &str) -> bool {
    NAMESPACES.contains(&name)
}

pub(super) fn is_global_function(name: &str) -> bool {
    GLOBAL_FUNCTIONS.contains(&name)
}

fn arg(args: &[Value], i: usize) -> Value {
    args.get(i).cloned().unwrap_or(Value::Undefined)
}

/// Integer argument with JS-style defaulting and truncation.
fn int_arg(args: &[Value], i: usize, default: i64) -> i64 {
    match args.get(i) {
        None | Some(Value::Undefined) => default,
        Some(v) => {
            let n = v.to_number();
            if n.is_nan() {
                0
            } else {
                n.trunc().clamp(i64::MIN as f64, i64::MAX as f64) as i64
            }
        }
    }
}

/// Resolve a possibly negative relative index against `len`.
fn relative_index(i: i64, len: usize) -> usize {
    if i < 0 {
        len.saturating_sub(i.unsigned_abs() as usize)
    } else {
        (i as usize).min(len)
    }
}

impl<'p> Interpreter<'p> {
    // ── Global functions ──────────────────────────

    pub(super) fn call_global(&mut self, name: &str, args: Vec<Value>) -> Result<Value, ScriptError> {
        Ok(match name {
            "parseInt" => {
                let radix = int_arg(&args, 1, 0);
                Value::Num(parse_int(&arg(&args, 0).to_display(), radix))
            }
            "parseFloat" => Value::Num(parse_float(&arg(&args, 0).to_display())),
            "String" => Value::str(arg(&args, 0).to_display()),
            "Number" => Value::Num(match args.first() {
                None => 0.0,
                Some(v) => v.to_number(),
            }),
            "Boolean" => Value::Bool(arg(&args, 0).truthy()),
            "isNaN" => Value::Bool(arg(&args, 0).to_number().is_nan()),
            "isFinite" => Value::Bool(arg(&args, 0).to_number().is_finite()),
            _ => return Err(self.rt(format!("{} is not defined", name))),
        })
    }

    // ── Math / JSON / Object / Array ──────────────

    pub(super) fn call_namespace(
        &mut self,
        ns: &str,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Value, ScriptError> {
        let num = |i: usize| arg(&args, i).to_number();
        let out = match (ns, method) {
            ("Math", "floor") => Value::Num(num(0).floor()),
            ("Math", "ceil") => Value::Num(num(0).ceil()),
            ("Math", "round") => Value::Num((num(0) + 0.5).floor()),
            ("Math", "trunc") => Value::Num(num(0).trunc()),
            ("Math", "abs") => Value::Num(num(0).abs()),
            ("Math", "sign") => {
                let n = num(0);
                Value::Num(if n.is_nan() || n == 0.0 { n } else { n.signum() })
            }
            ("Math", "sqrt") => Value::Num(num(0).sqrt()),
            ("Math", "pow") => Value::Num(num(0).powf(num(1))),
            ("Math", "min") => Value::Num(fold_numbers(&args, f64::INFINITY, f64::min)),
            ("Math", "max") => Value::Num(fold_numbers(&args, f64::NEG_INFINITY, f64::max)),
            ("JSON", "stringify") => {
                let v = arg(&args, 0);
                if matches!(v, Value::Undefined) {
                    return Ok(Value::Undefined);
                }
                let json = v.to_json()?;
                let text = json.to_string();
                self.check_string(text.len())?;
                self.charge((text.len() / 64) as u64)?;
                Value::str(text)
            }
            ("JSON", "parse") => {
                let text = arg(&args, 0).to_display();
                self.charge((text.len() / 64) as u64)?;
                let json: serde_json::Value = serde_json::from_str(&text)
                    .map_err(|e| self.rt(format!("JSON.parse: {}", e)))?;
                Value::from_json(&json)?
            }
            ("Object", "keys") => match arg(&args, 0) {
                Value::Object(map) => Value::array(
                    map.borrow().keys().map(|k| Value::str(k.as_str())).collect(),
                ),
                Value::Array(items) => Value::array(
                    (0..items.borrow().len())
                        .map(|i| Value::str(i.to_string()))
                        .collect(),
                ),
                other if other.is_nullish() => {
                    return Err(self.rt("Object.keys called on null or undefined"))
                }
                _ => Value::array(Vec::new()),
            },
            ("Object", "values") => match arg(&args, 0) {
                Value::Object(map) => Value::array(map.borrow().values().cloned().collect()),
                Value::Array(items) => Value::array(items.borrow().clone()),
                other if other.is_nullish() => {
                    return Err(self.rt("Object.values called on null or undefined"))
                }
                _ => Value::array(Vec::new()),
            },
            ("Array", "isArray") => Value::Bool(matches!(arg(&args, 0), Value::Array(_))),
            _ => return Err(self.rt(format!("{}.{} is not a function", ns, method))),
        };
        Ok(out)
    }

    // ── Methods on values ─────────────────────────

    pub(super) fn call_method(
        &mut self,
        target: &Value,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Value, ScriptError> {
        match target {
            Value::Str(s) => self.string_method(s, method, &args),
            Value::Array(_) => self.array_method(target, method, &args),
            Value::Object(map) => match method {
                "hasOwnProperty" => Ok(Value::Bool(
                    map.borrow().contains_key(&arg(&args, 0).to_display()),
                )),
                _ => Err(self.rt(format!("{} is not a function", method))),
            },
            Value::Num(_) | Value::Int(_) => match method {
                "toString" => Ok(Value::str(target.to_display())),
                "toFixed" => {
                    let digits = int_arg(&args, 0, 0).clamp(0, 20) as usize;
                    Ok(Value::str(format!("{:.*}", digits, target.to_number())))
                }
                _ => Err(self.rt(format!("{} is not a function", method))),
            },
            Value::Bool(b) => match method {
                "toString" => Ok(Value::str(b.to_string())),
                _ => Err(self.rt(format!("{} is not a function", method))),
            },
            Value::Undefined | Value::Null => Err(self.rt(format!(
                "cannot read property '{}' of {}",
                method,
                target.to_display()
            ))),
        }
    }

    fn string_method(&mut self, s: &str, method: &str, args: &[Value]) -> Result<Value, ScriptError> {
        self.charge((s.len() / 64) as u64)?;
        let text_arg = |i: usize| arg(args, i).to_display();
        let chars: Vec<char> = s.chars().collect();
        let len = chars.len();
        let slice = |from: usize, to: usize| -> String {
            if from >= to {
                String::new()
            } else {
                chars[from..to].iter().collect()
            }
        };
        let char_index = |byte: usize| s[..byte].chars().count();

        Ok(match method {
            "toString" => Value::str(s),
            "toUpperCase" => Value::str(s.to_uppercase()),
            "toLowerCase" => Value::str(s.to_lowercase()),
            "trim" => Value::str(s.trim()),
            "indexOf" => Value::Num(match s.find(text_arg(0).as_str()) {
                Some(b) => char_index(b) as f64,
                None => -1.0,
            }),
            "lastIndexOf" => Value::Num(match s.rfind(text_arg(0).as_str()) {
                Some(b) => char_index(b) as f64,
                None => -1.0,
            }),
            "includes" => Value::Bool(s.contains(text_arg(0).as_str())),
            "startsWith" => Value::Bool(s.starts_with(text_arg(0).as_str())),
            "endsWith" => Value::Bool(s.ends_with(text_arg(0).as_str())),
            "charAt" => {
                let i = int_arg(args, 0, 0);
                Value::str(if i >= 0 && (i as usize) < len {
                    chars[i as usize].to_string()
                } else {
                    String::new()
                })
            }
            "substring" => {
                let a = int_arg(args, 0, 0).clamp(0, len as i64) as usize;
                let b = int_arg(args, 1, len as i64).clamp(0, len as i64) as usize;
                Value::str(slice(a.min(b), a.max(b)))
            }
            "slice" => {
                let a = relative_index(int_arg(args, 0, 0), len);
                let b = relative_index(int_arg(args, 1, len as i64), len);
                Value::str(slice(a, b))
            }
            "split" => {
                let parts: Vec<Value> = match args.first() {
                    None | Some(Value::Undefined) => vec![Value::str(s)],
                    Some(sep) => {
                        let sep = sep.to_display();
                        if sep.is_empty() {
                            chars.iter().map(|c| Value::str(c.to_string())).collect()
                        } else {
                            s.split(sep.as_str()).map(Value::str).collect()
                        }
                    }
                };
                self.check_collection(parts.len())?;
                Value::array(parts)
            }
            "replace" | "replaceAll" => {
                let pattern = text_arg(0);
                let replacement = text_arg(1);
                let out = if method == "replace" {
                    s.replacen(pattern.as_str(), &replacement, 1)
                } else if pattern.is_empty() {
                    return Err(self.rt("replaceAll requires a non-empty pattern"));
                } else {
                    s.replace(pattern.as_str(), &replacement)
                };
                self.check_string(out.len())?;
                Value::str(out)
            }
            "repeat" => {
                let n = int_arg(args, 0, 0);
                if n < 0 {
                    return Err(self.rt("repeat count must be non-negative"));
                }
                let total = s.len().saturating_mul(n as usize);
                self.check_string(total)?;
                self.charge((total / 64) as u64)?;
                Value::str(s.repeat(n as usize))
            }
            "concat" => {
                let mut out = s.to_string();
                for a in args {
                    out.push_str(&a.to_display());
                }
                self.check_string(out.len())?;
                Value::str(out)
            }
            _ => return Err(self.rt(format!("{} is not a function", method))),
        })
    }

    fn array_method(&mut self, target: &Value, method: &str, args: &[Value]) -> Result<Value, ScriptError> {
        let Value::Array(items) = target else {
            return Err(self.rt(format!("{} is not a function", method)));
        };
        self.charge(items.borrow().len() as u64 / 16)?;
        Ok(match method {
            "push" => {
                let new_len = items.borrow().len() + args.len();
                self.check_collection(new_len)?;
                items.borrow_mut().extend(args.iter().cloned());
                Value::Num(new_len as f64)
            }
            "pop" => items.borrow_mut().pop().unwrap_or(Value::Undefined),
            "shift" => {
                let mut items = items.borrow_mut();
                if items.is_empty() {
                    Value::Undefined
                } else {
                    items.remove(0)
                }
            }
            "join" => {
                let sep = match args.first() {
                    None | Some(Value::Undefined) => ",".to_string(),
                    Some(v) => v.to_display(),
                };
                let joined = items
                    .borrow()
                    .iter()
                    .map(|v| if v.is_nullish() { String::new() } else { v.to_display() })
                    .collect::<Vec<_>>()
                    .join(&sep);
                self.check_string(joined.len())?;
                Value::str(joined)
            }
            "indexOf" => {
                let needle = arg(args, 0);
                let pos = items.borrow().iter().position(|v| v.strict_equals(&needle));
                Value::Num(pos.map(|p| p as f64).unwrap_or(-1.0))
            }
            "includes" => {
                let needle = arg(args, 0);
                let found = items.borrow().iter().any(|v| {
                    v.strict_equals(&needle)
                        || matches!((v, &needle), (Value::Num(a), Value::Num(b)) if a.is_nan() && b.is_nan())
                });
                Value::Bool(found)
            }
            "slice" => {
                let items = items.borrow();
                let len = items.len();
                let a = relative_index(int_arg(args, 0, 0), len);
                let b = relative_index(int_arg(args, 1, len as i64), len);
                Value::array(if a < b { items[a..b].to_vec() } else { Vec::new() })
            }
            "concat" => {
                let mut out = items.borrow().clone();
                for a in args {
                    match a {
                        Value::Array(more) => out.extend(more.borrow().iter().cloned()),
                        other => out.push(other.clone()),
                    }
                }
                self.check_collection(out.len())?;
                Value::array(out)
            }
            "reverse" => {
                items.borrow_mut().reverse();
                target.clone()
            }
            "toString" => Value::str(target.to_display()),
            _ => return Err(self.rt(format!("{} is not a function", method))),
        })
    }
}

/// NaN propagates, as in `Math.min` / `Math.max`.
fn fold_numbers(args: &[Value], init: f64, pick: fn(f64, f64) -> f64) -> f64 {
    args.iter().map(Value::to_number).fold(init, |acc, n| {
        if acc.is_nan() || n.is_nan() {
            f64::NAN
        } else {
            pick(acc, n)
        }
    })
}

/// Leading-integer parse: optional sign, optional `0x` when the radix is 16
/// or unspecified (0), then as many digits of the radix as present.
fn parse_int(s: &str, radix: i64) -> f64 {
    let t = s.trim_start();
    let (negative, t) = match t.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, t.strip_prefix('+').unwrap_or(t)),
    };
    let mut radix = radix;
    let mut digits = t;
    if radix == 0 || radix == 16 {
        if let Some(rest) = t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
            radix = 16;
            digits = rest;
        }
    }
    if radix == 0 {
        radix = 10;
    }
    if !(2..=36).contains(&radix) {
        return f64::NAN;
    }
    let radix = radix as u32;
    let mut value: f64 = 0.0;
    let mut any = false;
    for c in digits.chars() {
        match c.to_digit(radix) {
            Some(d) => {
                value = value * radix as f64 + d as f64;
                any = true;
            }
            None => break,
        }
    }
    if !any {
        return f64::NAN;
    }
    if negative {
        -value
    } else {
        value
    }
}

/// Longest numeric prefix of `s`.
fn parse_float(s: &str) -> f64 {
    let t = s.trim_start();
    let bytes = t.as_bytes();
    let mut end = 0;
    if end < bytes.len() && (bytes[end] == b'+' || bytes[end] == b'-') {
        end += 1;
    }
    if t[end..].starts_with("Infinity") {
        return if t.starts_with('-') {
            f64::NEG_INFINITY
        } else {
            f64::INFINITY
        };
    }
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    if end < bytes.len() && bytes[end] == b'.' {
        end += 1;
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
        }
    }
    if end < bytes.len() && (bytes[end] == b'e' || bytes[end] == b'E') {
        let mut look = end + 1;
        if look < bytes.len() && (bytes[look] == b'+' || bytes[look] == b'-') {
            look += 1;
        }
        if look < bytes.len() && bytes[look].is_ascii_digit() {
            end = look;
            while end < bytes.len() && bytes[end].is_ascii_digit() {
                end += 1;
            }
        }
    }
    let prefix = &t[..end];
    if prefix.is_empty() || prefix == "+" || prefix == "-" || prefix == "." {
        return f64::NAN;
    }
    string_to_number(prefix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_int_reads_leading_digits() {
        assert_eq!(parse_int("42px", 0), 42.0);
        assert_eq!(parse_int("  -7", 10), -7.0);
        assert_eq!(parse_int("0x1f", 0), 31.0);
        assert_eq!(parse_int("0x1f", 10), 0.0);
        assert_eq!(parse_int("ff", 16), 255.0);
        assert!(parse_int("abc", 10).is_nan());
    }

    #[test]
    fn parse_float_reads_longest_prefix() {
        assert_eq!(parse_float("3.14abc"), 3.14);
        assert_eq!(parse_float("1e3x"), 1000.0);
        assert_eq!(parse_float("-2.5"), -2.5);
        assert!(parse_float("x1").is_nan());
    }

    #[test]
    fn relative_index_clamps() {
        assert_eq!(relative_index(-1, 5), 4);
        assert_eq!(relative_index(-10, 5), 0);
        assert_eq!(relative_index(10, 5), 5);
    }
}

//! # Interpolator
//!
//! Resolution of `${path}` expressions against a request context. Two modes:
//!
//! - **Value mode**: a string that is exactly one `${path}` expression
//!   resolves to the native value at that path — numbers stay numbers,
//!   objects stay objects, arrays stay arrays.
//! - **String mode**: every embedded `${path}` is replaced by the string
//!   form of its value and the pieces are concatenated. Missing values and
//!   `null` render as the empty string; `0` renders as `"0"`.
//!
//! [`resolve`] recurses structurally, so an action's whole `args` object or
//! a `return` node's body can be interpolated in one call. Both operations
//! are pure over `(expression, context)`.

use crate::context::FluxContext;
use serde_json::Value;

/// Recursively substitute `${path}` expressions in `expr`.
///
/// Non-string primitives pass through unchanged; arrays and objects are
/// rebuilt with each element resolved. A path that resolves to nothing
/// collapses to `null` in value mode.
pub fn resolve(expr: &Value, ctx: &FluxContext) -> Value {
    match expr {
        Value::String(s) => resolve_string(s, ctx),
        Value::Array(items) => Value::Array(items.iter().map(|v| resolve(v, ctx)).collect()),
        Value::Object(fields) => Value::Object(
            fields
                .iter()
                .map(|(k, v)| (k.clone(), resolve(v, ctx)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Resolve one string expression, choosing value or string mode.
pub fn resolve_string(s: &str, ctx: &FluxContext) -> Value {
    if !s.contains("${") {
        return Value::String(s.to_string());
    }
    if let Some(path) = full_expression(s) {
        return lookup(path, ctx).unwrap_or(Value::Null);
    }

    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                out.push_str(&render(lookup(&after[..end], ctx)));
                rest = &after[end + 1..];
            }
            None => {
                // Unterminated placeholder: keep the literal text.
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    Value::String(out)
}

/// Walk a dotted path through the context bindings.
///
/// The first segment addresses a top-level binding; the remaining segments
/// walk object fields and numeric array indices. Any missing intermediate
/// yields `None`.
pub fn lookup(path: &str, ctx: &FluxContext) -> Option<Value> {
    let mut segments = path.split('.');
    let root = segments.next()?;
    let mut current = ctx.binding(root)?;

    for segment in segments {
        current = match current {
            Value::Object(fields) => fields.get(segment)?.clone(),
            Value::Array(items) => {
                let index: usize = segment.parse().ok()?;
                items.get(index)?.clone()
            }
            _ => return None,
        };
    }
    Some(current)
}

/// Boolean coercion used for bare conditions and evaluation fallbacks:
/// `null`, `false`, `0` and `""` are falsy, everything else is truthy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// The inner path when `s` is exactly `${path}` with no stray `}` inside.
fn full_expression(s: &str) -> Option<&str> {
    let inner = s.strip_prefix("${")?.strip_suffix('}')?;
    if inner.is_empty() || inner.contains('}') {
        return None;
    }
    Some(inner)
}

/// String form used in string mode.
fn render(value: Option<Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s,
        Some(Value::Bool(b)) => b.to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(composite) => composite.to_string(),
    }
}

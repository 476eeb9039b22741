//! Truthiness coercion for status fields

use serde_json::Value;

/// Coerce a decoded value into a boolean.
///
/// Booleans map directly, numbers are `true` when non-zero, and `null` or any
/// other shape yields `default`.
pub fn as_bool(value: &Value, default: bool) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                i != 0
            } else if let Some(u) = n.as_u64() {
                u != 0
            } else {
                n.as_f64().map_or(default, |f| f != 0.0)
            }
        }
        _ => default,
    }
}

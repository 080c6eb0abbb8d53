//! Bounded JSON sanitizer
//!
//! Wire payloads must stay serializable and size-bounded no matter what the
//! host application stuffed into an event's context. Instead of try/catch
//! around serialization, values are rebuilt against explicit budgets: a depth
//! cap, a string cap and an element cap. Anything over budget is replaced by
//! a typed truncation marker, so one pathological event can shrink but never
//! poison a batch. `serde_json::Value` is a tree, so cycle tracking reduces
//! to the depth budget.

use serde_json::{Map, Value};

/// Maximum nesting depth kept in a sanitized value.
pub const MAX_DEPTH: usize = 16;
/// Maximum length for a single string value.
pub const MAX_STRING_LEN: usize = 8 * 1024;
/// Maximum elements kept per array or object.
pub const MAX_ELEMENTS: usize = 256;

/// Marker substituted for values that exceeded a budget.
pub const TRUNCATED: &str = "[truncated]";

/// Rebuild `value` within the default budgets.
pub fn bounded(value: &Value) -> Value {
    bounded_at_depth(value, 0)
}

fn bounded_at_depth(value: &Value, depth: usize) -> Value {
    if depth >= MAX_DEPTH {
        return Value::String(TRUNCATED.to_string());
    }

    match value {
        Value::String(s) => {
            if s.len() > MAX_STRING_LEN {
                let mut end = MAX_STRING_LEN;
                // Back off to a char boundary so the truncation slice is valid.
                while end > 0 && !s.is_char_boundary(end) {
                    end -= 1;
                }
                Value::String(format!("{}{}", &s[..end], TRUNCATED))
            } else {
                value.clone()
            }
        }
        Value::Array(items) => {
            let mut out: Vec<Value> = items
                .iter()
                .take(MAX_ELEMENTS)
                .map(|v| bounded_at_depth(v, depth + 1))
                .collect();
            if items.len() > MAX_ELEMENTS {
                out.push(Value::String(format!(
                    "{} ({} more)",
                    TRUNCATED,
                    items.len() - MAX_ELEMENTS
                )));
            }
            Value::Array(out)
        }
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, val) in map.iter().take(MAX_ELEMENTS) {
                out.insert(key.clone(), bounded_at_depth(val, depth + 1));
            }
            if map.len() > MAX_ELEMENTS {
                out.insert(
                    TRUNCATED.to_string(),
                    Value::String(format!("{} more entries", map.len() - MAX_ELEMENTS)),
                );
            }
            Value::Object(out)
        }
        other => other.clone(),
    }
}

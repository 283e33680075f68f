//! Nested JSON to dotted field paths.

use serde_json::{Map, Value};
use trawl_core::Fields;

/// Flattens nested objects into dotted keys.
///
/// `{"user": {"name": "x"}}` becomes `{"user.name": "x"}`. Arrays and
/// scalars are kept as leaf values; empty nested objects vanish.
#[must_use]
pub fn flatten(object: &Map<String, Value>) -> Fields {
    let mut fields = Fields::new();
    flatten_into(&mut fields, "", object);
    fields
}

fn flatten_into(out: &mut Fields, root: &str, object: &Map<String, Value>) {
    for (key, value) in object {
        let path = if root.is_empty() {
            key.clone()
        } else {
            format!("{root}.{key}")
        };
        match value {
            Value::Object(nested) => flatten_into(out, &path, nested),
            other => {
                out.insert(path, other.clone());
            }
        }
    }
}

/// JSON type name reported by field introspection.
#[must_use]
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

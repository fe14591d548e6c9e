//! Normalisation of provider wire values into plain JSON.
//!
//! Gemini function-call arguments sometimes arrive as protobuf `Struct`
//! trees instead of plain JSON: every value is wrapped in a single-key
//! object tagging its kind (`stringValue`, `numberValue`, `structValue`,
//! and so on). Tool handlers should never see that encoding, so the loop
//! normalises arguments before dispatch. Plain JSON passes through
//! untouched, which keeps the function total over mixed trees.

use serde_json::{Map, Value};

/// Recursively rewrites proto-tagged wrapper objects into plain JSON.
///
/// Unrecognised single-key objects are ordinary maps and are recursed into
/// rather than unwrapped, so tool arguments that legitimately contain one
/// key survive normalisation.
#[must_use]
pub fn normalize(value: Value) -> Value {
    match value {
        Value::Object(map) => normalize_object(map),
        Value::Array(items) => Value::Array(items.into_iter().map(normalize).collect()),
        other => other,
    }
}

fn normalize_object(map: Map<String, Value>) -> Value {
    if map.len() == 1 {
        // A single-key object may be a proto wrapper. Only the known tags
        // are unwrapped.
        let (key, inner) = map.into_iter().next().unwrap_or_default();
        return match (key.as_str(), inner) {
            ("nullValue", _) => Value::Null,
            ("boolValue", value @ Value::Bool(_)) => value,
            ("numberValue", value @ Value::Number(_)) => value,
            ("stringValue", value @ Value::String(_)) => value,
            ("structValue", Value::Object(mut outer)) => match outer.shift_remove("fields") {
                Some(Value::Object(fields)) => Value::Object(
                    fields
                        .into_iter()
                        .map(|(name, field)| (name, normalize(field)))
                        .collect(),
                ),
                Some(other) => normalize(other),
                None => Value::Object(Map::new()),
            },
            ("listValue", Value::Object(mut outer)) => match outer.shift_remove("values") {
                Some(Value::Array(values)) => {
                    Value::Array(values.into_iter().map(normalize).collect())
                }
                Some(other) => normalize(other),
                None => Value::Array(Vec::new()),
            },
            (_, inner) => {
                let mut rebuilt = Map::new();
                rebuilt.insert(key, normalize(inner));
                Value::Object(rebuilt)
            }
        };
    }

    Value::Object(
        map.into_iter()
            .map(|(key, value)| (key, normalize(value)))
            .collect(),
    )
}

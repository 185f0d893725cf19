use crate::infrastructure::document_store::{FieldPath, Fields};
use crate::infrastructure::error::InfraError;
use serde_json::{Map, Value, json};

/// Wraps a plain JSON value in Firestore's typed `Value` representation.
/// Integers travel as decimal strings, as the REST API requires.
pub fn encode_value(value: &Value) -> Value {
    match value {
        Value::Null => json!({ "nullValue": null }),
        Value::Bool(flag) => json!({ "booleanValue": flag }),
        Value::Number(number) => {
            if let Some(integer) = number.as_i64() {
                json!({ "integerValue": integer.to_string() })
            } else if let Some(integer) = number.as_u64() {
                json!({ "integerValue": integer.to_string() })
            } else {
                json!({ "doubleValue": number.as_f64().unwrap_or(0.0) })
            }
        }
        Value::String(text) => json!({ "stringValue": text }),
        Value::Array(items) => json!({
            "arrayValue": { "values": items.iter().map(encode_value).collect::<Vec<_>>() }
        }),
        Value::Object(map) => json!({ "mapValue": { "fields": encode_fields(map) } }),
    }
}

pub fn encode_fields(fields: &Fields) -> Value {
    Value::Object(
        fields
            .iter()
            .map(|(key, value)| (key.clone(), encode_value(value)))
            .collect(),
    )
}

pub fn decode_value(value: &Value) -> Result<Value, InfraError> {
    let object = value
        .as_object()
        .ok_or_else(|| InfraError::Store(format!("firestore value is not an object: {value}")))?;
    let Some((kind, inner)) = object.iter().next() else {
        return Err(InfraError::Store("firestore value has no type tag".to_string()));
    };

    match kind.as_str() {
        "nullValue" => Ok(Value::Null),
        "booleanValue" => inner
            .as_bool()
            .map(Value::Bool)
            .ok_or_else(|| invalid(kind, inner)),
        "integerValue" => {
            let parsed = match inner {
                Value::String(raw) => raw.trim().parse::<i64>().ok(),
                Value::Number(number) => number.as_i64(),
                _ => None,
            };
            parsed.map(Value::from).ok_or_else(|| invalid(kind, inner))
        }
        "doubleValue" => match inner {
            Value::Number(_) => Ok(inner.clone()),
            // NaN and infinities arrive as strings and have no JSON form.
            Value::String(_) => Ok(Value::Null),
            _ => Err(invalid(kind, inner)),
        },
        "stringValue" | "timestampValue" | "referenceValue" | "bytesValue" => inner
            .as_str()
            .map(|text| Value::String(text.to_string()))
            .ok_or_else(|| invalid(kind, inner)),
        "geoPointValue" => Ok(inner.clone()),
        "arrayValue" => {
            let values = inner
                .get("values")
                .and_then(Value::as_array)
                .map(|values| values.iter().map(decode_value).collect::<Result<Vec<_>, _>>())
                .transpose()?
                .unwrap_or_default();
            Ok(Value::Array(values))
        }
        "mapValue" => {
            let fields = match inner.get("fields") {
                Some(fields) => decode_fields(fields)?,
                None => Fields::new(),
            };
            Ok(Value::Object(fields))
        }
        other => Err(InfraError::Store(format!("unsupported firestore value type '{other}'"))),
    }
}

pub fn decode_fields(fields: &Value) -> Result<Fields, InfraError> {
    let Some(map) = fields.as_object() else {
        return Err(InfraError::Store(format!("firestore fields are not an object: {fields}")));
    };
    let mut decoded = Map::new();
    for (key, value) in map {
        decoded.insert(key.clone(), decode_value(value)?);
    }
    Ok(decoded)
}

fn invalid(kind: &str, inner: &Value) -> InfraError {
    InfraError::Store(format!("invalid firestore {kind}: {inner}"))
}

/// Segments that are not simple identifiers are wrapped in backticks.
pub fn quote_segment(segment: &str) -> String {
    let mut chars = segment.chars();
    let simple = chars
        .next()
        .is_some_and(|first| first.is_ascii_alphabetic() || first == '_')
        && chars.all(|next| next.is_ascii_alphanumeric() || next == '_');
    if simple {
        return segment.to_string();
    }
    let escaped = segment.replace('\\', "\\\\").replace('`', "\\`");
    format!("`{escaped}`")
}

pub fn encode_field_path(path: &FieldPath) -> String {
    path.segments()
        .iter()
        .map(|segment| quote_segment(segment))
        .collect::<Vec<_>>()
        .join(".")
}

/// Field paths touched by a merge write: every leaf, descending into
/// non-empty maps so sibling keys on the server are preserved.
pub fn leaf_field_paths(fields: &Fields) -> Vec<FieldPath> {
    let mut paths = Vec::new();
    collect_leaves(fields, &mut Vec::new(), &mut paths);
    paths
}

fn collect_leaves(fields: &Fields, prefix: &mut Vec<String>, paths: &mut Vec<FieldPath>) {
    for (key, value) in fields {
        prefix.push(key.clone());
        match value {
            Value::Object(child) if !child.is_empty() => collect_leaves(child, prefix, paths),
            _ => paths.push(FieldPath::from_segments(prefix.clone())),
        }
        prefix.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn integers_are_encoded_as_decimal_strings() {
        assert_eq!(
            encode_value(&json!(1_500_000)),
            json!({ "integerValue": "1500000" })
        );
        assert_eq!(encode_value(&json!(0.5)), json!({ "doubleValue": 0.5 }));
        assert_eq!(encode_value(&json!(null)), json!({ "nullValue": null }));
    }

    #[test]
    fn nested_maps_decode_to_plain_json() {
        let wire = json!({
            "focusMs": { "integerValue": "70000" },
            "updatedAt": { "timestampValue": "2026-10-16T08:00:00Z" },
            "taskBreakdown": { "mapValue": { "fields": {
                "Deep Work": { "integerValue": "70000" },
                "Reading": { "doubleValue": 1.0 }
            } } },
            "empty": { "mapValue": {} },
            "tags": { "arrayValue": {} }
        });
        let decoded = decode_fields(&wire).expect("decode");
        assert_eq!(
            Value::Object(decoded),
            json!({
                "focusMs": 70000,
                "updatedAt": "2026-10-16T08:00:00Z",
                "taskBreakdown": { "Deep Work": 70000, "Reading": 1.0 },
                "empty": {},
                "tags": []
            })
        );
    }

    #[test]
    fn malformed_values_are_rejected() {
        assert!(decode_value(&json!({ "integerValue": "twelve" })).is_err());
        assert!(decode_value(&json!({ "mysteryValue": 1 })).is_err());
        assert!(decode_value(&json!("bare")).is_err());
    }

    #[test]
    fn field_paths_quote_non_identifier_segments() {
        assert_eq!(quote_segment("focusMs"), "focusMs");
        assert_eq!(quote_segment("_private1"), "_private1");
        assert_eq!(quote_segment("Deep Work"), "`Deep Work`");
        assert_eq!(quote_segment("9lives"), "`9lives`");
        assert_eq!(quote_segment("a`b"), "`a\\`b`");
        assert_eq!(
            encode_field_path(&FieldPath::nested("taskBreakdown", "Deep Work")),
            "taskBreakdown.`Deep Work`"
        );
    }

    #[test]
    fn leaf_paths_descend_into_non_empty_maps() {
        let fields = match json!({ "a": 1, "m": { "x": 1, "y": {} }, "z": {} }) {
            Value::Object(map) => map,
            _ => Fields::new(),
        };
        let paths = leaf_field_paths(&fields)
            .iter()
            .map(encode_field_path)
            .collect::<Vec<_>>();
        assert_eq!(paths, vec!["a", "m.x", "m.y", "z"]);
    }

    fn plain_json() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::from),
            "[a-zA-Z0-9 ]{0,12}".prop_map(Value::String),
        ];
        leaf.prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::btree_map("[a-z]{1,6}", inner, 0..4)
                    .prop_map(|map| Value::Object(map.into_iter().collect())),
            ]
        })
    }

    // Feature: discipline-timer, Property: typed encoding preserves plain values
    proptest! {
        #[test]
        fn decode_inverts_encode(value in plain_json()) {
            prop_assert_eq!(decode_value(&encode_value(&value)).expect("decode"), value);
        }
    }
}

//! Response envelope normalization
//!
//! OData v2 wraps collections as `{"d": {"results": [...]}}`, v4 as
//! `{"value": [...]}`. Both are flattened to a plain record list.

use serde_json::Value;

/// Flatten a decoded response body into a list of records.
///
/// Precedence: a list as-is; then `value`; then `d.results`; then any
/// other object as a single record; anything else yields an empty list.
/// A non-list `value` or `results` is wrapped, a null one is empty.
pub fn normalize_records(body: Value) -> Vec<Value> {
    match body {
        Value::Array(items) => items,
        Value::Object(mut map) => {
            if let Some(value) = map.remove("value") {
                return into_list(value);
            }
            let has_results = map
                .get("d")
                .and_then(Value::as_object)
                .is_some_and(|d| d.contains_key("results"));
            if has_results {
                let results = map
                    .remove("d")
                    .and_then(|mut d| d.get_mut("results").map(Value::take))
                    .unwrap_or(Value::Null);
                return into_list(results);
            }
            vec![Value::Object(map)]
        }
        _ => Vec::new(),
    }
}

fn into_list(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        other => vec![other],
    }
}

/// Copy the named fields out of a record, using "" for absent or null ones
pub fn project(record: &Value, fields: &[&str]) -> Value {
    let mut out = serde_json::Map::new();
    for field in fields {
        let value = match record.get(*field) {
            None | Some(Value::Null) => Value::String(String::new()),
            Some(v) => v.clone(),
        };
        out.insert((*field).to_string(), value);
    }
    Value::Object(out)
}

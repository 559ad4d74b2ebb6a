//! Coercion of loosely shaped scraped values into canonical records.
//!
//! Upstream pages hand us server lists as real arrays, as JSON-encoded strings,
//! as arrays of JSON-encoded strings, or not at all. Everything here degrades
//! to an empty value instead of failing: malformed upstream data counts as
//! missing data.

use crate::models::{FieldKind, Record, RecordSchema};
use serde_json::Value;
use tracing::debug;

/// Coerces a raw value of unknown shape into a list of objects.
///
/// - `null` or an unparseable string yields an empty list.
/// - a string is parsed as JSON first.
/// - a single object becomes a one-element list.
/// - inside a list, string elements are parsed, nested lists are flattened one
///   level, and anything that still isn't an object is dropped.
pub fn normalize_objects(raw: &Value) -> Vec<Record> {
    match raw {
        Value::Null => Vec::new(),
        Value::String(text) => match serde_json::from_str::<Value>(text) {
            // a string that decodes to another string is not a record
            Ok(Value::String(_)) | Err(_) => {
                debug!("dropping unparseable value: {}", preview(text));
                Vec::new()
            }
            Ok(parsed) => normalize_objects(&parsed),
        },
        Value::Object(map) => vec![map.clone()],
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::Object(map) => out.push(map.clone()),
                    Value::String(text) => match serde_json::from_str::<Value>(text) {
                        Ok(Value::Object(map)) => out.push(map),
                        Ok(Value::Array(inner)) => out.extend(objects_only(inner)),
                        _ => debug!("dropping list element: {}", preview(text)),
                    },
                    Value::Array(inner) => out.extend(objects_only(inner.iter().cloned())),
                    _ => {}
                }
            }
            out
        }
        Value::Bool(_) | Value::Number(_) => Vec::new(),
    }
}

fn objects_only(items: impl IntoIterator<Item = Value>) -> impl Iterator<Item = Record> {
    items.into_iter().filter_map(|v| match v {
        Value::Object(map) => Some(map),
        _ => None,
    })
}

fn preview(text: &str) -> String {
    text.chars().take(60).collect()
}

/// Normalizes a whole raw batch and gives every record its canonical shape.
pub fn normalize_collection(raw: &Value, schema: &RecordSchema) -> Vec<Record> {
    normalize_objects(raw)
        .into_iter()
        .map(|record| canonicalize(record, schema))
        .collect()
}

/// Fills every schema field with a value of the right shape and repairs
/// nested collections. Fields the schema doesn't know are kept as-is.
pub fn canonicalize(mut record: Record, schema: &RecordSchema) -> Record {
    for (name, kind) in &schema.fields {
        match record.get_mut(name) {
            Some(value) => *value = coerce(std::mem::take(value), *kind),
            None => {
                record.insert(name.clone(), kind.default_value());
            }
        }
    }

    for field in &schema.union_fields {
        if let Some(value) = record.get_mut(field) {
            *value = objects_value(value);
        }
    }

    for nested in &schema.nested {
        let Some(value) = record.get_mut(&nested.field) else {
            continue;
        };
        let mut items = normalize_objects(value);
        for item in items.iter_mut() {
            for field in &nested.union_fields {
                if let Some(servers) = item.get_mut(field) {
                    *servers = objects_value(servers);
                }
            }
        }
        *value = Value::Array(items.into_iter().map(Value::Object).collect());
    }

    record
}

fn objects_value(value: &Value) -> Value {
    Value::Array(normalize_objects(value).into_iter().map(Value::Object).collect())
}

fn coerce(value: Value, kind: FieldKind) -> Value {
    match kind {
        FieldKind::Nullable => value,
        FieldKind::Objects => objects_value(&value),
        FieldKind::List => match value {
            Value::Array(_) => value,
            _ => kind.default_value(),
        },
        FieldKind::Text => match value {
            Value::String(s) => Value::String(fix_mojibake(&s)),
            Value::Number(n) => Value::String(n.to_string()),
            _ => kind.default_value(),
        },
        FieldKind::Number => match value {
            Value::Number(_) => value,
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .unwrap_or_else(|| kind.default_value()),
            _ => kind.default_value(),
        },
    }
}

/// Pairs produced when UTF-8 text is decoded as Latin-1/Windows-1252 and
/// re-encoded.
const MOJIBAKE: &[(&str, &str)] = &[
    ("Ã¡", "á"),
    ("Ã©", "é"),
    ("Ã\u{ad}", "í"),
    ("Ã³", "ó"),
    ("Ãº", "ú"),
    ("Ã±", "ñ"),
    ("Ã\u{a0}", "à"),
    ("Ã¨", "è"),
    ("Ã¬", "ì"),
    ("Ã²", "ò"),
    ("Ã¹", "ù"),
    ("Ã§", "ç"),
    ("Ã£", "ã"),
    ("Ã¢", "â"),
    ("Ãª", "ê"),
    ("Ã´", "ô"),
    ("Ã¯", "ï"),
    ("Ã¼", "ü"),
    ("Ã¶", "ö"),
    ("Ã¤", "ä"),
    ("Ã\u{81}", "Á"),
    ("Ã‰", "É"),
    ("Ã\u{8d}", "Í"),
    ("Ã“", "Ó"),
    ("Ãš", "Ú"),
    ("Ã‘", "Ñ"),
    ("Ã‡", "Ç"),
];

/// Repairs doubly-encoded accents, e.g. `AtlÃ©tico` becomes `Atlético`.
pub fn fix_mojibake(text: &str) -> String {
    if !text.contains('Ã') {
        return text.to_string();
    }
    MOJIBAKE
        .iter()
        .fold(text.to_string(), |acc, (wrong, right)| acc.replace(wrong, right))
}

//! Data transformation between provider families
//!
//! - to relational: nested objects are flattened into `parent.child` columns,
//!   arrays are stored as JSON text
//! - to document: dotted columns are folded back into nested objects and the
//!   row `id` becomes `_id`
//! - to key-value: every record becomes `{ "key": <id>, "value": <record> }`
//!
//! Families outside relational, document and key-value have no
//! transformation and fail the step.

use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::traits::{DataExport, ProviderFamily};

/// Transformed export plus per-record warnings
#[derive(Debug, Clone, PartialEq)]
pub struct Transformed {
    pub data: DataExport,
    pub warnings: Vec<String>,
}

/// Reshape `export` for a provider of family `target`
pub fn transform(export: &DataExport, target: &ProviderFamily) -> Result<Transformed> {
    if &export.family == target {
        return Ok(Transformed {
            data: export.clone(),
            warnings: Vec::new(),
        });
    }

    let convert: fn(&ProviderFamily, usize, Value, &mut Vec<String>) -> Value = match target {
        ProviderFamily::Relational => to_row,
        ProviderFamily::Document => to_document,
        ProviderFamily::KeyValue => to_entry,
        other => {
            return Err(Error::step(
                "transform-data",
                format!("no transformation from {} to {}", export.family, other),
            ));
        }
    };
    if !matches!(
        export.family,
        ProviderFamily::Relational | ProviderFamily::Document | ProviderFamily::KeyValue
    ) {
        return Err(Error::step(
            "transform-data",
            format!("no transformation from {} to {}", export.family, target),
        ));
    }

    let mut data = DataExport::new(target.clone());
    let mut warnings = Vec::new();
    for (collection, records) in &export.collections {
        let converted = records
            .iter()
            .cloned()
            .enumerate()
            .map(|(index, record)| convert(&export.family, index, record, &mut warnings))
            .collect();
        data.collections.insert(collection.clone(), converted);
    }

    Ok(Transformed { data, warnings })
}

fn to_row(source: &ProviderFamily, index: usize, record: Value, warnings: &mut Vec<String>) -> Value {
    let record = match (source, record) {
        (ProviderFamily::KeyValue, Value::Object(mut entry)) if entry.contains_key("key") => {
            let key = entry.remove("key").unwrap_or(Value::Null);
            let mut row = match entry.remove("value") {
                Some(Value::Object(value)) => value,
                Some(value) => Map::from_iter([("value".to_string(), value)]),
                None => Map::new(),
            };
            row.entry("id").or_insert(key);
            Value::Object(row)
        }
        (_, record) => record,
    };

    match record {
        Value::Object(object) => {
            let mut row = Map::new();
            if let Some(id) = object.get("_id") {
                row.insert("id".to_string(), id.clone());
            }
            flatten("", object, &mut row);
            row.remove("_id");
            Value::Object(row)
        }
        other => {
            warnings.push(format!("record {} is not an object; stored under 'value'", index));
            Value::Object(Map::from_iter([("value".to_string(), other)]))
        }
    }
}

fn flatten(prefix: &str, object: Map<String, Value>, row: &mut Map<String, Value>) {
    for (key, value) in object {
        let column = if prefix.is_empty() {
            key
        } else {
            format!("{}.{}", prefix, key)
        };
        match value {
            Value::Object(nested) => flatten(&column, nested, row),
            Value::Array(_) => {
                row.insert(column, Value::String(value.to_string()));
            }
            scalar => {
                row.entry(column).or_insert(scalar);
            }
        }
    }
}

fn to_document(
    source: &ProviderFamily,
    index: usize,
    record: Value,
    warnings: &mut Vec<String>,
) -> Value {
    let mut object = match record {
        Value::Object(object) => object,
        other => {
            warnings.push(format!("record {} is not an object; wrapped as a document", index));
            return Value::Object(Map::from_iter([
                ("_id".to_string(), Value::from(index)),
                ("value".to_string(), other),
            ]));
        }
    };

    if *source == ProviderFamily::KeyValue && object.contains_key("key") {
        let key = object.remove("key").unwrap_or(Value::Null);
        let mut document = match object.remove("value") {
            Some(Value::Object(value)) => value,
            Some(value) => Map::from_iter([("value".to_string(), value)]),
            None => Map::new(),
        };
        document.insert("_id".to_string(), key);
        return Value::Object(document);
    }

    let mut document = Map::new();
    for (column, value) in object {
        let value = match value {
            // Arrays flattened to JSON text on the way into a relational store
            Value::String(text) if text.starts_with('[') => {
                serde_json::from_str(&text).unwrap_or(Value::String(text))
            }
            other => other,
        };
        insert_path(&mut document, &column, value);
    }
    if let Some(id) = document.remove("id") {
        document.entry("_id").or_insert(id);
    }
    Value::Object(document)
}

fn insert_path(document: &mut Map<String, Value>, path: &str, value: Value) {
    match path.split_once('.') {
        None => {
            document.insert(path.to_string(), value);
        }
        Some((head, rest)) => {
            let child = document
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !child.is_object() {
                *child = Value::Object(Map::new());
            }
            if let Value::Object(child) = child {
                insert_path(child, rest, value);
            }
        }
    }
}

fn to_entry(_source: &ProviderFamily, index: usize, record: Value, _warnings: &mut Vec<String>) -> Value {
    let key = ["id", "_id", "key"]
        .iter()
        .find_map(|field| record.get(*field))
        .map(|key| match key {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        })
        .unwrap_or_else(|| index.to_string());

    serde_json::json!({ "key": key, "value": record })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn export(family: ProviderFamily, records: Vec<Value>) -> DataExport {
        let mut export = DataExport::new(family);
        export.collections.insert("guests".to_string(), records);
        export
    }

    #[test]
    fn same_family_is_passed_through() {
        let source = export(ProviderFamily::Document, vec![json!({"_id": 1})]);
        let result = transform(&source, &ProviderFamily::Document).unwrap();
        assert_eq!(result.data, source);
    }

    #[test]
    fn rows_become_nested_documents() {
        let source = export(
            ProviderFamily::Relational,
            vec![json!({"id": 7, "name": "Ada", "address.city": "London", "tags": "[\"vip\"]"})],
        );

        let result = transform(&source, &ProviderFamily::Document).unwrap();
        let document = &result.data.collections["guests"][0];

        assert_eq!(result.data.family, ProviderFamily::Document);
        assert_eq!(document["_id"], json!(7));
        assert_eq!(document["address"]["city"], json!("London"));
        assert_eq!(document["tags"], json!(["vip"]));
        assert!(document.get("id").is_none());
    }

    #[test]
    fn documents_become_flat_rows() {
        let source = export(
            ProviderFamily::Document,
            vec![json!({"_id": "g1", "name": "Ada", "address": {"city": "London"}, "tags": ["vip"]}), json!(42)],
        );

        let result = transform(&source, &ProviderFamily::Relational).unwrap();
        let rows = &result.data.collections["guests"];

        assert_eq!(rows[0]["id"], json!("g1"));
        assert_eq!(rows[0]["address.city"], json!("London"));
        assert_eq!(rows[0]["tags"], json!("[\"vip\"]"));
        assert!(rows[0].get("_id").is_none());
        assert_eq!(rows[1], json!({"value": 42}));
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn records_become_key_value_entries() {
        let source = export(ProviderFamily::Relational, vec![json!({"id": 3, "name": "Ada"})]);
        let result = transform(&source, &ProviderFamily::KeyValue).unwrap();
        assert_eq!(
            result.data.collections["guests"][0],
            json!({"key": "3", "value": {"id": 3, "name": "Ada"}})
        );
    }

    #[test]
    fn unsupported_families_fail_the_step() {
        let source = export(ProviderFamily::Relational, vec![]);
        let err = transform(&source, &ProviderFamily::Messaging).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::MigrationStepFailure);
    }
}

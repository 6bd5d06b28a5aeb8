//! Field Value Serialization
//!
//! Round-trips field values between their typed in-memory form and storage:
//! primitives map to native columns, URIs to canonical strings, and lists,
//! maps, and nested records to JSON text. Deserialization is driven by the
//! declared field type, so strings annotated as URIs come back as
//! [`PageURI`] values and JSON blobs annotated as records are validated back
//! into typed field maps, recursively.
//!
//! The contract is the round-trip law: for every value `v` produced by a
//! correct page builder, `from_stored(to_stored(v), spec) == v`.

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Utc};
use rust_decimal::Decimal;

use crate::cache::error::CacheError;
use crate::models::{FieldSpec, FieldType, FieldValue, PageURI};

/// Parse a timestamp from storage - handles both RFC 3339 and the bare
/// SQLite `CURRENT_TIMESTAMP` format ("YYYY-MM-DD HH:MM:SS")
pub(crate) fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Ok(naive.and_utc());
    }

    Err(format!(
        "Unable to parse timestamp '{}' as RFC 3339 or SQLite format",
        s
    ))
}

/// Convert a field value to its storage representation
///
/// Primitives pass through as native libsql values; booleans become 0/1;
/// decimals and timestamps become canonical strings; URIs become their
/// canonical wire form; lists, maps, and records become JSON text.
pub fn to_stored(value: &FieldValue) -> libsql::Value {
    match value {
        FieldValue::Null => libsql::Value::Null,
        FieldValue::String(s) => libsql::Value::Text(s.clone()),
        FieldValue::Integer(v) => libsql::Value::Integer(*v),
        FieldValue::Float(v) => libsql::Value::Real(*v),
        FieldValue::Boolean(v) => libsql::Value::Integer(i64::from(*v)),
        FieldValue::Decimal(d) => libsql::Value::Text(d.to_string()),
        FieldValue::Timestamp(ts) => libsql::Value::Text(ts.to_rfc3339()),
        FieldValue::Uri(uri) => libsql::Value::Text(uri.to_string()),
        FieldValue::List(_) | FieldValue::Map(_) | FieldValue::Record(_) => {
            libsql::Value::Text(field_to_json(value).to_string())
        }
    }
}

/// Convert a field value to JSON, for nesting inside JSON columns
///
/// Nested URIs serialize as canonical strings, decimals as strings (to keep
/// arbitrary precision), timestamps as RFC 3339 strings.
pub(crate) fn field_to_json(value: &FieldValue) -> serde_json::Value {
    match value {
        FieldValue::Null => serde_json::Value::Null,
        FieldValue::String(s) => serde_json::Value::String(s.clone()),
        FieldValue::Integer(v) => serde_json::Value::from(*v),
        FieldValue::Float(v) => serde_json::Value::from(*v),
        FieldValue::Boolean(v) => serde_json::Value::Bool(*v),
        FieldValue::Decimal(d) => serde_json::Value::String(d.to_string()),
        FieldValue::Timestamp(ts) => serde_json::Value::String(ts.to_rfc3339()),
        FieldValue::Uri(uri) => serde_json::Value::String(uri.to_string()),
        FieldValue::List(items) => {
            serde_json::Value::Array(items.iter().map(field_to_json).collect())
        }
        FieldValue::Map(map) => serde_json::Value::Object(map.clone()),
        FieldValue::Record(fields) => {
            let object = fields
                .iter()
                .map(|(name, value)| (name.clone(), field_to_json(value)))
                .collect();
            serde_json::Value::Object(object)
        }
    }
}

/// Reconstruct a field value from its storage representation
///
/// The declared field spec drives the conversion; mismatched storage raises
/// a deserialization error naming the field.
pub fn from_stored(stored: libsql::Value, spec: &FieldSpec) -> Result<FieldValue, CacheError> {
    let mismatch = |reason: String| CacheError::Deserialization {
        field: spec.name.clone(),
        reason,
    };

    if matches!(stored, libsql::Value::Null) {
        return Ok(FieldValue::Null);
    }

    match &spec.field_type {
        FieldType::String => match stored {
            libsql::Value::Text(s) => Ok(FieldValue::String(s)),
            other => Err(mismatch(format!("expected text, got {:?}", other))),
        },
        FieldType::Integer => match stored {
            libsql::Value::Integer(v) => Ok(FieldValue::Integer(v)),
            other => Err(mismatch(format!("expected integer, got {:?}", other))),
        },
        FieldType::Float => match stored {
            libsql::Value::Real(v) => Ok(FieldValue::Float(v)),
            // SQLite may hand back whole floats as integers
            libsql::Value::Integer(v) => Ok(FieldValue::Float(v as f64)),
            other => Err(mismatch(format!("expected real, got {:?}", other))),
        },
        FieldType::Boolean => match stored {
            libsql::Value::Integer(v) => Ok(FieldValue::Boolean(v != 0)),
            other => Err(mismatch(format!("expected boolean, got {:?}", other))),
        },
        FieldType::Decimal => match stored {
            libsql::Value::Text(s) => Decimal::from_str(&s)
                .map(FieldValue::Decimal)
                .map_err(|e| mismatch(format!("invalid decimal '{}': {}", s, e))),
            other => Err(mismatch(format!("expected decimal text, got {:?}", other))),
        },
        FieldType::Timestamp => match stored {
            libsql::Value::Text(s) => parse_timestamp(&s)
                .map(FieldValue::Timestamp)
                .map_err(mismatch),
            other => Err(mismatch(format!("expected timestamp text, got {:?}", other))),
        },
        FieldType::Uri => match stored {
            libsql::Value::Text(s) => PageURI::parse(&s)
                .map(FieldValue::Uri)
                .map_err(|e| mismatch(e.to_string())),
            other => Err(mismatch(format!("expected uri text, got {:?}", other))),
        },
        FieldType::List(_) | FieldType::Map | FieldType::Record(_) => match stored {
            libsql::Value::Text(s) => {
                let json: serde_json::Value = serde_json::from_str(&s)
                    .map_err(|e| mismatch(format!("invalid JSON: {}", e)))?;
                from_json(&json, &spec.field_type, &spec.name)
            }
            other => Err(mismatch(format!("expected JSON text, got {:?}", other))),
        },
    }
}

/// Reconstruct a field value from JSON, driven by the declared type
///
/// Used for elements of JSON columns: list items, map values, and record
/// fields, recursing through nested records so their URI fields come back
/// as typed values.
pub(crate) fn from_json(
    json: &serde_json::Value,
    field_type: &FieldType,
    field_name: &str,
) -> Result<FieldValue, CacheError> {
    let mismatch = |reason: String| CacheError::Deserialization {
        field: field_name.to_string(),
        reason,
    };

    if json.is_null() {
        return Ok(FieldValue::Null);
    }

    match field_type {
        FieldType::String => json
            .as_str()
            .map(|s| FieldValue::String(s.to_string()))
            .ok_or_else(|| mismatch(format!("expected string, got {}", json))),
        FieldType::Integer => json
            .as_i64()
            .map(FieldValue::Integer)
            .ok_or_else(|| mismatch(format!("expected integer, got {}", json))),
        FieldType::Float => json
            .as_f64()
            .map(FieldValue::Float)
            .ok_or_else(|| mismatch(format!("expected number, got {}", json))),
        FieldType::Boolean => json
            .as_bool()
            .map(FieldValue::Boolean)
            .ok_or_else(|| mismatch(format!("expected boolean, got {}", json))),
        FieldType::Decimal => {
            let s = json
                .as_str()
                .ok_or_else(|| mismatch(format!("expected decimal string, got {}", json)))?;
            Decimal::from_str(s)
                .map(FieldValue::Decimal)
                .map_err(|e| mismatch(format!("invalid decimal '{}': {}", s, e)))
        }
        FieldType::Timestamp => {
            let s = json
                .as_str()
                .ok_or_else(|| mismatch(format!("expected timestamp string, got {}", json)))?;
            parse_timestamp(s).map(FieldValue::Timestamp).map_err(mismatch)
        }
        FieldType::Uri => {
            let s = json
                .as_str()
                .ok_or_else(|| mismatch(format!("expected uri string, got {}", json)))?;
            PageURI::parse(s)
                .map(FieldValue::Uri)
                .map_err(|e| mismatch(e.to_string()))
        }
        FieldType::List(item_type) => {
            let items = json
                .as_array()
                .ok_or_else(|| mismatch(format!("expected array, got {}", json)))?;
            let converted = items
                .iter()
                .map(|item| from_json(item, item_type, field_name))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(FieldValue::List(converted))
        }
        FieldType::Map => {
            let object = json
                .as_object()
                .ok_or_else(|| mismatch(format!("expected object, got {}", json)))?;
            Ok(FieldValue::Map(object.clone()))
        }
        FieldType::Record(schema) => {
            let object = json
                .as_object()
                .ok_or_else(|| mismatch(format!("expected object, got {}", json)))?;
            let mut fields = BTreeMap::new();
            for (name, value) in object {
                let spec = schema.field(name).ok_or_else(|| {
                    mismatch(format!("unknown field '{}' in record '{}'", name, schema.name))
                })?;
                fields.insert(name.clone(), from_json(value, &spec.field_type, name)?);
            }
            Ok(FieldValue::Record(fields))
        }
    }
}

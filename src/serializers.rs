//! Conversion of stored field values into JSON-safe primitives.

use crate::error::Result;
use crate::orm::{FieldKind, ModelMeta, Record};
use chrono::{DateTime, Timelike, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

/// Serialized form of one record.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SerializedObject {
    pub model: String,
    pub pk: i64,
    pub fields: Map<String, Value>,
}

/// Serializes raw database fields, including the primary key when asked for.
#[derive(Clone, Copy, Debug, Default)]
pub struct AllFieldsSerializer;

impl AllFieldsSerializer {
    /// Names that are not database fields of `meta` are skipped.
    pub fn serialize<S: AsRef<str>>(
        &self,
        meta: &ModelMeta,
        records: &[Record],
        fields: &[S],
    ) -> Vec<SerializedObject> {
        records
            .iter()
            .map(|record| {
                let mut out = Map::new();
                for name in fields {
                    let name = name.as_ref();
                    if name == "id" {
                        out.insert("id".to_string(), Value::from(record.id));
                    } else if let Some(field) = meta.get_field(name) {
                        let raw = record.values.get(name).cloned().unwrap_or(Value::Null);
                        out.insert(name.to_string(), encode_value(field.kind, raw));
                    }
                }
                SerializedObject {
                    model: format!("{}.{}", meta.app_label(), meta.module_name()),
                    pk: record.id,
                    fields: out,
                }
            })
            .collect()
    }
}

/// Make a stored value JSON-safe for its field kind.
///
/// Datetimes are rendered in UTC with millisecond precision and a `Z`
/// suffix; decimals stay strings so no precision is lost.
pub fn encode_value(kind: FieldKind, value: Value) -> Value {
    match (kind, value) {
        (FieldKind::DateTime, Value::String(s)) => Value::String(encode_datetime(&s)),
        (FieldKind::Decimal, Value::Number(n)) => Value::String(n.to_string()),
        (_, value) => value,
    }
}

fn encode_datetime(raw: &str) -> String {
    match DateTime::parse_from_rfc3339(raw) {
        Ok(dt) => format_datetime(&dt.with_timezone(&Utc)),
        Err(_) => raw.to_string(),
    }
}

pub fn format_datetime(dt: &DateTime<Utc>) -> String {
    if dt.nanosecond() / 1_000 == 0 {
        format!("{}Z", dt.format("%Y-%m-%dT%H:%M:%S"))
    } else {
        format!("{}Z", dt.format("%Y-%m-%dT%H:%M:%S%.3f"))
    }
}

/// Sorted keys, two-space indentation.
pub fn json_dumps<T: Serialize + ?Sized>(data: &T) -> Result<String> {
    // Going through `Value` sorts object keys.
    let value = serde_json::to_value(data)?;
    Ok(serde_json::to_string_pretty(&value)?)
}

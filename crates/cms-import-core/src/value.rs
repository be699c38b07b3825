//! Field value resolver.
//!
//! Converts a raw JSON value plus a target [`Field`] definition into typed
//! [`FieldValue`]s. Every field type has an explicit conversion; raw values
//! that do not convert are rejected with a [`ValueError`] instead of being
//! coerced.
//!
//! | Field type | Accepted raw values |
//! |------------|---------------------|
//! | text, textArea, markdown | string |
//! | integer | integral number, integral numeric string |
//! | number | number, numeric string |
//! | bool | bool, `"true"` / `"false"` |
//! | date | RFC 3339 string, `YYYY-MM-DD` string |
//! | url | absolute URL string |
//! | select | string among the field's options |
//! | geometry | GeoJSON geometry object, or a string holding one |
//! | reference | item id string |
//! | group | item group id string |
//!
//! `null` resolves to no values. Arrays are only accepted by `multiple`
//! fields; `null` elements inside them are dropped.

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::models::{Field, FieldType, ItemGroupId, ItemId};

/// A strongly-typed value stored in an item field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum FieldValue {
    Text(String),
    Integer(i64),
    Number(f64),
    Bool(bool),
    Date(DateTime<Utc>),
    Url(String),
    Select(String),
    /// Serialized GeoJSON geometry object.
    Geometry(String),
    Reference(ItemId),
    Group(ItemGroupId),
}

impl FieldValue {
    /// Stable string form used for equality checks (uniqueness) and
    /// value indexes.
    pub fn canonical(&self) -> String {
        match self {
            FieldValue::Text(s)
            | FieldValue::Url(s)
            | FieldValue::Select(s)
            | FieldValue::Geometry(s) => s.clone(),
            FieldValue::Integer(i) => i.to_string(),
            FieldValue::Number(n) => n.to_string(),
            FieldValue::Bool(b) => b.to_string(),
            FieldValue::Date(d) => d.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            FieldValue::Reference(id) => id.to_string(),
            FieldValue::Group(id) => id.to_string(),
        }
    }

    pub fn as_reference(&self) -> Option<ItemId> {
        match self {
            FieldValue::Reference(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_group(&self) -> Option<ItemGroupId> {
        match self {
            FieldValue::Group(id) => Some(*id),
            _ => None,
        }
    }
}

/// Why a raw value could not be converted for a field.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValueError {
    #[error("expected {expected}, got {got}")]
    TypeMismatch {
        expected: &'static str,
        got: &'static str,
    },

    #[error("field does not accept multiple values")]
    NotMultiple,

    #[error("invalid {kind}: {input}")]
    Invalid { kind: &'static str, input: String },

    #[error("{0:?} is not one of the field's options")]
    NotAnOption(String),
}

/// Resolve a raw value against a field definition.
pub fn resolve(field: &Field, raw: &Value) -> Result<Vec<FieldValue>, ValueError> {
    match raw {
        Value::Null => Ok(Vec::new()),
        Value::Array(elements) => {
            if !field.multiple {
                return Err(ValueError::NotMultiple);
            }
            elements
                .iter()
                .filter(|v| !v.is_null())
                .map(|v| resolve_scalar(&field.field_type, v))
                .collect()
        }
        other => resolve_scalar(&field.field_type, other).map(|v| vec![v]),
    }
}

fn resolve_scalar(field_type: &FieldType, raw: &Value) -> Result<FieldValue, ValueError> {
    match field_type {
        FieldType::Text | FieldType::TextArea | FieldType::Markdown => {
            Ok(FieldValue::Text(expect_str(raw, "string")?.to_string()))
        }
        FieldType::Integer => to_integer(raw).map(FieldValue::Integer),
        FieldType::Number => to_number(raw).map(FieldValue::Number),
        FieldType::Bool => to_bool(raw).map(FieldValue::Bool),
        FieldType::Date => {
            let s = expect_str(raw, "date string")?;
            parse_date(s)
                .map(FieldValue::Date)
                .ok_or_else(|| invalid("date", s))
        }
        FieldType::Url => {
            let s = expect_str(raw, "URL string")?;
            url::Url::parse(s)
                .map(|_| FieldValue::Url(s.to_string()))
                .map_err(|_| invalid("URL", s))
        }
        FieldType::Select { values } => {
            let s = expect_str(raw, "string")?;
            if values.iter().any(|v| v == s) {
                Ok(FieldValue::Select(s.to_string()))
            } else {
                Err(ValueError::NotAnOption(s.to_string()))
            }
        }
        FieldType::Geometry => to_geometry(raw).map(FieldValue::Geometry),
        FieldType::Reference { .. } => {
            let s = expect_str(raw, "item id")?;
            ItemId::parse(s)
                .map(FieldValue::Reference)
                .ok_or_else(|| invalid("item id", s))
        }
        FieldType::Group { .. } => {
            let s = expect_str(raw, "group id")?;
            ItemGroupId::parse(s)
                .map(FieldValue::Group)
                .ok_or_else(|| invalid("group id", s))
        }
    }
}

/// Parse an RFC 3339 timestamp or a bare `YYYY-MM-DD` date (midnight UTC).
pub fn parse_date(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

pub(crate) fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn expect_str<'v>(raw: &'v Value, expected: &'static str) -> Result<&'v str, ValueError> {
    raw.as_str().ok_or(ValueError::TypeMismatch {
        expected,
        got: json_kind(raw),
    })
}

fn invalid(kind: &'static str, input: impl ToString) -> ValueError {
    ValueError::Invalid {
        kind,
        input: input.to_string(),
    }
}

fn to_integer(raw: &Value) -> Result<i64, ValueError> {
    match raw {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                return Ok(i);
            }
            match n.as_f64() {
                Some(f) if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 => {
                    Ok(f as i64)
                }
                _ => Err(invalid("integer", n)),
            }
        }
        Value::String(s) => s.trim().parse::<i64>().map_err(|_| invalid("integer", s)),
        other => Err(ValueError::TypeMismatch {
            expected: "integer",
            got: json_kind(other),
        }),
    }
}

fn to_number(raw: &Value) -> Result<f64, ValueError> {
    match raw {
        Value::Number(n) => n.as_f64().ok_or_else(|| invalid("number", n)),
        Value::String(s) => match s.trim().parse::<f64>() {
            Ok(f) if f.is_finite() => Ok(f),
            _ => Err(invalid("number", s)),
        },
        other => Err(ValueError::TypeMismatch {
            expected: "number",
            got: json_kind(other),
        }),
    }
}

fn to_bool(raw: &Value) -> Result<bool, ValueError> {
    match raw {
        Value::Bool(b) => Ok(*b),
        Value::String(s) if s.eq_ignore_ascii_case("true") => Ok(true),
        Value::String(s) if s.eq_ignore_ascii_case("false") => Ok(false),
        Value::String(s) => Err(invalid("bool", s)),
        other => Err(ValueError::TypeMismatch {
            expected: "bool",
            got: json_kind(other),
        }),
    }
}

fn to_geometry(raw: &Value) -> Result<String, ValueError> {
    let (obj, text) = match raw {
        Value::Object(_) => (raw.clone(), None),
        Value::String(s) => {
            let parsed: Value = serde_json::from_str(s).map_err(|_| invalid("geometry", s))?;
            (parsed, Some(s.as_str()))
        }
        other => {
            return Err(ValueError::TypeMismatch {
                expected: "geometry object",
                got: json_kind(other),
            })
        }
    };
    let has_type = obj
        .as_object()
        .and_then(|o| o.get("type"))
        .is_some_and(Value::is_string);
    if !has_type {
        return Err(invalid("geometry", text.map(str::to_string).unwrap_or_else(|| obj.to_string())));
    }
    Ok(match text {
        Some(s) => s.to_string(),
        None => obj.to_string(),
    })
}

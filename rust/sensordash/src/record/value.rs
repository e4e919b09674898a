use super::{
    field::{FieldDef, FieldKind},
    RecordError,
};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::Value as JsonValue;
use std::cmp::Ordering;

const ISO_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// A single typed cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Real(f64),
    Text(String),
    Timestamp(NaiveDateTime),
    /// Stored code of an enum member.
    Enum(String),
    Blob(Vec<u8>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Real(value) => Some(*value),
            Value::Int(value) => Some(*value as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(value) | Value::Enum(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<NaiveDateTime> {
        match self {
            Value::Timestamp(value) => Some(*value),
            _ => None,
        }
    }

    /// JSON form used by the HTTP views and the filter transport.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Value::Null => JsonValue::Null,
            Value::Bool(value) => JsonValue::Bool(*value),
            Value::Int(value) => JsonValue::from(*value),
            Value::Real(value) => serde_json::Number::from_f64(*value)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            Value::Text(value) | Value::Enum(value) => JsonValue::String(value.clone()),
            Value::Timestamp(value) => JsonValue::String(format_timestamp(value)),
            Value::Blob(bytes) => JsonValue::String(STANDARD.encode(bytes)),
        }
    }

    /// Coerces a JSON value into the shape `field` declares.
    pub fn from_json(field: &FieldDef, raw: &JsonValue) -> Result<Value, RecordError> {
        if raw.is_null() {
            return Ok(Value::Null);
        }

        let invalid = |reason: &str| RecordError::InvalidValue {
            field: field.name.to_string(),
            reason: reason.to_string(),
        };

        match field.kind {
            FieldKind::Identity | FieldKind::Integer | FieldKind::ForeignKey { .. } => {
                match raw {
                    JsonValue::Number(number) => {
                        if let Some(value) = number.as_i64() {
                            Ok(Value::Int(value))
                        } else {
                            match number.as_f64() {
                                Some(value) if value.fract() == 0.0 => Ok(Value::Int(value as i64)),
                                _ => Err(invalid("expected a whole number")),
                            }
                        }
                    }
                    JsonValue::String(text) => parse_int(text).ok_or_else(|| invalid("expected a whole number")),
                    _ => Err(invalid("expected a whole number")),
                }
            }
            FieldKind::Real => match raw {
                JsonValue::Number(number) => number
                    .as_f64()
                    .map(Value::Real)
                    .ok_or_else(|| invalid("expected a number")),
                JsonValue::String(text) => text
                    .trim()
                    .parse::<f64>()
                    .map(Value::Real)
                    .map_err(|_| invalid("expected a number")),
                _ => Err(invalid("expected a number")),
            },
            FieldKind::Boolean => match raw {
                JsonValue::Bool(value) => Ok(Value::Bool(*value)),
                JsonValue::String(text) => parse_bool(text).ok_or_else(|| invalid("expected a boolean")),
                JsonValue::Number(number) => match number.as_i64() {
                    Some(0) => Ok(Value::Bool(false)),
                    Some(1) => Ok(Value::Bool(true)),
                    _ => Err(invalid("expected a boolean")),
                },
                _ => Err(invalid("expected a boolean")),
            },
            FieldKind::Timestamp => match raw {
                JsonValue::String(text) => parse_timestamp(text)
                    .map(Value::Timestamp)
                    .ok_or_else(|| invalid("expected an ISO-8601 timestamp")),
                _ => Err(invalid("expected an ISO-8601 timestamp")),
            },
            FieldKind::Enum(def) => match raw {
                JsonValue::String(text) => def
                    .resolve(text)
                    .map(|member| Value::Enum(member.code.to_string()))
                    .ok_or_else(|| invalid(&format!("'{text}' is not a valid {}", def.name))),
                _ => Err(invalid("expected an enum code")),
            },
            FieldKind::ShortText { .. } | FieldKind::LongText { .. } => match raw {
                JsonValue::String(text) => Ok(Value::Text(text.clone())),
                JsonValue::Number(number) => Ok(Value::Text(number.to_string())),
                JsonValue::Bool(value) => Ok(Value::Text(value.to_string())),
                _ => Err(invalid("expected text")),
            },
            FieldKind::Blob { .. } => match raw {
                JsonValue::String(text) => decode_blob(text)
                    .map(Value::Blob)
                    .ok_or_else(|| invalid("expected base64 content")),
                _ => Err(invalid("expected base64 content")),
            },
        }
    }

    /// CSV cell text; nulls are empty cells.
    pub fn to_csv(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(value) => value.to_string(),
            Value::Int(value) => value.to_string(),
            Value::Real(value) => value.to_string(),
            Value::Text(value) | Value::Enum(value) => value.clone(),
            Value::Timestamp(value) => format_timestamp(value),
            Value::Blob(bytes) => STANDARD.encode(bytes),
        }
    }

    /// Parses a CSV cell. Empty cells are null for every kind.
    pub fn from_csv(field: &FieldDef, cell: &str) -> Result<Value, RecordError> {
        if cell.is_empty() {
            return Ok(Value::Null);
        }
        match field.kind {
            FieldKind::ShortText { .. } | FieldKind::LongText { .. } => {
                Ok(Value::Text(cell.to_string()))
            }
            _ => Value::from_json(field, &JsonValue::String(cell.to_string())),
        }
    }

    /// Ordering between two values of the same shape. Mixed shapes do not compare.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a.partial_cmp(b),
            (Value::Int(a), Value::Int(b)) => a.partial_cmp(b),
            (Value::Real(_) | Value::Int(_), Value::Real(_) | Value::Int(_)) => {
                self.as_f64()?.partial_cmp(&other.as_f64()?)
            }
            (Value::Text(a), Value::Text(b)) | (Value::Enum(a), Value::Enum(b)) => a.partial_cmp(b),
            (Value::Timestamp(a), Value::Timestamp(b)) => a.partial_cmp(b),
            (Value::Blob(a), Value::Blob(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

pub fn format_timestamp(value: &NaiveDateTime) -> String {
    value.format(ISO_FORMAT).to_string()
}

/// Accepts ISO-8601 with `T` or space separators, RFC 3339 offsets
/// (normalised to UTC) and bare dates (midnight).
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(value) = NaiveDateTime::parse_from_str(raw, ISO_FORMAT) {
        return Some(value);
    }
    if let Ok(value) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f") {
        return Some(value);
    }
    if let Ok(value) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M") {
        return Some(value);
    }
    if let Ok(value) = DateTime::parse_from_rfc3339(raw) {
        return Some(value.naive_utc());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
}

fn parse_int(raw: &str) -> Option<Value> {
    let raw = raw.trim();
    if let Ok(value) = raw.parse::<i64>() {
        return Some(Value::Int(value));
    }
    match raw.parse::<f64>() {
        Ok(value) if value.fract() == 0.0 => Some(Value::Int(value as i64)),
        _ => None,
    }
}

fn parse_bool(raw: &str) -> Option<Value> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "t" | "1" | "yes" => Some(Value::Bool(true)),
        "false" | "f" | "0" | "no" => Some(Value::Bool(false)),
        _ => None,
    }
}

/// Decodes standard base64, tolerating the line breaks Postgres' `encode()` emits.
pub fn decode_blob(raw: &str) -> Option<Vec<u8>> {
    let compact: String = raw.chars().filter(|ch| !ch.is_whitespace()).collect();
    STANDARD.decode(compact).ok()
}

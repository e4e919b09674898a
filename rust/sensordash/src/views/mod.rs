//! JSON view models for the generic table, edit and plot screens.

pub mod edit;
pub mod plot;
pub mod table;

use crate::record::{FieldDef, FieldKind, Value};
use serde_json::Value as JsonValue;

/// Cell as shown in listings: enum codes become their display text and
/// blobs are summarised by size.
pub fn display_cell(field: &FieldDef, value: &Value) -> JsonValue {
    match (&field.kind, value) {
        (FieldKind::Enum(def), Value::Enum(code)) => def
            .label_for(code)
            .map(JsonValue::from)
            .unwrap_or_else(|| JsonValue::from(code.as_str())),
        (_, Value::Blob(bytes)) => JsonValue::from(format!("{} bytes", bytes.len())),
        _ => value.to_json(),
    }
}

//! Record-type metadata and typed records.

pub mod catalog;
pub mod ddl;
pub mod field;
pub mod registry;
pub mod value;

pub use field::{EnumDef, EnumMember, FieldDef, FieldKind};
pub use registry::{RecordType, Registry};
pub use value::Value;

use serde_json::{Map, Value as JsonValue};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RecordError {
    #[error("unknown record type '{0}'")]
    UnknownType(String),

    #[error("field '{field}' not found on {table}")]
    FieldNotFound { table: String, field: String },

    #[error("field '{0}' has a type that cannot be filtered")]
    UnsupportedType(String),

    #[error("invalid value for field '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Field metadata lookup and per-field validation.
pub trait Describable {
    fn fields(&self) -> &'static [FieldDef];

    fn table_name(&self) -> &'static str;

    fn field(&self, name: &str) -> Result<&'static FieldDef, RecordError> {
        self.fields()
            .iter()
            .find(|field| field.name == name)
            .ok_or_else(|| RecordError::FieldNotFound {
                table: self.table_name().to_string(),
                field: name.to_string(),
            })
    }

    fn identity_field(&self) -> &'static FieldDef {
        self.fields()
            .iter()
            .find(|field| field.is_identity())
            .unwrap_or(&IDENTITY)
    }

    fn editable_fields(&self) -> Vec<&'static FieldDef> {
        self.fields()
            .iter()
            .filter(|field| !field.is_identity())
            .collect()
    }

    fn field_label(&self, name: &str) -> &'static str {
        self.field(name).map(|field| field.label).unwrap_or("")
    }

    /// Checks nullability, shape and declared length. Uniqueness is left to storage.
    fn validate_field(&self, name: &str, value: &Value) -> Result<(), String> {
        let field = self.field(name).map_err(|err| err.to_string())?;
        validate_value(field, value)
    }
}

static IDENTITY: FieldDef = FieldDef::identity();

pub fn validate_value(field: &FieldDef, value: &Value) -> Result<(), String> {
    if value.is_null() {
        if field.nullable || field.is_identity() {
            return Ok(());
        }
        return Err(format!("field {} is required", field.label));
    }

    let shape_ok = match (&field.kind, value) {
        (FieldKind::Identity | FieldKind::Integer | FieldKind::ForeignKey { .. }, Value::Int(_)) => true,
        (FieldKind::Real, Value::Real(_) | Value::Int(_)) => true,
        (FieldKind::Boolean, Value::Bool(_)) => true,
        (FieldKind::Timestamp, Value::Timestamp(_)) => true,
        (FieldKind::Enum(def), Value::Enum(code)) => def.by_code(code).is_some(),
        (FieldKind::ShortText { .. } | FieldKind::LongText { .. }, Value::Text(_)) => true,
        (FieldKind::Blob { .. }, Value::Blob(_)) => true,
        _ => false,
    };
    if !shape_ok {
        return Err(format!(
            "field {} expects a {} value",
            field.label,
            field.kind.name()
        ));
    }

    if let (Some(max_len), Value::Text(text)) = (field.kind.max_len(), value) {
        let length = text.chars().count();
        if length > max_len {
            return Err(format!(
                "field {} accepts at most {max_len} characters (got {length})",
                field.label
            ));
        }
    }

    Ok(())
}

/// Display names, menu placement and row labels.
pub trait Displayable {
    fn display_name(&self) -> &'static str;

    fn display_plural(&self) -> &'static str;

    fn row_label(&self, record: &Record) -> String;
}

/// Conversion between records and their JSON / CSV shapes.
pub trait Serializable: Sized {
    fn to_json(&self) -> JsonValue;

    fn from_json(ty: &'static RecordType, json: &Map<String, JsonValue>) -> Result<Self, RecordError>;

    fn to_csv_row(&self) -> Vec<String>;

    fn from_csv_row(
        ty: &'static RecordType,
        headers: &[String],
        cells: &[String],
    ) -> Result<Self, RecordError>;
}

/// One row of some record type. Missing fields read as null.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    ty: &'static RecordType,
    values: HashMap<&'static str, Value>,
}

impl Record {
    pub fn new(ty: &'static RecordType) -> Self {
        Self {
            ty,
            values: HashMap::new(),
        }
    }

    pub fn record_type(&self) -> &'static RecordType {
        self.ty
    }

    pub fn id(&self) -> Option<i64> {
        self.get(self.ty.identity_field().name).as_i64()
    }

    pub fn get(&self, name: &str) -> &Value {
        self.values.get(name).unwrap_or(&Value::Null)
    }

    pub fn set(&mut self, name: &str, value: Value) -> Result<(), RecordError> {
        let field = self.ty.field(name)?;
        self.values.insert(field.name, value);
        Ok(())
    }

    pub fn with(mut self, name: &str, value: Value) -> Result<Self, RecordError> {
        self.set(name, value)?;
        Ok(self)
    }

    pub fn set_id(&mut self, id: i64) {
        self.values.insert(self.ty.identity_field().name, Value::Int(id));
    }

    /// Validates every declared field, collecting one message per failing field.
    pub fn validate(&self) -> Result<(), Vec<(String, String)>> {
        let errors: Vec<_> = self
            .ty
            .fields()
            .iter()
            .filter_map(|field| {
                validate_value(field, self.get(field.name))
                    .err()
                    .map(|message| (field.name.to_string(), message))
            })
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

impl Serializable for Record {
    fn to_json(&self) -> JsonValue {
        let mut map = Map::new();
        for field in self.ty.fields() {
            map.insert(field.name.to_string(), self.get(field.name).to_json());
        }
        JsonValue::Object(map)
    }

    fn from_json(ty: &'static RecordType, json: &Map<String, JsonValue>) -> Result<Self, RecordError> {
        let mut record = Record::new(ty);
        for field in ty.fields() {
            if let Some(raw) = json.get(field.name) {
                record.values.insert(field.name, Value::from_json(field, raw)?);
            }
        }
        Ok(record)
    }

    fn to_csv_row(&self) -> Vec<String> {
        self.ty
            .fields()
            .iter()
            .map(|field| self.get(field.name).to_csv())
            .collect()
    }

    fn from_csv_row(
        ty: &'static RecordType,
        headers: &[String],
        cells: &[String],
    ) -> Result<Self, RecordError> {
        let mut record = Record::new(ty);
        for (header, cell) in headers.iter().zip(cells) {
            // Columns that no longer exist on the type are ignored.
            let Ok(field) = ty.field(header.trim()) else {
                continue;
            };
            record.values.insert(field.name, Value::from_csv(field, cell)?);
        }
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::catalog;

    #[test]
    fn missing_required_field_is_reported() {
        let record = Record::new(&catalog::TIPO_SENSOR)
            .with("nome", Value::Text("Lux".into()))
            .expect("nome exists");
        let errors = record.validate().expect_err("tipo is required");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].0, "tipo");
        assert_eq!(errors[0].1, "field Tipo is required");
    }

    #[test]
    fn text_longer_than_declared_limit_is_rejected() {
        let message = catalog::EMPRESA
            .validate_field("cnpj", &Value::Text("123456789012345".into()))
            .expect_err("cnpj holds 14 characters");
        assert!(message.contains("at most 14"), "{message}");
        assert!(catalog::EMPRESA
            .validate_field("cnpj", &Value::Text("12345678901234".into()))
            .is_ok());
    }

    #[test]
    fn unknown_fields_are_lookup_errors() {
        let err = catalog::SENSOR.field("voltage").expect_err("no such field");
        assert_eq!(
            err,
            RecordError::FieldNotFound {
                table: "SENSOR".into(),
                field: "voltage".into()
            }
        );
    }

    #[test]
    fn csv_rows_skip_unknown_columns() {
        let headers = vec!["id".to_string(), "legacy".to_string(), "nome".to_string()];
        let cells = vec!["3".to_string(), "x".to_string(), "Bomba".to_string()];
        let record = Record::from_csv_row(&catalog::EQUIPAMENTO, &headers, &cells)
            .expect("row should parse");
        assert_eq!(record.id(), Some(3));
        assert_eq!(record.get("nome"), &Value::Text("Bomba".into()));
        assert_eq!(record.get("modelo"), &Value::Null);
    }
}

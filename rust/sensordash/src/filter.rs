//! Serializable comparison filters and the predicates they compile to.

use crate::record::{Describable, FieldKind, Record, RecordError, RecordType, Value};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::{cmp::Ordering, fmt};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FilterOp {
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">=")]
    Ge,
}

impl FilterOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            FilterOp::Eq => "==",
            FilterOp::Ne => "!=",
            FilterOp::Lt => "<",
            FilterOp::Gt => ">",
            FilterOp::Le => "<=",
            FilterOp::Ge => ">=",
        }
    }

    pub fn sql(&self) -> &'static str {
        match self {
            FilterOp::Eq => "=",
            FilterOp::Ne => "<>",
            FilterOp::Lt => "<",
            FilterOp::Gt => ">",
            FilterOp::Le => "<=",
            FilterOp::Ge => ">=",
        }
    }

    fn holds(&self, ordering: Ordering) -> bool {
        match self {
            FilterOp::Eq => ordering == Ordering::Equal,
            FilterOp::Ne => ordering != Ordering::Equal,
            FilterOp::Lt => ordering == Ordering::Less,
            FilterOp::Gt => ordering == Ordering::Greater,
            FilterOp::Le => ordering != Ordering::Greater,
            FilterOp::Ge => ordering != Ordering::Less,
        }
    }
}

impl fmt::Display for FilterOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Compile-time declaration of a filter slot on a record type or plot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterTemplate {
    pub field: &'static str,
    pub op: FilterOp,
    pub name: Option<&'static str>,
    pub label: Option<&'static str>,
    pub optional: bool,
}

impl FilterTemplate {
    pub const fn new(field: &'static str, op: FilterOp) -> Self {
        Self {
            field,
            op,
            name: None,
            label: None,
            optional: true,
        }
    }

    pub const fn named(mut self, name: &'static str) -> Self {
        self.name = Some(name);
        self
    }

    pub const fn labelled(mut self, label: &'static str) -> Self {
        self.label = Some(label);
        self
    }

    pub const fn required(mut self) -> Self {
        self.optional = false;
        self
    }
}

fn default_optional() -> bool {
    true
}

/// A filter slot plus its current value, as carried in navigation state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub field: String,
    pub operator: FilterOp,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default = "default_optional")]
    pub optional: bool,
    #[serde(default)]
    pub value: JsonValue,
}

impl From<&FilterTemplate> for Filter {
    fn from(template: &FilterTemplate) -> Self {
        Self {
            field: template.field.to_string(),
            operator: template.op,
            name: template.name.map(str::to_string),
            label: template.label.map(str::to_string),
            optional: template.optional,
            value: JsonValue::Null,
        }
    }
}

impl Filter {
    pub fn new(field: impl Into<String>, operator: FilterOp) -> Self {
        Self {
            field: field.into(),
            operator,
            name: None,
            label: None,
            optional: true,
            value: JsonValue::Null,
        }
    }

    pub fn with_value(mut self, value: &Value) -> Self {
        self.value = value.to_json();
        self
    }

    pub fn required(mut self) -> Self {
        self.optional = false;
        self
    }

    pub fn has_value(&self) -> bool {
        !self.value.is_null()
    }

    /// Name the filter's value is published under: the override, else the field.
    pub fn value_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.field)
    }

    /// Form key; unique per (field, operator) even when no name override is set.
    pub fn key(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("{}{}", self.field, self.operator),
        }
    }

    /// Two filters occupy the same slot when field and operator match.
    pub fn same_slot(&self, other: &Filter) -> bool {
        self.field == other.field && self.operator == other.operator
    }

    pub fn to_transport(&self) -> JsonValue {
        serde_json::to_value(self).unwrap_or(JsonValue::Null)
    }

    pub fn from_transport(data: &JsonValue) -> Result<Self, serde_json::Error> {
        Filter::deserialize(data)
    }

    /// Typed value of this filter for `ty`.
    pub fn typed_value(&self, ty: &RecordType) -> Result<Value, RecordError> {
        let field = ty.field(&self.field)?;
        if matches!(field.kind, FieldKind::Blob { .. }) {
            return Err(RecordError::UnsupportedType(field.name.to_string()));
        }
        Value::from_json(field, &self.value)
    }

    pub fn compile(&self, ty: &RecordType) -> Result<Predicate, RecordError> {
        let field = ty.field(&self.field)?;
        Ok(Predicate {
            column: field.name,
            op: self.operator,
            value: self.typed_value(ty)?,
        })
    }
}

/// A compiled comparison against one column.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub column: &'static str,
    pub op: FilterOp,
    pub value: Value,
}

impl Predicate {
    pub fn new(column: &'static str, op: FilterOp, value: Value) -> Self {
        Self { column, op, value }
    }

    /// In-memory evaluation with SQL null semantics: `==`/`!=` against null
    /// test for null, ordered comparisons with null never hold.
    pub fn matches(&self, record: &Record) -> bool {
        let current = record.get(self.column);
        match (&self.value, current.is_null()) {
            (Value::Null, is_null) => match self.op {
                FilterOp::Eq => is_null,
                FilterOp::Ne => !is_null,
                _ => false,
            },
            (_, true) => false,
            (expected, false) => current
                .compare(expected)
                .map(|ordering| self.op.holds(ordering))
                .unwrap_or(false),
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match &self.value {
            Value::Null => "NULL".to_string(),
            Value::Real(value) if value.fract() == 0.0 => format!("{value:.1}"),
            Value::Text(value) | Value::Enum(value) => format!("'{value}'"),
            Value::Timestamp(_) => format!("'{}'", self.value.to_csv()),
            other => other.to_csv(),
        };
        write!(f, "{} {} {}", self.column, self.op.sql(), value)
    }
}

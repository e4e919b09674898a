//! Declarative chart specs and the series built from them.

use crate::{
    filter::FilterTemplate,
    record::{
        registry::SimulationInput, Describable, Displayable, FieldKind, Record, RecordError,
        RecordType, Value,
    },
};
use chrono::{Duration, NaiveDate};
use rand::{seq::SliceRandom, Rng, RngCore};
use serde::Serialize;
use serde_json::Value as JsonValue;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartKind {
    Line,
    Bar,
    Step,
}

impl ChartKind {
    fn default_title(&self, plural: &str) -> String {
        match self {
            ChartKind::Line => format!("Line chart - {plural}"),
            ChartKind::Bar => format!("Bar chart - {plural}"),
            ChartKind::Step => format!("Step chart - {plural}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisField {
    pub field: &'static str,
    pub display_name: Option<&'static str>,
}

impl AxisField {
    pub const fn new(field: &'static str) -> Self {
        Self {
            field,
            display_name: None,
        }
    }

    pub const fn display_name(mut self, name: &'static str) -> Self {
        self.display_name = Some(name);
        self
    }
}

/// Tick label for a specific Y value, used by step charts of discrete states.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AxisLabel {
    pub value: f64,
    pub label: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrderBy {
    pub field: &'static str,
    pub ascending: bool,
}

impl OrderBy {
    pub const fn asc(field: &'static str) -> Self {
        Self {
            field,
            ascending: true,
        }
    }

    pub const fn desc(field: &'static str) -> Self {
        Self {
            field,
            ascending: false,
        }
    }
}

#[derive(Debug)]
pub struct PlotSpec {
    pub x: &'static [AxisField],
    pub y: &'static [AxisField],
    pub kind: ChartKind,
    pub y_labels: &'static [AxisLabel],
    pub title: Option<&'static str>,
    pub filters: &'static [FilterTemplate],
    pub order_by: &'static [OrderBy],
}

#[derive(Debug, Error, PartialEq)]
pub enum PlotError {
    #[error("{0} does not declare a chart")]
    NotConfigured(&'static str),

    #[error("{kind:?} charts need exactly one {axis} axis field, found {found}")]
    AxisArity {
        kind: ChartKind,
        axis: &'static str,
        found: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Chart {
    pub kind: ChartKind,
    pub title: String,
    pub x_field: &'static str,
    pub y_field: &'static str,
    pub x_label: String,
    pub y_label: String,
    pub y_labels: Vec<AxisLabel>,
    /// `[x, y]` pairs in fetch order.
    pub points: Vec<[JsonValue; 2]>,
}

impl PlotSpec {
    /// Fields selected by a real fetch: every X field followed by every Y field.
    pub fn selected_fields(&self) -> Vec<&'static str> {
        self.x
            .iter()
            .chain(self.y.iter())
            .map(|axis| axis.field)
            .collect()
    }

    fn single_axes(&self) -> Result<(&AxisField, &AxisField), PlotError> {
        let arity = |axis: &'static str, fields: &[AxisField]| {
            if fields.len() == 1 {
                Ok(())
            } else {
                Err(PlotError::AxisArity {
                    kind: self.kind,
                    axis,
                    found: fields.len(),
                })
            }
        };
        arity("X", self.x)?;
        arity("Y", self.y)?;
        Ok((&self.x[0], &self.y[0]))
    }

    /// Builds the chart series for `records`. Line, bar and step charts all
    /// take exactly one X and one Y field.
    pub fn chart(&self, ty: &RecordType, records: &[Record]) -> Result<Chart, PlotError> {
        let (x, y) = self.single_axes()?;
        let label = |axis: &AxisField| {
            axis.display_name
                .map(str::to_string)
                .unwrap_or_else(|| ty.field_label(axis.field).to_string())
        };

        Ok(Chart {
            kind: self.kind,
            title: self
                .title
                .map(str::to_string)
                .unwrap_or_else(|| self.kind.default_title(ty.display_plural())),
            x_field: x.field,
            y_field: y.field,
            x_label: label(x),
            y_label: label(y),
            y_labels: self.y_labels.to_vec(),
            points: records
                .iter()
                .map(|record| [record.get(x.field).to_json(), record.get(y.field).to_json()])
                .collect(),
        })
    }
}

pub fn spec_for(ty: &RecordType) -> Result<&'static PlotSpec, PlotError> {
    ty.plot.ok_or(PlotError::NotConfigured(ty.table))
}

/// Synthetic records for a simulated chart. Types with their own generator
/// use it; others get random non-null values per field kind.
pub fn simulate(
    ty: &'static RecordType,
    input: &SimulationInput<'_>,
    rng: &mut dyn RngCore,
) -> Result<Vec<Record>, RecordError> {
    if let Some(generator) = ty.simulate {
        return Ok(generator(input, rng));
    }
    (0..input.quantity)
        .map(|_| random_record(ty, input, rng))
        .collect()
}

fn random_record(
    ty: &'static RecordType,
    input: &SimulationInput<'_>,
    rng: &mut dyn RngCore,
) -> Result<Record, RecordError> {
    let mut record = Record::new(ty);
    for field in ty.editable_fields() {
        let value = match input.values_by_field.get(field.name) {
            Some(value) if !value.is_null() => value.clone(),
            _ => random_value(&field.kind, rng),
        };
        record.set(field.name, value)?;
    }
    Ok(record)
}

fn random_value(kind: &FieldKind, rng: &mut dyn RngCore) -> Value {
    const LETTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";
    match kind {
        FieldKind::Enum(def) => def
            .members
            .choose(rng)
            .map(|member| Value::Enum(member.code.to_string()))
            .unwrap_or(Value::Null),
        FieldKind::Timestamp => {
            let year = rng.gen_range(2000..=2023);
            let month = rng.gen_range(1..=12);
            let day = rng.gen_range(1..=28);
            NaiveDate::from_ymd_opt(year, month, day)
                .and_then(|date| {
                    date.and_hms_opt(rng.gen_range(0..24), rng.gen_range(0..60), rng.gen_range(0..60))
                })
                .map(Value::Timestamp)
                .unwrap_or(Value::Null)
        }
        FieldKind::Integer | FieldKind::ForeignKey { .. } | FieldKind::Identity => {
            Value::Int(rng.gen_range(0..=100))
        }
        FieldKind::Real => {
            let whole = f64::from(rng.gen_range(0..=100u32));
            let tenth = f64::from(rng.gen_range(0..10u32)) / 10.0;
            Value::Real(((whole + tenth) * 100.0).round() / 100.0)
        }
        FieldKind::Boolean => Value::Bool(rng.gen_bool(0.5)),
        FieldKind::ShortText { max_len } | FieldKind::LongText { max_len } => {
            let length = rng.gen_range(1..=10usize.min(*max_len).max(1));
            let text = (0..length)
                .map(|_| char::from(LETTERS[rng.gen_range(0..LETTERS.len())]))
                .collect();
            Value::Text(text)
        }
        FieldKind::Blob { .. } => Value::Null,
    }
}

/// Default start of a simulated window when no filter supplies one.
pub fn default_window_start(now: chrono::NaiveDateTime) -> chrono::NaiveDateTime {
    now - Duration::days(7)
}

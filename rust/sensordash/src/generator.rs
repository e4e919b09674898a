//! Synthetic reading data for demos and load checks.
//!
//! Each sensor type has a plausible value range; readings are spread evenly
//! over a time window and written through the regular store.

use crate::{
    error::{Result, ServiceError},
    filter::{FilterOp, Predicate},
    ingest::ensure_sensor_type,
    record::{
        catalog::{LEITURA_SENSOR, SENSOR, TIPO_SENSOR_ENUM},
        EnumMember, Record, Value,
    },
    store::{Persistable, RecordQuery},
};
use chrono::{Duration, NaiveDateTime};
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Upper bound on readings per sensor in one request.
pub const MAX_READINGS_PER_SENSOR: u32 = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ValueRange {
    pub min: f64,
    pub max: f64,
}

impl ValueRange {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }
}

/// Range drawn from when generating readings for a sensor type.
pub fn range_for(member: &EnumMember) -> ValueRange {
    match member.code {
        "L" => ValueRange::new(0.1, 100_000.0),
        "T" => ValueRange::new(-40.0, 85.0),
        "V" => ValueRange::new(0.0, 3.0),
        _ => ValueRange::new(0.0, 100.0),
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GenerationRequest {
    pub data_inicial: NaiveDateTime,
    pub data_final: NaiveDateTime,
    pub total_leituras: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneratedSeries {
    pub sensor_id: i64,
    pub tipo: &'static str,
    pub range: ValueRange,
    pub readings: usize,
}

fn invalid(message: &str) -> ServiceError {
    ServiceError::InvalidRequest(message.to_string())
}

/// `total` readings for `sensor_id`, the i-th stamped at
/// `start + (end - start) * i / total`, values uniform in `[min, max)`.
pub fn reading_series(
    sensor_id: i64,
    start: NaiveDateTime,
    end: NaiveDateTime,
    total: u32,
    range: ValueRange,
    rng: &mut dyn RngCore,
) -> Result<Vec<Record>> {
    if start >= end {
        return Err(invalid("the start date must be before the end date"));
    }
    if !(range.min.is_finite() && range.max.is_finite()) || range.min >= range.max {
        return Err(invalid("the minimum value must be lower than the maximum"));
    }
    if total > MAX_READINGS_PER_SENSOR {
        return Err(ServiceError::InvalidRequest(format!(
            "at most {MAX_READINGS_PER_SENSOR} readings per sensor can be generated"
        )));
    }

    let span = i128::from((end - start).num_milliseconds());
    (0..total)
        .map(|index| -> Result<Record> {
            let step = span * i128::from(index) / i128::from(total);
            let stamp = start + Duration::milliseconds(step as i64);
            let valor = rng.gen_range(range.min..range.max);
            Ok(Record::new(&LEITURA_SENSOR)
                .with("sensor_id", Value::Int(sensor_id))?
                .with("data_leitura", Value::Timestamp(stamp))?
                .with("valor", Value::Real(valor))?)
        })
        .collect()
}

/// One sensor per sensor type, created with its type when missing.
/// Returns `(sensor id, type)` pairs in type order.
pub async fn ensure_default_sensors<S: Persistable + ?Sized>(
    store: &S,
) -> Result<Vec<(i64, &'static EnumMember)>> {
    let mut sensors = Vec::with_capacity(TIPO_SENSOR_ENUM.members.len());
    for member in TIPO_SENSOR_ENUM.members {
        let type_id = ensure_sensor_type(store, member).await?;
        let query = RecordQuery::filtered(vec![Predicate::new(
            "tipo_sensor_id",
            FilterOp::Eq,
            Value::Int(type_id),
        )]);
        let existing = store.list(&SENSOR, &query).await?.into_iter().next();
        let sensor = match existing {
            Some(sensor) => sensor,
            None => {
                let created = Record::new(&SENSOR)
                    .with("tipo_sensor_id", Value::Int(type_id))?
                    .with("nome", Value::Text(format!("Sensor {}", member.label)))?
                    .with("descricao", Value::Text("Criado automaticamente pelo sistema".into()))?;
                store.insert(&created).await?
            }
        };
        let id = sensor.id().ok_or_else(|| {
            ServiceError::Internal(anyhow::anyhow!("sensor for type {} has no identity", member.code))
        })?;
        sensors.push((id, member));
    }
    Ok(sensors)
}

/// Fills the default sensors with `request.total_leituras` readings each.
pub async fn generate_sample<S: Persistable + ?Sized>(
    store: &S,
    request: &GenerationRequest,
    rng: &mut (dyn RngCore + Send),
) -> Result<Vec<GeneratedSeries>> {
    let mut summary = Vec::new();
    for (sensor_id, member) in ensure_default_sensors(store).await? {
        let range = range_for(member);
        let readings = reading_series(
            sensor_id,
            request.data_inicial,
            request.data_final,
            request.total_leituras,
            range,
            rng,
        )?;
        for reading in &readings {
            store.insert(reading).await?;
        }
        info!(sensor_id, tipo = member.code, readings = readings.len(), "generated readings");
        summary.push(GeneratedSeries {
            sensor_id,
            tipo: member.code,
            range,
            readings: readings.len(),
        });
    }
    Ok(summary)
}

/// `generate_sample` in its own transaction.
pub async fn generate(
    store: &dyn Persistable,
    request: &GenerationRequest,
    rng: &mut (dyn RngCore + Send),
) -> Result<Vec<GeneratedSeries>> {
    let tx = store.begin().await?;
    match generate_sample(tx.as_ref(), request, rng).await {
        Ok(summary) => {
            tx.commit().await?;
            Ok(summary)
        }
        Err(err) => {
            if let Err(rollback) = tx.rollback().await {
                warn!(error = %rollback, "rollback after failed generation also failed");
            }
            Err(err)
        }
    }
}

//! Device-facing API: sensor registration and reading intake.
//!
//! Served on its own listener. Every request runs in one unit of work.

use crate::{
    error::{Result, ServiceError},
    filter::{FilterOp, Predicate},
    record::{
        catalog::{LEITURA_SENSOR, SENSOR, TIPO_SENSOR, TIPO_SENSOR_ENUM},
        EnumMember, Record, Value,
    },
    state::AppState,
    store::{Persistable, RecordQuery},
};
use anyhow::anyhow;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use chrono::{NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Deserialize)]
pub struct InitRequest {
    pub serial: String,
}

/// One telemetry sample. Slots left out are not recorded.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReadingRequest {
    pub serial: String,
    pub lux: Option<f64>,
    pub temperatura: Option<f64>,
    pub vibracao_media: Option<f64>,
    pub acelerometro_x: Option<f64>,
    pub acelerometro_y: Option<f64>,
    pub acelerometro_z: Option<f64>,
}

impl ReadingRequest {
    /// Value carried for the sensor type `member`, if any.
    pub fn slot(&self, member: &EnumMember) -> Option<f64> {
        match member.key {
            "LUX" => self.lux,
            "TEMPERATURA" => self.temperatura,
            "VIBRACAO" => self.vibracao_media,
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestReply {
    pub status: &'static str,
    pub message: String,
}

impl IngestReply {
    fn success(message: impl Into<String>) -> Self {
        Self {
            status: "success",
            message: message.into(),
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            status: "error",
            message: message.into(),
        }
    }
}

fn text(value: &str) -> Value {
    Value::Text(value.to_string())
}

pub(crate) async fn ensure_sensor_type<S: Persistable + ?Sized>(
    store: &S,
    member: &'static EnumMember,
) -> Result<i64> {
    let query = RecordQuery::filtered(vec![Predicate::new(
        "tipo",
        FilterOp::Eq,
        Value::Enum(member.code.to_string()),
    )]);
    let existing = store.list(&TIPO_SENSOR, &query).await?.into_iter().next();
    let record = match existing {
        Some(record) => record,
        None => {
            let created = Record::new(&TIPO_SENSOR)
                .with("nome", text(member.label))?
                .with("tipo", Value::Enum(member.code.to_string()))?;
            let saved = store.insert(&created).await?;
            info!(tipo = member.code, id = ?saved.id(), "created sensor type");
            saved
        }
    };
    record
        .id()
        .ok_or_else(|| ServiceError::Internal(anyhow!("sensor type {} has no identity", member.code)))
}

/// Makes sure `serial` has one sensor per sensor type. Returns how many
/// sensors were created; registering a known device is a no-op.
pub async fn register_device<S: Persistable + ?Sized>(store: &S, serial: &str) -> Result<usize> {
    let mut created = 0;
    for member in TIPO_SENSOR_ENUM.members {
        let type_id = ensure_sensor_type(store, member).await?;
        let query = RecordQuery::filtered(vec![
            Predicate::new("cod_serial", FilterOp::Eq, text(serial)),
            Predicate::new("tipo_sensor_id", FilterOp::Eq, Value::Int(type_id)),
        ]);
        if store.count(&SENSOR, &query.predicates).await? > 0 {
            continue;
        }

        let sensor = Record::new(&SENSOR)
            .with("tipo_sensor_id", Value::Int(type_id))?
            .with("nome", Value::Text(format!("Sensor {} - {serial}", member.code)))?
            .with("cod_serial", text(serial))?
            .with("descricao", text("Sensor cadastrado via API"))?;
        let saved = store.insert(&sensor).await?;
        debug!(serial, tipo = member.code, id = ?saved.id(), "created sensor");
        created += 1;
    }
    Ok(created)
}

/// Stores one reading per sensor of the device whose slot is present.
/// Returns the number of readings written.
pub async fn record_readings<S: Persistable + ?Sized>(
    store: &S,
    request: &ReadingRequest,
    now: NaiveDateTime,
) -> Result<usize> {
    let query = RecordQuery::filtered(vec![Predicate::new(
        "cod_serial",
        FilterOp::Eq,
        text(&request.serial),
    )]);
    let sensors = store.list(&SENSOR, &query).await?;
    if sensors.is_empty() {
        return Err(ServiceError::NotFound(format!(
            "no sensor registered with serial {}",
            request.serial
        )));
    }

    let mut written = 0;
    for sensor in &sensors {
        let type_id = sensor.get("tipo_sensor_id").as_i64();
        let sensor_type = match type_id {
            Some(id) => store.get(&TIPO_SENSOR, id).await?,
            None => None,
        };
        let Some(sensor_type) = sensor_type else {
            return Err(ServiceError::NotFound(format!(
                "sensor type of sensor {:?}",
                sensor.id()
            )));
        };

        let member = sensor_type
            .get("tipo")
            .as_str()
            .and_then(|code| TIPO_SENSOR_ENUM.by_code(code));
        let Some(valor) = member.and_then(|member| request.slot(member)) else {
            continue;
        };
        let Some(sensor_id) = sensor.id() else {
            continue;
        };

        let reading = Record::new(&LEITURA_SENSOR)
            .with("sensor_id", Value::Int(sensor_id))?
            .with("data_leitura", Value::Timestamp(now))?
            .with("valor", Value::Real(valor))?;
        store.insert(&reading).await?;
        written += 1;
    }
    Ok(written)
}

/// `register_device` in its own transaction.
pub async fn register(store: &dyn Persistable, serial: &str) -> Result<usize> {
    let tx = store.begin().await?;
    match register_device(tx.as_ref(), serial).await {
        Ok(created) => {
            tx.commit().await?;
            Ok(created)
        }
        Err(err) => {
            if let Err(rollback) = tx.rollback().await {
                warn!(error = %rollback, "rollback after failed registration also failed");
            }
            Err(err)
        }
    }
}

/// `record_readings` in its own transaction.
pub async fn receive(
    store: &dyn Persistable,
    request: &ReadingRequest,
    now: NaiveDateTime,
) -> Result<usize> {
    let tx = store.begin().await?;
    match record_readings(tx.as_ref(), request, now).await {
        Ok(written) => {
            tx.commit().await?;
            Ok(written)
        }
        Err(err) => {
            if let Err(rollback) = tx.rollback().await {
                warn!(error = %rollback, "rollback after failed reading also failed");
            }
            Err(err)
        }
    }
}

fn failure(err: ServiceError) -> Response {
    let status = err.status();
    if status.is_server_error() {
        error!(error = %err, "ingestion request failed");
    } else {
        warn!(error = %err, "ingestion request rejected");
    }
    (status, Json(IngestReply::error(err.to_string()))).into_response()
}

async fn init(State(state): State<AppState>, Json(request): Json<InitRequest>) -> Response {
    match register(state.store.as_ref(), &request.serial).await {
        Ok(created) => {
            info!(serial = %request.serial, created, "device registered");
            (
                StatusCode::OK,
                Json(IngestReply::success("Sensor registered successfully.")),
            )
                .into_response()
        }
        Err(err) => failure(err),
    }
}

async fn leitura(State(state): State<AppState>, Json(request): Json<ReadingRequest>) -> Response {
    debug!(
        serial = %request.serial,
        acelerometro_x = ?request.acelerometro_x,
        acelerometro_y = ?request.acelerometro_y,
        acelerometro_z = ?request.acelerometro_z,
        "reading received"
    );
    let now = Utc::now().naive_utc();
    match receive(state.store.as_ref(), &request, now).await {
        Ok(written) => {
            info!(serial = %request.serial, written, "readings stored");
            (
                StatusCode::OK,
                Json(IngestReply::success("Reading received successfully.")),
            )
                .into_response()
        }
        Err(err) => failure(err),
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/init/", post(init))
        .route("/init", post(init))
        .route("/leitura/", post(leitura))
        .route("/leitura", post(leitura))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, StoreError};
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 6, 1)
            .unwrap()
            .and_hms_opt(8, 30, 0)
            .unwrap()
    }

    fn reading(serial: &str) -> ReadingRequest {
        ReadingRequest {
            serial: serial.to_string(),
            ..ReadingRequest::default()
        }
    }

    #[tokio::test]
    async fn registration_creates_types_and_sensors_once() {
        let store = MemoryStore::new();
        assert_eq!(register(&store, "S1").await.unwrap(), 3);
        assert_eq!(register(&store, "S1").await.unwrap(), 0);
        assert_eq!(register(&store, "S2").await.unwrap(), 3);

        let types = store.rows(&TIPO_SENSOR);
        let names: Vec<_> = types.iter().map(|row| row.get("nome").clone()).collect();
        assert_eq!(
            names,
            vec![text("Lux (x10³)"), text("Temperatura (°C)"), text("Vibração")]
        );

        let sensors = store.rows(&SENSOR);
        assert_eq!(sensors.len(), 6);
        assert_eq!(sensors[0].get("nome"), &text("Sensor L - S1"));
        assert_eq!(sensors[0].get("descricao"), &text("Sensor cadastrado via API"));
    }

    #[tokio::test]
    async fn only_present_slots_are_recorded() {
        let store = MemoryStore::new();
        register(&store, "S1").await.unwrap();

        let request = ReadingRequest {
            lux: Some(42.0),
            acelerometro_x: Some(0.3),
            ..reading("S1")
        };
        assert_eq!(receive(&store, &request, now()).await.unwrap(), 1);

        let readings = store.rows(&LEITURA_SENSOR);
        assert_eq!(readings.len(), 1);
        assert_eq!(readings[0].get("valor"), &Value::Real(42.0));
        assert_eq!(readings[0].get("data_leitura"), &Value::Timestamp(now()));

        let lux_sensor = store
            .rows(&SENSOR)
            .into_iter()
            .find(|sensor| sensor.get("nome") == &text("Sensor L - S1"))
            .and_then(|sensor| sensor.id());
        assert_eq!(readings[0].get("sensor_id").as_i64(), lux_sensor);
    }

    #[tokio::test]
    async fn unknown_serials_are_not_found() {
        let store = MemoryStore::new();
        let err = receive(&store, &reading("nope"), now()).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn failed_registration_leaves_nothing_behind() {
        let store = MemoryStore::new();
        store.fail_next_write(StoreError::Database("disk full".into()));
        assert!(register(&store, "S1").await.is_err());
        assert!(store.rows(&TIPO_SENSOR).is_empty());
        assert!(store.rows(&SENSOR).is_empty());
    }
}

mod support;

use pretty_assertions::assert_eq;
use sensordash::record::{
    catalog::{LEITURA_SENSOR, SENSOR, TIPO_SENSOR},
    Value,
};
use serde_json::json;
use support::{memory_harness, read_json};

#[tokio::test]
async fn init_registers_one_sensor_per_type() {
    let harness = memory_harness();

    let (status, body) = read_json(harness.ingest("/init/", &json!({"serial": "S1"})).await).await;
    assert_eq!(status, http::StatusCode::OK);
    assert_eq!(body["status"], json!("success"));

    let (status, _) = read_json(harness.ingest("/init/", &json!({"serial": "S1"})).await).await;
    assert_eq!(status, http::StatusCode::OK);

    assert_eq!(harness.store().rows(&TIPO_SENSOR).len(), 3);
    let names: Vec<_> = harness
        .store()
        .rows(&SENSOR)
        .iter()
        .map(|sensor| sensor.get("nome").clone())
        .collect();
    assert_eq!(
        names,
        vec![
            Value::Text("Sensor L - S1".into()),
            Value::Text("Sensor T - S1".into()),
            Value::Text("Sensor V - S1".into()),
        ]
    );
}

#[tokio::test]
async fn lux_reading_lands_on_the_lux_sensor_only() {
    let harness = memory_harness();
    harness.ingest("/init/", &json!({"serial": "S1"})).await;

    let (status, body) = read_json(
        harness
            .ingest(
                "/leitura/",
                &json!({
                    "serial": "S1",
                    "lux": 42.0,
                    "acelerometro_x": 0.1,
                    "acelerometro_y": 0.2,
                    "acelerometro_z": 9.8
                }),
            )
            .await,
    )
    .await;
    assert_eq!(status, http::StatusCode::OK);
    assert_eq!(body["status"], json!("success"));

    let readings = harness.store().rows(&LEITURA_SENSOR);
    assert_eq!(readings.len(), 1);
    assert_eq!(readings[0].get("valor"), &Value::Real(42.0));

    let lux_sensor = harness
        .store()
        .rows(&SENSOR)
        .into_iter()
        .find(|sensor| sensor.get("nome") == &Value::Text("Sensor L - S1".into()))
        .and_then(|sensor| sensor.id());
    assert_eq!(readings[0].get("sensor_id").as_i64(), lux_sensor);
}

#[tokio::test]
async fn every_present_slot_is_recorded() {
    let harness = memory_harness();
    harness.ingest("/init", &json!({"serial": "S9"})).await;

    let (status, _) = read_json(
        harness
            .ingest(
                "/leitura",
                &json!({"serial": "S9", "lux": 1.0, "temperatura": 21.5, "vibracao_media": 0.02}),
            )
            .await,
    )
    .await;
    assert_eq!(status, http::StatusCode::OK);
    assert_eq!(harness.store().rows(&LEITURA_SENSOR).len(), 3);
}

#[tokio::test]
async fn unknown_serial_is_404_with_error_status() {
    let harness = memory_harness();
    let (status, body) = read_json(
        harness
            .ingest("/leitura/", &json!({"serial": "ghost", "lux": 1.0}))
            .await,
    )
    .await;
    assert_eq!(status, http::StatusCode::NOT_FOUND);
    assert_eq!(body["status"], json!("error"));
    assert!(body["message"]
        .as_str()
        .is_some_and(|message| message.contains("ghost")));
    assert!(harness.store().rows(&LEITURA_SENSOR).is_empty());
}

#[tokio::test]
async fn ingested_readings_feed_the_dataset() {
    let harness = memory_harness();
    harness.ingest("/init/", &json!({"serial": "S1"})).await;
    harness
        .ingest("/leitura/", &json!({"serial": "S1", "lux": 40.0, "temperatura": 25.0}))
        .await;

    let (status, body) = read_json(harness.get("/api/dataset/readings").await).await;
    assert_eq!(status, http::StatusCode::OK);
    assert_eq!(body["columns"], json!(["Lux (x10³)", "Temperatura (°C)"]));
    assert_eq!(body["rows"][0]["values"], json!([40.0, 25.0]));
}

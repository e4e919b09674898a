//! Runs against a live PostgreSQL when `SENSORDASH_TEST_DATABASE_URL` is set.

mod support;

use serde_json::json;
use serial_test::serial;
use sensordash::server::Server;
use std::{
    env,
    time::{SystemTime, UNIX_EPOCH},
};
use support::{read_json, test_config, TestHarness};

async fn postgres_harness() -> Option<TestHarness> {
    let database_url = match env::var("SENSORDASH_TEST_DATABASE_URL") {
        Ok(url) if !url.trim().is_empty() => url,
        _ => {
            eprintln!(
                "[sensordash-test] skipping postgres tests: SENSORDASH_TEST_DATABASE_URL is not set"
            );
            return None;
        }
    };
    let server = Server::new(test_config(database_url))
        .await
        .expect("failed to boot server against test database");
    Some(TestHarness::from_server(&server))
}

fn unique_suffix() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos())
        .unwrap_or_default()
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn records_round_trip_through_postgres() {
    let Some(harness) = postgres_harness().await else {
        return;
    };
    let nome = format!("Empresa {}", unique_suffix());

    let (status, created) = read_json(
        harness
            .post_json("/api/types/EMPRESA/records", &json!({"nome": nome, "estado": "RJ"}))
            .await,
    )
    .await;
    assert_eq!(status, http::StatusCode::CREATED, "unexpected body: {created}");
    let id = created["id"].as_i64().expect("identity assigned");

    let (status, fetched) = read_json(harness.get(&format!("/api/types/EMPRESA/records/{id}")).await).await;
    assert_eq!(status, http::StatusCode::OK);
    assert_eq!(fetched["nome"], json!(nome));
    assert_eq!(fetched["estado"], json!("RJ"));

    let (status, _) = read_json(
        harness
            .post_json("/api/types/EMPRESA/records", &json!({"nome": nome}))
            .await,
    )
    .await;
    assert_eq!(status, http::StatusCode::CONFLICT);

    let (status, deleted) = read_json(
        harness
            .delete(&format!("/api/types/EMPRESA/records/{id}?confirm=true"))
            .await,
    )
    .await;
    assert_eq!(status, http::StatusCode::OK);
    assert_eq!(deleted["status"], json!("deleted"));
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn ingestion_writes_readings_in_postgres() {
    let Some(harness) = postgres_harness().await else {
        return;
    };
    let serial = format!("PG{}", unique_suffix());

    let (status, _) = read_json(harness.ingest("/init/", &json!({"serial": serial})).await).await;
    assert_eq!(status, http::StatusCode::OK);

    let (status, body) = read_json(
        harness
            .ingest("/leitura/", &json!({"serial": serial, "temperatura": 23.5}))
            .await,
    )
    .await;
    assert_eq!(status, http::StatusCode::OK, "unexpected body: {body}");

    let (status, dataset) = read_json(harness.get("/api/dataset/readings").await).await;
    assert_eq!(status, http::StatusCode::OK);
    assert!(dataset["columns"]
        .as_array()
        .is_some_and(|columns| columns.contains(&json!("Temperatura (°C)"))));
}

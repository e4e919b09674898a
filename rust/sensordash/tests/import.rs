mod support;

use pretty_assertions::assert_eq;
use sensordash::record::{
    catalog::{EMPRESA, SENSOR, TIPO_SENSOR},
    Record, Serializable,
};
use serde_json::{json, Value};
use std::io::{Cursor, Write};
use support::{memory_harness, read_bytes, read_json};
use zip::{write::SimpleFileOptions, ZipWriter};

fn archive(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, contents) in entries {
        writer
            .start_file(*name, SimpleFileOptions::default())
            .expect("entry should start");
        writer
            .write_all(contents.as_bytes())
            .expect("entry should be written");
    }
    writer.finish().expect("archive should finish").into_inner()
}

fn as_json(rows: &[Record]) -> Vec<Value> {
    rows.iter().map(Serializable::to_json).collect()
}

#[tokio::test]
async fn export_then_import_reproduces_the_database() {
    let source = memory_harness();
    source
        .post_json("/api/types/EMPRESA/records", &json!({"nome": "ACME", "estado": "SP"}))
        .await;
    source.ingest("/init/", &json!({"serial": "S1"})).await;

    let response = source.get("/api/export").await;
    assert_eq!(
        response.headers()[http::header::CONTENT_DISPOSITION],
        "attachment; filename=\"database_export.zip\""
    );
    let (status, exported) = read_bytes(response).await;
    assert_eq!(status, http::StatusCode::OK);

    let target = memory_harness();
    let (status, summary) = read_json(target.post_zip("/api/import", exported).await).await;
    assert_eq!(status, http::StatusCode::OK);
    let inserted: usize = summary["tables"]
        .as_array()
        .expect("summary lists tables")
        .iter()
        .filter_map(|table| table["inserted"].as_u64())
        .map(|count| count as usize)
        .sum();
    assert_eq!(inserted, 1 + 3 + 3);

    for ty in [&EMPRESA, &TIPO_SENSOR, &SENSOR] {
        assert_eq!(as_json(&target.store().rows(ty)), as_json(&source.store().rows(ty)));
    }

    // New rows continue after the imported identities.
    let (_, created) = read_json(
        target
            .post_json("/api/types/EMPRESA/records", &json!({"nome": "Initech"}))
            .await,
    )
    .await;
    assert_eq!(created["id"], json!(2));
}

#[tokio::test]
async fn preview_lists_every_type_even_without_a_file() {
    let harness = memory_harness();
    let zip = archive(&[("TIPO_SENSOR.csv", "id,nome,tipo\n7,Lux,L\n")]);

    let (status, body) = read_json(harness.post_zip("/api/import/preview", zip).await).await;
    assert_eq!(status, http::StatusCode::OK);
    let tables = body.as_array().expect("preview is a list");
    assert_eq!(tables.len(), 6);

    let tipo = tables
        .iter()
        .find(|table| table["table"] == json!("TIPO_SENSOR"))
        .expect("TIPO_SENSOR previewed");
    assert_eq!(tipo["rows"], json!(1));
    assert_eq!(tipo["records"][0], json!({"id": 7, "nome": "Lux", "tipo": "L"}));

    let empresa = tables
        .iter()
        .find(|table| table["table"] == json!("EMPRESA"))
        .expect("EMPRESA previewed");
    assert_eq!(empresa["rows"], json!(0));
    assert!(harness.store().rows(&TIPO_SENSOR).is_empty());
}

#[tokio::test]
async fn colliding_identities_are_merged() {
    let harness = memory_harness();
    harness
        .post_json("/api/types/TIPO_SENSOR/records", &json!({"nome": "Lux", "tipo": "L"}))
        .await;

    let zip = archive(&[("TIPO_SENSOR.csv", "id,nome,tipo\n1,Luminosidade,L\n")]);
    let (status, summary) = read_json(harness.post_zip("/api/import", zip).await).await;
    assert_eq!(status, http::StatusCode::OK);

    let tipo = summary["tables"]
        .as_array()
        .and_then(|tables| tables.iter().find(|t| t["table"] == json!("TIPO_SENSOR")))
        .cloned()
        .expect("TIPO_SENSOR summarised");
    assert_eq!(tipo["merged"], json!(1));

    let rows = harness.store().rows(&TIPO_SENSOR);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("nome").as_str(), Some("Luminosidade"));
}

#[tokio::test]
async fn malformed_archives_are_bad_requests() {
    let harness = memory_harness();
    let (status, body) = read_json(harness.post_zip("/api/import", b"not a zip".to_vec()).await).await;
    assert_eq!(status, http::StatusCode::BAD_REQUEST);
    assert!(body["error"]
        .as_str()
        .is_some_and(|message| message.contains("invalid archive")));

    let zip = archive(&[("LEITURA_SENSOR.csv", "id,sensor_id,data_leitura,valor\n1,1,yesterday,2.0\n")]);
    let (status, body) = read_json(harness.post_zip("/api/import", zip).await).await;
    assert_eq!(status, http::StatusCode::BAD_REQUEST);
    assert!(body["error"]
        .as_str()
        .is_some_and(|message| message.contains("LEITURA_SENSOR.csv: line 2")));
}

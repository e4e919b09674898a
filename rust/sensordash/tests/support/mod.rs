#![allow(dead_code)]

use axum::{
    body::{self, Body},
    http::{self, Request, StatusCode},
    Router,
};
use sensordash::{config::AppConfig, record::catalog, server::Server, store::MemoryStore};
use serde::Serialize;
use serde_json::Value;
use std::{net::SocketAddr, sync::Arc, sync::Once};
use tower::ServiceExt;

pub const API_KEY: &str = "test-api-key";

static TRACING_INIT: Once = Once::new();

pub fn test_config(database_url: String) -> AppConfig {
    AppConfig {
        listen_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
        ingest_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
        ingest_enabled: true,
        database_url,
        max_pool_size: 5,
        api_key: Some(API_KEY.to_string()),
        items_per_page: 50,
        auto_migrate: true,
        max_upload_bytes: 4 * 1024 * 1024,
    }
}

/// Dashboard and ingestion routers sharing one in-memory store.
#[derive(Clone)]
pub struct TestHarness {
    memory: Option<MemoryStore>,
    dashboard: Router,
    ingest: Router,
}

pub fn memory_harness() -> TestHarness {
    TRACING_INIT.call_once(|| {
        let _ = tracing_subscriber::fmt::try_init();
    });

    let store = MemoryStore::new();
    let server = Server::with_store(
        test_config("postgres://unused".to_string()),
        catalog::registry(),
        Arc::new(store.clone()),
    );
    TestHarness {
        memory: Some(store),
        dashboard: server.router(),
        ingest: server.ingest_router(),
    }
}

impl TestHarness {
    pub fn from_server(server: &Server) -> Self {
        Self {
            memory: None,
            dashboard: server.router(),
            ingest: server.ingest_router(),
        }
    }

    /// Backing store of a memory harness.
    pub fn store(&self) -> &MemoryStore {
        self.memory
            .as_ref()
            .expect("only memory harnesses expose their store")
    }

    pub async fn get(&self, path: &str) -> http::Response<Body> {
        self.send(&self.dashboard, "GET", path, Body::empty(), None, true)
            .await
    }

    pub async fn get_without_api_key(&self, path: &str) -> http::Response<Body> {
        self.send(&self.dashboard, "GET", path, Body::empty(), None, false)
            .await
    }

    pub async fn delete(&self, path: &str) -> http::Response<Body> {
        self.send(&self.dashboard, "DELETE", path, Body::empty(), None, true)
            .await
    }

    pub async fn post_json<T: Serialize>(&self, path: &str, payload: &T) -> http::Response<Body> {
        self.json(&self.dashboard, "POST", path, payload).await
    }

    pub async fn put_json<T: Serialize>(&self, path: &str, payload: &T) -> http::Response<Body> {
        self.json(&self.dashboard, "PUT", path, payload).await
    }

    pub async fn post_zip(&self, path: &str, archive: Vec<u8>) -> http::Response<Body> {
        self.send(
            &self.dashboard,
            "POST",
            path,
            Body::from(archive),
            Some("application/zip"),
            true,
        )
        .await
    }

    /// Device-side request; the ingestion API takes no API key.
    pub async fn ingest<T: Serialize>(&self, path: &str, payload: &T) -> http::Response<Body> {
        let body = serde_json::to_vec(payload).expect("request payload should serialize");
        self.send(
            &self.ingest,
            "POST",
            path,
            Body::from(body),
            Some("application/json"),
            false,
        )
        .await
    }

    async fn json<T: Serialize>(
        &self,
        router: &Router,
        method: &str,
        path: &str,
        payload: &T,
    ) -> http::Response<Body> {
        let body = serde_json::to_vec(payload).expect("request payload should serialize");
        self.send(
            router,
            method,
            path,
            Body::from(body),
            Some("application/json"),
            true,
        )
        .await
    }

    async fn send(
        &self,
        router: &Router,
        method: &str,
        path: &str,
        body: Body,
        content_type: Option<&str>,
        include_api_key: bool,
    ) -> http::Response<Body> {
        let mut builder = Request::builder().method(method).uri(path);
        if let Some(content_type) = content_type {
            builder = builder.header(http::header::CONTENT_TYPE, content_type);
        }
        if include_api_key {
            builder = builder.header("x-api-key", API_KEY);
        }
        let request = builder
            .body(body)
            .expect("failed to build harness request");
        router
            .clone()
            .oneshot(request)
            .await
            .expect("router should handle harness request")
    }
}

pub async fn read_bytes(response: http::Response<Body>) -> (StatusCode, Vec<u8>) {
    let status = response.status();
    let bytes = body::to_bytes(response.into_body(), 16 * 1024 * 1024)
        .await
        .expect("response body should be readable");
    (status, bytes.to_vec())
}

pub async fn read_json(response: http::Response<Body>) -> (StatusCode, Value) {
    let (status, bytes) = read_bytes(response).await;
    let value =
        serde_json::from_slice::<Value>(&bytes).expect("response body should be valid JSON");
    (status, value)
}

/// Query string for navigation state returned by the filter endpoints.
pub fn nav_query(nav: &Value) -> String {
    let mut pairs = Vec::new();
    if let Some(object) = nav.as_object() {
        for (key, value) in object {
            let raw = match value {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            };
            pairs.push(format!("{key}={}", percent_encode(&raw)));
        }
    }
    pairs.join("&")
}

fn percent_encode(raw: &str) -> String {
    raw.chars()
        .map(|ch| match ch {
            '+' => "%2B".to_string(),
            '/' => "%2F".to_string(),
            '=' => "%3D".to_string(),
            other => other.to_string(),
        })
        .collect()
}

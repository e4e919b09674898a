use crate::{
    config::AppConfig,
    dataset::{self, ReadingsDataset},
    db,
    error::{Result, ServiceError},
    generator::{self, GeneratedSeries, GenerationRequest},
    ingest,
    nav::NavState,
    plot,
    query_filters::QueryFilters,
    record::{catalog, ddl, registry::MenuGroup, Registry, Serializable},
    state::AppState,
    store::{PgStore, Persistable},
    transfer::{self, ImportSummary, TablePreview, EXPORT_FILE_NAME},
    views::{
        edit::{self, DeleteOutcome, FormView},
        plot::{plot_view, PlotMode, PlotView},
        table::{table_view, TableView},
    },
};
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use rand::{rngs::StdRng, SeedableRng};
use serde::{de, Deserialize, Deserializer, Serialize};
use serde_json::{json, Map, Value as JsonValue};
use std::{future::IntoFuture, sync::Arc};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

pub struct Server {
    config: Arc<AppConfig>,
    state: AppState,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterTarget {
    #[default]
    Table,
    Plot,
}

#[derive(Debug, Default, Deserialize)]
struct FilterParams {
    #[serde(default)]
    target: FilterTarget,
}

/// Query flags arrive as `1`/`0` from page state and as `true`/`false` from clients.
fn query_flag<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Ok(true),
        "" | "0" | "false" | "off" | "no" => Ok(false),
        other => Err(de::Error::invalid_value(
            de::Unexpected::Str(other),
            &"a boolean flag (1, 0, true or false)",
        )),
    }
}

#[derive(Debug, Default, Deserialize)]
struct FormParams {
    #[serde(default)]
    id: Option<i64>,
    #[serde(default, deserialize_with = "query_flag")]
    show_validation: bool,
}

#[derive(Debug, Default, Deserialize)]
struct PlotParams {
    #[serde(default)]
    mode: Option<PlotMode>,
    #[serde(default, deserialize_with = "query_flag")]
    show_validation: bool,
}

#[derive(Debug, Default, Deserialize)]
struct DeleteParams {
    #[serde(default, deserialize_with = "query_flag")]
    confirm: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct MenuTool {
    pub title: &'static str,
    pub path: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct MenuView {
    pub groups: Vec<MenuGroup>,
    pub tools: Vec<MenuTool>,
}

const TOOLS: &[MenuTool] = &[
    MenuTool {
        title: "Export database",
        path: "/api/export",
    },
    MenuTool {
        title: "Import database",
        path: "/api/import",
    },
    MenuTool {
        title: "Schema DDL",
        path: "/api/schema/ddl",
    },
    MenuTool {
        title: "Entity-relationship model",
        path: "/api/schema/mer",
    },
    MenuTool {
        title: "Readings dataset",
        path: "/api/dataset/readings",
    },
    MenuTool {
        title: "Generate sample readings",
        path: "/api/generator/readings",
    },
];

impl Server {
    pub async fn new(config: AppConfig) -> anyhow::Result<Self> {
        let pool = db::connect_pool(&config).await?;
        let registry = catalog::registry();
        if config.auto_migrate {
            db::bootstrap_schema(&pool, &registry).await?;
        }
        let store: Arc<dyn Persistable> = Arc::new(PgStore::new(pool));
        Ok(Self::with_store(config, registry, store))
    }

    /// Server over an already built store.
    pub fn with_store(config: AppConfig, registry: Registry, store: Arc<dyn Persistable>) -> Self {
        let config = Arc::new(config);
        let state = AppState::new(Arc::clone(&config), Arc::new(registry), store);
        Self { config, state }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/healthz", get(Self::health))
            .route("/api/menu", get(Self::menu))
            .route("/api/types/:table/table", get(Self::table))
            .route(
                "/api/types/:table/filters",
                post(Self::apply_filters).delete(Self::clear_filters),
            )
            .route("/api/types/:table/form", get(Self::form))
            .route("/api/types/:table/records", post(Self::create_record))
            .route(
                "/api/types/:table/records/:id",
                get(Self::get_record)
                    .put(Self::update_record)
                    .delete(Self::delete_record),
            )
            .route("/api/types/:table/plot", get(Self::plot))
            .route("/api/export", get(Self::export))
            .route("/api/import/preview", post(Self::import_preview))
            .route("/api/import", post(Self::import))
            .route("/api/schema/ddl", get(Self::schema_ddl))
            .route("/api/schema/mer", get(Self::schema_mer))
            .route("/api/dataset/readings", get(Self::readings_dataset))
            .route("/api/generator/readings", post(Self::generate_readings))
            .with_state(self.state.clone())
            .layer(DefaultBodyLimit::max(self.config.max_upload_bytes))
            .layer(TraceLayer::new_for_http())
    }

    pub fn ingest_router(&self) -> Router {
        ingest::router(self.state.clone())
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let addr = self.config.listen_addr;
        let listener = TcpListener::bind(addr).await?;
        info!(%addr, "dashboard listening");
        let dashboard = axum::serve(listener, self.router()).into_future();

        if !self.config.ingest_enabled {
            dashboard.await?;
            return Ok(());
        }

        let ingest_addr = self.config.ingest_addr;
        let ingest_listener = TcpListener::bind(ingest_addr).await?;
        info!(addr = %ingest_addr, "ingestion API listening");
        let ingest = tokio::spawn(axum::serve(ingest_listener, self.ingest_router()).into_future());

        tokio::select! {
            result = dashboard => result?,
            result = ingest => result??,
        }
        Ok(())
    }

    async fn health() -> Json<serde_json::Value> {
        Json(json!({ "status": "ok" }))
    }

    async fn menu(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<MenuView>> {
        enforce_api_key(&headers, &state.config)?;
        Ok(Json(MenuView {
            groups: state.registry.menu(),
            tools: TOOLS.to_vec(),
        }))
    }

    async fn table(
        State(state): State<AppState>,
        headers: HeaderMap,
        Path(table): Path<String>,
        Query(nav): Query<NavState>,
    ) -> Result<Json<TableView>> {
        enforce_api_key(&headers, &state.config)?;
        let ty = state.registry.get(&table)?;
        let view = table_view(
            &state.registry,
            state.store.as_ref(),
            ty,
            &nav,
            state.config.items_per_page,
        )
        .await?;
        Ok(Json(view))
    }

    async fn apply_filters(
        State(state): State<AppState>,
        headers: HeaderMap,
        Path(table): Path<String>,
        Query(nav): Query<NavState>,
        Query(params): Query<FilterParams>,
        Json(inputs): Json<Map<String, JsonValue>>,
    ) -> Result<Json<NavState>> {
        enforce_api_key(&headers, &state.config)?;
        let ty = state.registry.get(&table)?;
        let templates = match params.target {
            FilterTarget::Table => None,
            FilterTarget::Plot => Some(plot::spec_for(ty)?.filters),
        };
        let filters = QueryFilters::new(ty, templates, &nav)?;
        let updated = filters.submit(&inputs, Utc::now().naive_utc())?;

        let mut next = QueryFilters::apply(&nav, &updated);
        // A new filter set starts from the first page.
        next.offset = None;
        Ok(Json(next))
    }

    async fn clear_filters(
        State(state): State<AppState>,
        headers: HeaderMap,
        Path(table): Path<String>,
        Query(nav): Query<NavState>,
    ) -> Result<Json<NavState>> {
        enforce_api_key(&headers, &state.config)?;
        state.registry.get(&table)?;
        let mut next = QueryFilters::clear(&nav);
        next.offset = None;
        Ok(Json(next))
    }

    async fn form(
        State(state): State<AppState>,
        headers: HeaderMap,
        Path(table): Path<String>,
        Query(params): Query<FormParams>,
    ) -> Result<Json<FormView>> {
        enforce_api_key(&headers, &state.config)?;
        let ty = state.registry.get(&table)?;
        let view = edit::form_view(
            &state.registry,
            state.store.as_ref(),
            ty,
            params.id,
            params.show_validation,
        )
        .await?;
        Ok(Json(view))
    }

    async fn get_record(
        State(state): State<AppState>,
        headers: HeaderMap,
        Path((table, id)): Path<(String, i64)>,
    ) -> Result<Json<JsonValue>> {
        enforce_api_key(&headers, &state.config)?;
        let ty = state.registry.get(&table)?;
        let record = state
            .store
            .get(ty, id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("{} {id}", ty.table)))?;
        Ok(Json(record.to_json()))
    }

    async fn create_record(
        State(state): State<AppState>,
        headers: HeaderMap,
        Path(table): Path<String>,
        Json(inputs): Json<Map<String, JsonValue>>,
    ) -> Result<(StatusCode, Json<JsonValue>)> {
        enforce_api_key(&headers, &state.config)?;
        let ty = state.registry.get(&table)?;
        let saved = edit::save(state.store.as_ref(), ty, None, &inputs, Utc::now().naive_utc()).await?;
        Ok((StatusCode::CREATED, Json(saved.to_json())))
    }

    async fn update_record(
        State(state): State<AppState>,
        headers: HeaderMap,
        Path((table, id)): Path<(String, i64)>,
        Json(inputs): Json<Map<String, JsonValue>>,
    ) -> Result<Json<JsonValue>> {
        enforce_api_key(&headers, &state.config)?;
        let ty = state.registry.get(&table)?;
        let saved = edit::save(
            state.store.as_ref(),
            ty,
            Some(id),
            &inputs,
            Utc::now().naive_utc(),
        )
        .await?;
        Ok(Json(saved.to_json()))
    }

    async fn delete_record(
        State(state): State<AppState>,
        headers: HeaderMap,
        Path((table, id)): Path<(String, i64)>,
        Query(params): Query<DeleteParams>,
    ) -> Result<Json<DeleteOutcome>> {
        enforce_api_key(&headers, &state.config)?;
        let ty = state.registry.get(&table)?;
        let outcome = edit::delete(state.store.as_ref(), ty, id, params.confirm).await?;
        Ok(Json(outcome))
    }

    async fn plot(
        State(state): State<AppState>,
        headers: HeaderMap,
        Path(table): Path<String>,
        Query(nav): Query<NavState>,
        Query(params): Query<PlotParams>,
    ) -> Result<Json<PlotView>> {
        enforce_api_key(&headers, &state.config)?;
        let ty = state.registry.get(&table)?;
        let mut rng = StdRng::from_entropy();
        let view = plot_view(
            &state.registry,
            state.store.as_ref(),
            ty,
            &nav,
            params.mode,
            params.show_validation,
            Utc::now().naive_utc(),
            &mut rng,
        )
        .await?;
        Ok(Json(view))
    }

    async fn export(State(state): State<AppState>, headers: HeaderMap) -> Result<Response> {
        enforce_api_key(&headers, &state.config)?;
        let archive = transfer::export_archive(&state.registry, state.store.as_ref()).await?;
        info!(bytes = archive.len(), "database exported");
        let headers = [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{EXPORT_FILE_NAME}\""),
            ),
        ];
        Ok((headers, archive).into_response())
    }

    async fn import_preview(
        State(state): State<AppState>,
        headers: HeaderMap,
        body: Bytes,
    ) -> Result<Json<Vec<TablePreview>>> {
        enforce_api_key(&headers, &state.config)?;
        let tables = transfer::read_archive(&state.registry, &body)?;
        Ok(Json(transfer::preview(&tables)))
    }

    async fn import(
        State(state): State<AppState>,
        headers: HeaderMap,
        body: Bytes,
    ) -> Result<Json<ImportSummary>> {
        enforce_api_key(&headers, &state.config)?;
        let tables = transfer::read_archive(&state.registry, &body)?;
        let summary = transfer::import_archive(state.store.as_ref(), &tables).await?;
        Ok(Json(summary))
    }

    async fn schema_ddl(State(state): State<AppState>, headers: HeaderMap) -> Result<String> {
        enforce_api_key(&headers, &state.config)?;
        Ok(ddl::schema_script(&state.registry))
    }

    async fn schema_mer(State(state): State<AppState>, headers: HeaderMap) -> Result<String> {
        enforce_api_key(&headers, &state.config)?;
        Ok(ddl::entity_relationship(&state.registry))
    }

    async fn readings_dataset(
        State(state): State<AppState>,
        headers: HeaderMap,
    ) -> Result<Json<ReadingsDataset>> {
        enforce_api_key(&headers, &state.config)?;
        let dataset = dataset::readings_dataset(state.store.as_ref()).await?;
        Ok(Json(dataset))
    }

    async fn generate_readings(
        State(state): State<AppState>,
        headers: HeaderMap,
        Json(request): Json<GenerationRequest>,
    ) -> Result<(StatusCode, Json<Vec<GeneratedSeries>>)> {
        enforce_api_key(&headers, &state.config)?;
        let mut rng = StdRng::from_entropy();
        let summary = generator::generate(state.store.as_ref(), &request, &mut rng).await?;
        Ok((StatusCode::CREATED, Json(summary)))
    }
}

fn enforce_api_key(headers: &HeaderMap, config: &AppConfig) -> Result<()> {
    if let Some(expected) = &config.api_key {
        let provided = headers
            .get("x-api-key")
            .and_then(|value| value.to_str().ok());

        if provided != Some(expected.as_str()) {
            return Err(ServiceError::Auth);
        }
    }

    Ok(())
}

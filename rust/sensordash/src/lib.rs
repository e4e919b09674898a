pub mod config;
pub mod dataset;
pub mod db;
pub mod error;
pub mod filter;
pub mod form;
pub mod generator;
pub mod ingest;
pub mod nav;
pub mod plot;
pub mod query_filters;
pub mod record;
pub mod server;
pub mod state;
pub mod store;
pub mod telemetry;
pub mod transfer;
pub mod views;

use crate::{config::AppConfig, server::Server};

/// Bootstraps the dashboard and ingestion listeners using environment configuration.
pub async fn run() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    Server::new(config).await?.run().await
}

use anyhow::{Context, Result};
use serde::Deserialize;
use std::{
    env,
    net::{SocketAddr, ToSocketAddrs},
};

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub listen_addr: SocketAddr,
    pub ingest_addr: SocketAddr,
    pub ingest_enabled: bool,
    pub database_url: String,
    pub max_pool_size: u32,
    pub api_key: Option<String>,
    pub items_per_page: usize,
    pub auto_migrate: bool,
    pub max_upload_bytes: usize,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    sensordash_listen_addr: Option<String>,
    #[serde(default)]
    sensordash_listen_host: Option<String>,
    #[serde(default)]
    sensordash_listen_port: Option<u16>,
    #[serde(default)]
    sensordash_ingest_addr: Option<String>,
    #[serde(default = "default_true")]
    sensordash_ingest_enabled: bool,
    #[serde(default)]
    sensordash_database_url: Option<String>,
    #[serde(default)]
    database_url: Option<String>,
    #[serde(default = "default_pool_size")]
    sensordash_max_pool_size: u32,
    #[serde(default)]
    sensordash_api_key: Option<String>,
    #[serde(default = "default_items_per_page")]
    sensordash_items_per_page: usize,
    #[serde(default = "default_true")]
    sensordash_auto_migrate: bool,
    #[serde(default = "default_max_upload_bytes")]
    sensordash_max_upload_bytes: usize,
}

const fn default_true() -> bool {
    true
}

const fn default_pool_size() -> u32 {
    10
}

const fn default_items_per_page() -> usize {
    50
}

const fn default_max_upload_bytes() -> usize {
    32 * 1024 * 1024
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let raw: RawConfig =
            envy::from_env().context("failed to parse SENSORDASH_* environment variables")?;

        let listen_addr = resolve_addr(
            raw.sensordash_listen_addr,
            raw.sensordash_listen_host,
            raw.sensordash_listen_port,
        )?;

        let ingest_addr = raw
            .sensordash_ingest_addr
            .unwrap_or_else(|| "0.0.0.0:8180".to_string())
            .to_socket_addrs()
            .context("invalid SENSORDASH_INGEST_ADDR value")?
            .next()
            .context("SENSORDASH_INGEST_ADDR resolved to no addresses")?;

        let database_url = raw
            .sensordash_database_url
            .or(raw.database_url)
            .or_else(|| env::var("DATABASE_URL").ok())
            .context("SENSORDASH_DATABASE_URL or DATABASE_URL must be set")?;

        Ok(Self {
            listen_addr,
            ingest_addr,
            ingest_enabled: raw.sensordash_ingest_enabled,
            database_url,
            max_pool_size: raw.sensordash_max_pool_size.max(1),
            api_key: raw.sensordash_api_key.filter(|key| !key.trim().is_empty()),
            items_per_page: raw.sensordash_items_per_page.max(1),
            auto_migrate: raw.sensordash_auto_migrate,
            max_upload_bytes: raw.sensordash_max_upload_bytes.max(1024),
        })
    }
}

fn resolve_addr(
    addr: Option<String>,
    host: Option<String>,
    port: Option<u16>,
) -> Result<SocketAddr> {
    if let Some(addr) = addr {
        return addr
            .to_socket_addrs()
            .context("invalid SENSORDASH_LISTEN_ADDR value")?
            .next()
            .context("SENSORDASH_LISTEN_ADDR resolved to no addresses");
    }

    let host = host.unwrap_or_else(|| "0.0.0.0".to_string());
    let port = port.unwrap_or(8501);
    let combined = format!("{}:{}", host, port);
    combined
        .to_socket_addrs()
        .context("invalid dashboard listen host/port combination")?
        .next()
        .context("listen address resolved to no targets")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_and_port_fall_back_to_dashboard_defaults() {
        let addr = resolve_addr(None, None, None).expect("default address should resolve");
        assert_eq!(addr, SocketAddr::from(([0, 0, 0, 0], 8501)));
    }

    #[test]
    fn explicit_listen_addr_wins_over_host_and_port() {
        let addr = resolve_addr(
            Some("127.0.0.1:9000".to_string()),
            Some("10.0.0.1".to_string()),
            Some(1),
        )
        .expect("explicit address should resolve");
        assert_eq!(addr, SocketAddr::from(([127, 0, 0, 1], 9000)));
    }
}

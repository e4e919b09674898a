use crate::{config::AppConfig, record::{ddl, Registry}};
use anyhow::{Context, Result};
use diesel_async::{
    pooled_connection::{bb8::Pool, AsyncDieselConnectionManager},
    AsyncPgConnection, SimpleAsyncConnection,
};
use tracing::{error, info};

pub type PgPool = Pool<AsyncPgConnection>;

pub async fn connect_pool(config: &AppConfig) -> Result<PgPool> {
    let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new(&config.database_url);
    let pool = Pool::builder()
        .max_size(config.max_pool_size)
        .build(manager)
        .await
        .context("failed to build PostgreSQL connection pool")?;

    // One-time connectivity check so bad credentials show up at startup.
    match pool.get().await {
        Ok(_) => info!("database connectivity check succeeded"),
        Err(err) => error!(error = ?err, "initial database connectivity check failed"),
    }

    Ok(pool)
}

/// Creates any missing tables for the registered record types.
pub async fn bootstrap_schema(pool: &PgPool, registry: &Registry) -> Result<()> {
    let script = ddl::schema_script(registry);
    let mut conn = pool
        .get()
        .await
        .context("failed to acquire connection for schema bootstrap")?;
    conn.batch_execute(&script)
        .await
        .context("failed to apply schema DDL")?;
    info!(tables = registry.types().len(), "schema bootstrap complete");
    Ok(())
}

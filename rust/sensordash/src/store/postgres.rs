//! Postgres-backed `Persistable` over the bb8 pool.

use super::{sql, sql::Statement, Persistable, RecordQuery, StoreError, StoreResult, Transaction};
use crate::{
    db::PgPool,
    filter::Predicate,
    record::{Describable, FieldKind, Record, RecordType, Value},
};
use async_trait::async_trait;
use diesel::pg::Pg;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel::sql_query;
use diesel::sql_types::{BigInt, Text};
use diesel::QueryableByName;
use diesel_async::{
    pooled_connection::bb8::PooledConnection, AnsiTransactionManager, AsyncPgConnection,
    RunQueryDsl, TransactionManager,
};
use serde_json::{Map, Value as JsonValue};
use std::{
    future::Future,
    ops::{Deref, DerefMut},
    pin::Pin,
};
use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

#[derive(QueryableByName)]
struct JsonRow {
    #[diesel(sql_type = Text)]
    data: String,
}

#[derive(QueryableByName)]
struct CountRow {
    #[diesel(sql_type = BigInt)]
    total: i64,
}

#[derive(QueryableByName)]
struct IdRow {
    #[diesel(sql_type = BigInt)]
    id: i64,
}

/// Maps driver errors onto the categories callers recover from.
pub fn classify(err: DieselError) -> StoreError {
    match err {
        DieselError::NotFound => StoreError::NotFound,
        DieselError::DatabaseError(kind, info) => {
            let message = info.message().to_string();
            match kind {
                DatabaseErrorKind::UniqueViolation => StoreError::UniqueViolation(
                    info.constraint_name().map(str::to_string).unwrap_or(message),
                ),
                DatabaseErrorKind::ClosedConnection | DatabaseErrorKind::SerializationFailure => {
                    StoreError::Transient(message)
                }
                _ => StoreError::Database(message),
            }
        }
        DieselError::BrokenTransactionManager => {
            StoreError::Transient("broken transaction manager".to_string())
        }
        other => StoreError::Database(other.to_string()),
    }
}

fn boxed(statement: &Statement) -> diesel::query_builder::BoxedSqlQuery<'static, Pg, diesel::query_builder::SqlQuery> {
    let mut query = sql_query(statement.sql.clone()).into_boxed::<Pg>();
    for bind in &statement.binds {
        query = bind.apply(query);
    }
    query
}

/// Rebuilds a typed record from one `row_to_json` object.
fn decode_row(ty: &'static RecordType, raw: &str) -> StoreResult<Record> {
    let object: Map<String, JsonValue> =
        serde_json::from_str(raw).map_err(|err| StoreError::Decode(err.to_string()))?;
    let mut record = Record::new(ty);
    for field in ty.fields() {
        let cell = object.get(field.name).unwrap_or(&JsonValue::Null);
        let value = match (&field.kind, cell) {
            // `encode(.., 'base64')` output, possibly wrapped across lines.
            (FieldKind::Blob { .. }, JsonValue::String(text)) => {
                crate::record::value::decode_blob(text)
                    .map(Value::Blob)
                    .ok_or_else(|| StoreError::Decode(format!("{}.{}", ty.table, field.name)))?
            }
            _ => Value::from_json(field, cell).map_err(|err| StoreError::Decode(err.to_string()))?,
        };
        record
            .set(field.name, value)
            .map_err(|err| StoreError::Decode(err.to_string()))?;
    }
    Ok(record)
}

async fn load_records(
    conn: &mut AsyncPgConnection,
    ty: &'static RecordType,
    statement: &Statement,
) -> StoreResult<Vec<Record>> {
    debug!(table = ty.table, sql = %statement.sql, "loading records");
    let rows: Vec<JsonRow> = boxed(statement).load(conn).await.map_err(classify)?;
    rows.iter().map(|row| decode_row(ty, &row.data)).collect()
}

async fn insert_returning(conn: &mut AsyncPgConnection, statement: &Statement, record: &Record) -> StoreResult<Record> {
    let row: IdRow = boxed(statement).get_result(conn).await.map_err(classify)?;
    let mut stored = record.clone();
    stored.set_id(row.id);
    Ok(stored)
}

type WriteFuture<'c, T> = Pin<Box<dyn Future<Output = StoreResult<T>> + Send + 'c>>;

enum Backend {
    Pool(PgPool),
    Held(Mutex<PooledConnection<'static, AsyncPgConnection>>),
}

enum ConnGuard<'a> {
    Pooled(PooledConnection<'a, AsyncPgConnection>),
    Held(MutexGuard<'a, PooledConnection<'static, AsyncPgConnection>>),
}

impl Deref for ConnGuard<'_> {
    type Target = AsyncPgConnection;

    fn deref(&self) -> &Self::Target {
        match self {
            ConnGuard::Pooled(conn) => conn,
            ConnGuard::Held(conn) => conn,
        }
    }
}

impl DerefMut for ConnGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match self {
            ConnGuard::Pooled(conn) => &mut *conn,
            ConnGuard::Held(conn) => &mut *conn,
        }
    }
}

/// Pool-backed store. `begin` hands out a store pinned to one connection
/// with an open transaction; each write inside it runs under a savepoint so
/// a failed statement leaves the surrounding transaction usable.
pub struct PgStore {
    backend: Backend,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            backend: Backend::Pool(pool),
        }
    }

    async fn conn(&self) -> StoreResult<ConnGuard<'_>> {
        match &self.backend {
            Backend::Pool(pool) => pool
                .get()
                .await
                .map(ConnGuard::Pooled)
                .map_err(|err| StoreError::Pool(err.to_string())),
            Backend::Held(conn) => Ok(ConnGuard::Held(conn.lock().await)),
        }
    }

    /// Runs one write atomically: a plain transaction on a pooled
    /// connection, a savepoint inside an open unit of work.
    async fn write<T>(
        &self,
        statement: Statement,
        run: impl for<'c> FnOnce(&'c mut AsyncPgConnection, Statement) -> WriteFuture<'c, T>,
    ) -> StoreResult<T> {
        let mut conn = self.conn().await?;
        AnsiTransactionManager::begin_transaction(&mut *conn)
            .await
            .map_err(classify)?;
        match run(&mut *conn, statement).await {
            Ok(value) => {
                AnsiTransactionManager::commit_transaction(&mut *conn)
                    .await
                    .map_err(classify)?;
                Ok(value)
            }
            Err(err) => {
                AnsiTransactionManager::rollback_transaction(&mut *conn)
                    .await
                    .map_err(classify)?;
                Err(err)
            }
        }
    }
}

#[async_trait]
impl Persistable for PgStore {
    async fn list(&self, ty: &'static RecordType, query: &RecordQuery) -> StoreResult<Vec<Record>> {
        let statement = sql::select(ty, query);
        let mut conn = self.conn().await?;
        load_records(&mut conn, ty, &statement).await
    }

    async fn count(&self, ty: &'static RecordType, predicates: &[Predicate]) -> StoreResult<i64> {
        let statement = sql::count(ty, predicates);
        let mut conn = self.conn().await?;
        let row: CountRow = boxed(&statement)
            .get_result(&mut *conn)
            .await
            .map_err(classify)?;
        Ok(row.total)
    }

    async fn get(&self, ty: &'static RecordType, id: i64) -> StoreResult<Option<Record>> {
        let statement = sql::select_by_id(ty, id);
        let mut conn = self.conn().await?;
        Ok(load_records(&mut conn, ty, &statement).await?.into_iter().next())
    }

    async fn insert(&self, record: &Record) -> StoreResult<Record> {
        let owned = record.clone();
        self.write(sql::insert(record), move |conn, statement| {
            Box::pin(async move { insert_returning(conn, &statement, &owned).await })
        })
        .await
    }

    async fn update(&self, record: &Record) -> StoreResult<Record> {
        let id = record.id().ok_or(StoreError::NotFound)?;
        let affected = self
            .write(sql::update(record, id), |conn, statement| {
                Box::pin(async move { boxed(&statement).execute(conn).await.map_err(classify) })
            })
            .await?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(record.clone())
    }

    async fn merge(&self, record: &Record) -> StoreResult<Record> {
        let owned = record.clone();
        self.write(sql::merge(record), move |conn, statement| {
            Box::pin(async move { insert_returning(conn, &statement, &owned).await })
        })
        .await
    }

    async fn delete(&self, ty: &'static RecordType, id: i64) -> StoreResult<bool> {
        let affected = self
            .write(sql::delete(ty, id), |conn, statement| {
                Box::pin(async move { boxed(&statement).execute(conn).await.map_err(classify) })
            })
            .await?;
        Ok(affected > 0)
    }

    async fn resync_identities(&self, types: &[&'static RecordType]) -> StoreResult<()> {
        for ty in types {
            self.write(sql::resync_identity(ty), |conn, statement| {
                Box::pin(async move { boxed(&statement).execute(conn).await.map_err(classify) })
            })
            .await?;
            debug!(table = ty.table, "identity sequence resynchronised");
        }
        Ok(())
    }

    async fn begin(&self) -> StoreResult<Box<dyn Transaction>> {
        let Backend::Pool(pool) = &self.backend else {
            return Err(StoreError::Database(
                "nested transactions are not supported".into(),
            ));
        };
        let mut conn = pool
            .get_owned()
            .await
            .map_err(|err| StoreError::Pool(err.to_string()))?;
        AnsiTransactionManager::begin_transaction(&mut *conn)
            .await
            .map_err(classify)?;
        Ok(Box::new(PgStore {
            backend: Backend::Held(Mutex::new(conn)),
        }))
    }
}

#[async_trait]
impl Transaction for PgStore {
    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        AnsiTransactionManager::commit_transaction(&mut *conn)
            .await
            .map_err(classify)
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        AnsiTransactionManager::rollback_transaction(&mut *conn)
            .await
            .map_err(classify)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::catalog;

    #[test]
    fn decodes_row_to_json_output() {
        let raw = r#"{"id": 5, "sensor_id": 2, "data_leitura": "2025-04-01T09:15:00", "valor": 42.0}"#;
        let record = decode_row(&catalog::LEITURA_SENSOR, raw).expect("row decodes");
        assert_eq!(record.id(), Some(5));
        assert_eq!(record.get("valor"), &Value::Real(42.0));
        assert!(record.get("data_leitura").as_timestamp().is_some());
    }

    #[test]
    fn decodes_wrapped_base64_blobs() {
        let raw = "{\"id\": 1, \"nome\": \"x\", \"ligado\": true, \"foto\": \"aG\\nk=\"}";
        let record = decode_row(&catalog::fixtures::GADGET, raw).expect("row decodes");
        assert_eq!(record.get("foto"), &Value::Blob(b"hi".to_vec()));
        assert_eq!(record.get("manual"), &Value::Null);
    }
}

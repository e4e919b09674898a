//! Storage seam: every view, the importer and the ingestion handlers talk
//! to a `Persistable` rather than to a concrete database.

pub mod memory;
pub mod postgres;
pub mod sql;

use crate::{
    filter::Predicate,
    plot::OrderBy,
    record::{Record, RecordType},
};
use async_trait::async_trait;
use thiserror::Error;

pub use memory::MemoryStore;
pub use postgres::PgStore;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum StoreError {
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("transient database failure: {0}")]
    Transient(String),

    #[error("record not found")]
    NotFound,

    #[error("database error: {0}")]
    Database(String),

    #[error("connection pool error: {0}")]
    Pool(String),

    #[error("failed to decode row: {0}")]
    Decode(String),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordQuery {
    pub predicates: Vec<Predicate>,
    pub order_by: Vec<OrderBy>,
    pub limit: Option<i64>,
    pub offset: i64,
}

impl RecordQuery {
    /// Every row, oldest identity first.
    pub fn all() -> Self {
        Self {
            order_by: vec![OrderBy::asc("id")],
            ..Self::default()
        }
    }

    pub fn filtered(predicates: Vec<Predicate>) -> Self {
        Self {
            predicates,
            ..Self::all()
        }
    }

    pub fn order(mut self, order_by: &[OrderBy]) -> Self {
        self.order_by = order_by.to_vec();
        self
    }

    pub fn page(mut self, limit: i64, offset: i64) -> Self {
        self.limit = Some(limit.max(0));
        self.offset = offset.max(0);
        self
    }
}

#[async_trait]
pub trait Persistable: Send + Sync {
    async fn list(&self, ty: &'static RecordType, query: &RecordQuery) -> StoreResult<Vec<Record>>;

    async fn count(&self, ty: &'static RecordType, predicates: &[Predicate]) -> StoreResult<i64>;

    async fn get(&self, ty: &'static RecordType, id: i64) -> StoreResult<Option<Record>>;

    /// Inserts `record`, honouring an explicit identity when one is set.
    async fn insert(&self, record: &Record) -> StoreResult<Record>;

    /// Overwrites the row with the record's identity; `NotFound` if absent.
    async fn update(&self, record: &Record) -> StoreResult<Record>;

    /// Upsert keyed by identity.
    async fn merge(&self, record: &Record) -> StoreResult<Record>;

    async fn delete(&self, ty: &'static RecordType, id: i64) -> StoreResult<bool>;

    /// Moves each type's identity generator one past the current maximum.
    async fn resync_identities(&self, types: &[&'static RecordType]) -> StoreResult<()>;

    /// Opens a unit of work; dropping it without `commit` discards its writes.
    async fn begin(&self) -> StoreResult<Box<dyn Transaction>>;
}

#[async_trait]
pub trait Transaction: Persistable {
    async fn commit(self: Box<Self>) -> StoreResult<()>;

    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}

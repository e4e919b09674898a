//! In-process `Persistable` with the same identity and uniqueness rules as
//! the Postgres schema. Backs the test suites and dry runs.

use super::{Persistable, RecordQuery, StoreError, StoreResult, Transaction};
use crate::{
    filter::Predicate,
    record::{Describable, Record, RecordType},
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::{
    cmp::Ordering,
    collections::{BTreeMap, HashMap, VecDeque},
    sync::Arc,
};

#[derive(Debug, Clone, Default)]
struct Table {
    rows: BTreeMap<i64, Record>,
    /// Next generated identity. Explicit identities do not advance it.
    next_id: i64,
}

/// A row-level write made inside a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Write {
    Put(&'static str, i64),
    Remove(&'static str, i64),
    Resync(&'static str),
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    tables: HashMap<&'static str, Table>,
    failures: VecDeque<StoreError>,
    /// Present only inside a transaction.
    journal: Option<Vec<Write>>,
}

impl MemoryState {
    fn record(&mut self, write: Write) {
        if let Some(journal) = self.journal.as_mut() {
            journal.push(write);
        }
    }

    fn table(&mut self, ty: &RecordType) -> &mut Table {
        self.tables.entry(ty.table).or_insert_with(|| Table {
            rows: BTreeMap::new(),
            next_id: 1,
        })
    }

    fn take_failure(&mut self) -> StoreResult<()> {
        match self.failures.pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    parent: Option<Arc<Mutex<MemoryState>>>,
    /// Parent state as it was when the transaction began.
    origin: Option<Arc<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next write fail with `err`; queued failures fire in order.
    pub fn fail_next_write(&self, err: StoreError) {
        self.state.lock().failures.push_back(err);
    }

    /// Snapshot of a table ordered by identity.
    pub fn rows(&self, ty: &RecordType) -> Vec<Record> {
        self.state
            .lock()
            .tables
            .get(ty.table)
            .map(|table| table.rows.values().cloned().collect())
            .unwrap_or_default()
    }
}

fn check_unique(table: &Table, record: &Record, id: i64) -> StoreResult<()> {
    let ty = record.record_type();
    for field in ty.fields().iter().filter(|f| f.unique && !f.is_identity()) {
        let value = record.get(field.name);
        if value.is_null() {
            continue;
        }
        let clash = table
            .rows
            .iter()
            .any(|(other_id, other)| *other_id != id && other.get(field.name) == value);
        if clash {
            return Err(StoreError::UniqueViolation(format!(
                "{}.{}",
                ty.table, field.name
            )));
        }
    }
    Ok(())
}

fn compare_rows(a: &Record, b: &Record, query: &RecordQuery) -> Ordering {
    for order in &query.order_by {
        let ordering = a
            .get(order.field)
            .compare(b.get(order.field))
            .unwrap_or_else(|| a.get(order.field).is_null().cmp(&b.get(order.field).is_null()));
        let ordering = if order.ascending {
            ordering
        } else {
            ordering.reverse()
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

fn matches_all(record: &Record, predicates: &[Predicate]) -> bool {
    predicates.iter().all(|predicate| predicate.matches(record))
}

#[async_trait]
impl Persistable for MemoryStore {
    async fn list(&self, ty: &'static RecordType, query: &RecordQuery) -> StoreResult<Vec<Record>> {
        let mut state = self.state.lock();
        let mut rows: Vec<Record> = state
            .table(ty)
            .rows
            .values()
            .filter(|record| matches_all(record, &query.predicates))
            .cloned()
            .collect();
        rows.sort_by(|a, b| compare_rows(a, b, query));

        let offset = usize::try_from(query.offset).unwrap_or(0);
        let limit = query
            .limit
            .and_then(|limit| usize::try_from(limit).ok())
            .unwrap_or(usize::MAX);
        Ok(rows.into_iter().skip(offset).take(limit).collect())
    }

    async fn count(&self, ty: &'static RecordType, predicates: &[Predicate]) -> StoreResult<i64> {
        let mut state = self.state.lock();
        let total = state
            .table(ty)
            .rows
            .values()
            .filter(|record| matches_all(record, predicates))
            .count();
        Ok(total as i64)
    }

    async fn get(&self, ty: &'static RecordType, id: i64) -> StoreResult<Option<Record>> {
        Ok(self.state.lock().table(ty).rows.get(&id).cloned())
    }

    async fn insert(&self, record: &Record) -> StoreResult<Record> {
        let mut state = self.state.lock();
        state.take_failure()?;
        let ty = record.record_type();
        let table = state.table(ty);

        let id = match record.id() {
            Some(id) => id,
            None => {
                let id = table.next_id;
                table.next_id += 1;
                id
            }
        };
        if table.rows.contains_key(&id) {
            return Err(StoreError::UniqueViolation(format!("{}.id", ty.table)));
        }
        check_unique(table, record, id)?;

        let mut stored = record.clone();
        stored.set_id(id);
        table.rows.insert(id, stored.clone());
        state.record(Write::Put(ty.table, id));
        Ok(stored)
    }

    async fn update(&self, record: &Record) -> StoreResult<Record> {
        let mut state = self.state.lock();
        state.take_failure()?;
        let id = record.id().ok_or(StoreError::NotFound)?;
        let ty = record.record_type();
        let table = state.table(ty);
        if !table.rows.contains_key(&id) {
            return Err(StoreError::NotFound);
        }
        check_unique(table, record, id)?;
        table.rows.insert(id, record.clone());
        state.record(Write::Put(ty.table, id));
        Ok(record.clone())
    }

    async fn merge(&self, record: &Record) -> StoreResult<Record> {
        let mut state = self.state.lock();
        state.take_failure()?;
        let ty = record.record_type();
        let table = state.table(ty);
        let id = match record.id() {
            Some(id) => id,
            None => {
                let id = table.next_id;
                table.next_id += 1;
                id
            }
        };
        check_unique(table, record, id)?;
        let mut stored = record.clone();
        stored.set_id(id);
        table.rows.insert(id, stored.clone());
        state.record(Write::Put(ty.table, id));
        Ok(stored)
    }

    async fn delete(&self, ty: &'static RecordType, id: i64) -> StoreResult<bool> {
        let mut state = self.state.lock();
        state.take_failure()?;
        let removed = state.table(ty).rows.remove(&id).is_some();
        if removed {
            state.record(Write::Remove(ty.table, id));
        }
        Ok(removed)
    }

    async fn resync_identities(&self, types: &[&'static RecordType]) -> StoreResult<()> {
        let mut state = self.state.lock();
        for ty in types {
            let table = state.table(ty);
            table.next_id = table.rows.keys().next_back().map_or(1, |max| max + 1);
            state.record(Write::Resync(ty.table));
        }
        Ok(())
    }

    async fn begin(&self) -> StoreResult<Box<dyn Transaction>> {
        if self.parent.is_some() {
            return Err(StoreError::Database(
                "nested transactions are not supported".into(),
            ));
        }
        let origin = self.state.lock().clone();
        let mut snapshot = origin.clone();
        snapshot.journal = Some(Vec::new());
        Ok(Box::new(MemoryStore {
            state: Arc::new(Mutex::new(snapshot)),
            parent: Some(Arc::clone(&self.state)),
            origin: Some(Arc::new(origin)),
        }))
    }
}

#[async_trait]
impl Transaction for MemoryStore {
    /// Replays the journal onto the parent. A row another transaction
    /// created in the meantime under the same identity fails the commit
    /// and leaves the parent untouched.
    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let (Some(parent), Some(origin)) = (&self.parent, &self.origin) else {
            return Ok(());
        };
        let local = self.state.lock();
        let mut parent = parent.lock();
        let mut merged = parent.clone();

        for write in local.journal.iter().flatten() {
            match *write {
                Write::Put(table, id) => {
                    let Some(row) = local.tables.get(table).and_then(|t| t.rows.get(&id)) else {
                        continue;
                    };
                    let created_here = origin
                        .tables
                        .get(table)
                        .map_or(true, |t| !t.rows.contains_key(&id));
                    let target = merged.table(row.record_type());
                    if created_here && target.rows.contains_key(&id) {
                        return Err(StoreError::UniqueViolation(format!("{table}.id")));
                    }
                    check_unique(target, row, id)?;
                    target.rows.insert(id, row.clone());
                }
                Write::Remove(table, id) => {
                    if let Some(target) = merged.tables.get_mut(table) {
                        target.rows.remove(&id);
                    }
                }
                Write::Resync(_) => {}
            }
        }

        for (name, table) in &local.tables {
            let resynced = local
                .journal
                .iter()
                .flatten()
                .any(|write| *write == Write::Resync(*name));
            if let Some(target) = merged.tables.get_mut(name) {
                target.next_id = if resynced {
                    target.rows.keys().next_back().map_or(1, |max| max + 1)
                } else {
                    target.next_id.max(table.next_id)
                };
            }
        }

        let consumed = origin.failures.len().saturating_sub(local.failures.len());
        for _ in 0..consumed {
            merged.failures.pop_front();
        }
        *parent = merged;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        Ok(())
    }
}

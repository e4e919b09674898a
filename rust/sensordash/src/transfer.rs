//! Whole-database export to a ZIP of CSV tables and the matching import.

use crate::{
    error::{Result, ServiceError},
    record::{Describable, Record, RecordType, Registry, Serializable},
    store::{Persistable, RecordQuery, StoreError, StoreResult},
};
use anyhow::Context;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::io::{Cursor, Read, Write};
use tracing::{info, warn};
use zip::{result::ZipError, write::SimpleFileOptions, ZipArchive, ZipWriter};

pub const EXPORT_FILE_NAME: &str = "database_export.zip";

fn entry_name(ty: &RecordType) -> String {
    format!("{}.csv", ty.table)
}

fn write_csv(ty: &RecordType, rows: &[Record]) -> anyhow::Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(ty.fields().iter().map(|field| field.name))?;
    for row in rows {
        writer.write_record(row.to_csv_row())?;
    }
    writer
        .into_inner()
        .map_err(|err| anyhow::anyhow!("failed to flush {} csv: {}", ty.table, err.error()))
}

/// Every registered type as `<table>.csv`, rows in identity order.
pub async fn export_archive(registry: &Registry, store: &dyn Persistable) -> Result<Vec<u8>> {
    let mut zip_writer = ZipWriter::new(Cursor::new(Vec::new()));
    let zip_options =
        SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    for ty in registry.types() {
        let rows = store.list(ty, &RecordQuery::all()).await?;
        let csv = write_csv(ty, &rows)?;
        let entry = entry_name(ty);
        zip_writer
            .start_file(entry.as_str(), zip_options)
            .with_context(|| format!("failed to add '{entry}' to archive"))?;
        zip_writer
            .write_all(&csv)
            .with_context(|| format!("failed to write '{entry}' to archive"))?;
        info!(table = ty.table, rows = rows.len(), "exported table");
    }

    let finished = zip_writer
        .finish()
        .context("failed to finalize export archive")?;
    Ok(finished.into_inner())
}

/// Rows parsed for one type, ready to be persisted.
#[derive(Debug, Clone)]
pub struct TableImport {
    pub ty: &'static RecordType,
    pub records: Vec<Record>,
}

fn parse_csv(ty: &'static RecordType, reader: impl Read) -> Result<Vec<Record>> {
    let invalid = |reason: String| ServiceError::InvalidRequest(format!("{}: {reason}", entry_name(ty)));

    let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(reader);
    let headers: Vec<String> = reader
        .headers()
        .map_err(|err| invalid(err.to_string()))?
        .iter()
        .map(str::to_string)
        .collect();

    reader
        .records()
        .enumerate()
        .map(|(index, row)| {
            let row = row.map_err(|err| invalid(err.to_string()))?;
            let cells: Vec<String> = row.iter().map(str::to_string).collect();
            // Line 1 is the header.
            Record::from_csv_row(ty, &headers, &cells)
                .map_err(|err| invalid(format!("line {}: {err}", index + 2)))
        })
        .collect()
}

/// Parses an archive in import order. A type without a file yields no rows.
pub fn read_archive(registry: &Registry, bytes: &[u8]) -> Result<Vec<TableImport>> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))
        .map_err(|err| ServiceError::InvalidRequest(format!("invalid archive: {err}")))?;

    let mut tables = Vec::new();
    for ty in registry.import_order() {
        let records = match archive.by_name(&entry_name(ty)) {
            Ok(file) => parse_csv(ty, file)?,
            Err(ZipError::FileNotFound) => Vec::new(),
            Err(err) => {
                return Err(ServiceError::InvalidRequest(format!(
                    "failed to read {}: {err}",
                    entry_name(ty)
                )))
            }
        };
        tables.push(TableImport { ty, records });
    }
    Ok(tables)
}

#[derive(Debug, Clone, Serialize)]
pub struct TablePreview {
    pub table: &'static str,
    pub rows: usize,
    pub records: Vec<JsonValue>,
}

pub fn preview(tables: &[TableImport]) -> Vec<TablePreview> {
    tables
        .iter()
        .map(|table| TablePreview {
            table: table.ty.table,
            rows: table.records.len(),
            records: table.records.iter().map(Serializable::to_json).collect(),
        })
        .collect()
}

/// How the importer reacts to a failed save.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Upsert by identity instead.
    Merge,
    /// Repeat the same save once.
    Retry,
    Abort,
}

/// Classification of save failures during import. Only unique violations
/// and transient driver failures are recovered; other backends may raise
/// recoverable conditions this does not recognise yet.
pub fn recovery_for(err: &StoreError) -> Recovery {
    match err {
        StoreError::UniqueViolation(_) => Recovery::Merge,
        StoreError::Transient(_) => Recovery::Retry,
        _ => Recovery::Abort,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TableSummary {
    pub table: &'static str,
    pub inserted: usize,
    pub merged: usize,
    pub retried: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub tables: Vec<TableSummary>,
}

impl ImportSummary {
    pub fn total(&self) -> usize {
        self.tables
            .iter()
            .map(|table| table.inserted + table.merged + table.retried)
            .sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Saved {
    Inserted,
    Merged,
    Retried,
}

async fn save_imported<S: Persistable + ?Sized>(store: &S, record: &Record) -> StoreResult<Saved> {
    let err = match store.insert(record).await {
        Ok(_) => return Ok(Saved::Inserted),
        Err(err) => err,
    };
    match recovery_for(&err) {
        Recovery::Merge => store.merge(record).await.map(|_| Saved::Merged),
        Recovery::Retry => {
            warn!(table = record.record_type().table, error = %err, "retrying imported row");
            store.insert(record).await.map(|_| Saved::Retried)
        }
        Recovery::Abort => Err(err),
    }
}

async fn import_tables<S: Persistable + ?Sized>(
    store: &S,
    tables: &[TableImport],
) -> StoreResult<ImportSummary> {
    let mut summary = ImportSummary::default();
    for table in tables {
        let mut counts = TableSummary {
            table: table.ty.table,
            ..TableSummary::default()
        };
        for record in &table.records {
            match save_imported(store, record).await? {
                Saved::Inserted => counts.inserted += 1,
                Saved::Merged => counts.merged += 1,
                Saved::Retried => counts.retried += 1,
            }
        }
        summary.tables.push(counts);
    }

    let types: Vec<_> = tables.iter().map(|table| table.ty).collect();
    store.resync_identities(&types).await?;
    Ok(summary)
}

/// Persists parsed tables in one unit of work. Any unrecovered failure
/// rolls the whole import back.
pub async fn import_archive(store: &dyn Persistable, tables: &[TableImport]) -> Result<ImportSummary> {
    let tx = store.begin().await?;
    match import_tables(tx.as_ref(), tables).await {
        Ok(summary) => {
            tx.commit().await?;
            info!(rows = summary.total(), "import committed");
            Ok(summary)
        }
        Err(err) => {
            warn!(error = %err, "import aborted, rolling back");
            if let Err(rollback) = tx.rollback().await {
                warn!(error = %rollback, "rollback after failed import also failed");
            }
            Err(err.into())
        }
    }
}

//! Persistence module split across logical submodules.
//!
//! The free functions take a plain `&Connection` so they compose inside a
//! [`Store::with_transaction`] closure; [`Repository`] wraps each of them in
//! its own unit of work for callers that do not need to group operations.

mod connection;
mod exports;
mod materials;
mod records;

use std::sync::Arc;

use chrono::{DateTime, Datelike, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::Row;
use rust_decimal::Decimal;

pub use connection::{Store, DEFAULT_TIMEOUT};
pub use exports::{list_exports, log_export};
pub use materials::{delete_material, get_material, list_materials, upsert_material};
pub use records::{get_record, list_records, purge_records, save_record, statistics};

use crate::error::{Error, Result};
use crate::models::{CalculationRecord, ExportEntry, Material, RecordFilter, Statistics};

/// Fixed-width UTC text, so lexical order in SQLite equals time order.
pub(crate) fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Only years 0 through 9999 format to four digits; anything else would not
/// parse back and would break the ordering of the text column.
pub(crate) fn ensure_storable(ts: &DateTime<Utc>) -> Result<()> {
    if (0..=9999).contains(&ts.year()) {
        Ok(())
    } else {
        Err(Error::InvalidTimestamp(format!(
            "{ts} is outside the years 0000-9999"
        )))
    }
}

pub(crate) fn timestamp_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err)))
}

/// Decimals are stored as text to keep every digit.
pub(crate) fn decimal_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Decimal> {
    let text: String = row.get(idx)?;
    text.parse::<Decimal>()
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err)))
}

/// Repository over a shared [`Store`]. Reads use a shared connection scope,
/// writes run in their own transaction.
#[derive(Debug, Clone)]
pub struct Repository {
    store: Arc<Store>,
}

impl Repository {
    /// Repository sharing `store` with any other holder of the `Arc`.
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Underlying store, for grouping several calls in one transaction.
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// See [`get_material`].
    pub fn get_material(&self, id: &str) -> Result<Material> {
        self.store.with_connection(|conn| get_material(conn, id))
    }

    /// Every material in insertion order.
    pub fn list_materials(&self) -> Result<Vec<Material>> {
        self.store.with_connection(list_materials)
    }

    /// Validate and store `material`, replacing any material with the same id.
    pub fn upsert_material(&self, material: &Material) -> Result<Material> {
        self.store.with_transaction(|tx| upsert_material(tx, material))
    }

    /// Refused with [`crate::Error::MaterialInUse`] while records reference it.
    pub fn delete_material(&self, id: &str) -> Result<()> {
        self.store.with_transaction(|tx| delete_material(tx, id))
    }

    /// Append one record; see [`save_record`].
    pub fn save_record(&self, record: &CalculationRecord) -> Result<CalculationRecord> {
        self.store.with_transaction(|tx| save_record(tx, record))
    }

    /// Records matching `filter`, oldest first.
    pub fn list_records(&self, filter: &RecordFilter) -> Result<Vec<CalculationRecord>> {
        self.store.with_connection(|conn| list_records(conn, filter))
    }

    /// Single record by id.
    pub fn get_record(&self, id: i64) -> Result<Option<CalculationRecord>> {
        self.store.with_connection(|conn| get_record(conn, id))
    }

    /// Maintenance delete of history; returns how many rows went.
    pub fn purge_records(&self, before: Option<DateTime<Utc>>) -> Result<usize> {
        self.store.with_transaction(|tx| purge_records(tx, before))
    }

    /// Aggregates over all records, or those created at or after `since`.
    pub fn statistics(&self, since: Option<DateTime<Utc>>, precision: u32) -> Result<Statistics> {
        self.store.with_connection(|conn| statistics(conn, since, precision))
    }

    /// Up to `limit` export log rows, newest first.
    pub fn list_exports(&self, limit: usize) -> Result<Vec<ExportEntry>> {
        self.store.with_connection(|conn| list_exports(conn, limit))
    }
}

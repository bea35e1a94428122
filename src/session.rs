//! Session facade: one entry point per user-facing request. Each request is
//! independent; the only state that outlives it is what lands in the store.

use std::io::Write;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use rust_decimal::Decimal;
use tracing::{debug, info};

use crate::calculator::Calculator;
use crate::db::{self, Repository, Store};
use crate::error::{Error, Result};
use crate::export::{self, ExportFormat};
use crate::geometry::{Room, Surface};
use crate::models::{CalculationRecord, ExportEntry, Quote, RecordFilter, Statistics};

/// Pairs the repository with a calculator so one call covers lookup,
/// arithmetic and persistence. Cloning shares the same store.
#[derive(Debug, Clone)]
pub struct Session {
    repository: Repository,
    calculator: Calculator,
}

impl Session {
    /// Session over `store`, rounding with `calculator`.
    pub fn new(store: Arc<Store>, calculator: Calculator) -> Self {
        Self {
            repository: Repository::new(store),
            calculator,
        }
    }

    /// Direct access for material maintenance and raw record queries.
    pub fn repository(&self) -> &Repository {
        &self.repository
    }

    /// Calculator used by [`Session::calculate`] and [`Session::compare`].
    pub fn calculator(&self) -> &Calculator {
        &self.calculator
    }

    /// Resolve the material, compute, and persist the record in one
    /// transaction. The returned record carries its assigned id and timestamp.
    pub fn calculate(
        &self,
        material_id: &str,
        requested_quantity: Decimal,
        note: Option<String>,
    ) -> Result<CalculationRecord> {
        debug!(material = %material_id, quantity = %requested_quantity, "calculation requested");

        self.repository.store().with_transaction(|tx| {
            let material = db::get_material(tx, material_id)?;
            let estimate = self.calculator.compute(&material, requested_quantity)?;

            let record = CalculationRecord {
                id: None,
                created_at: None,
                material_id: material.id.clone(),
                requested_quantity,
                waste_factor: material.waste_factor,
                unit_cost: material.unit_cost,
                total_units: estimate.total_units,
                total_cost: estimate.total_cost,
                note: note.filter(|n| !n.trim().is_empty()),
            };
            db::save_record(tx, &record)
        })
    }

    /// Calculate for the area of one surface of `room`. Without a note the
    /// record describes the room.
    pub fn calculate_room(
        &self,
        material_id: &str,
        room: &Room,
        surface: Surface,
        note: Option<String>,
    ) -> Result<CalculationRecord> {
        let area = room.area(surface)?;
        let note = note.or_else(|| Some(room.describe(surface)));
        self.calculate(material_id, area, note)
    }

    /// Quote several materials for the same quantity, cheapest first. Nothing
    /// is persisted.
    pub fn compare(&self, material_ids: &[String], requested_quantity: Decimal) -> Result<Vec<Quote>> {
        let materials = self.repository.store().with_connection(|conn| {
            material_ids
                .iter()
                .map(|id| db::get_material(conn, id))
                .collect::<Result<Vec<_>>>()
        })?;
        self.calculator.compare(&materials, requested_quantity)
    }

    /// Saved records matching `filter`, oldest first.
    pub fn history(&self, filter: &RecordFilter) -> Result<Vec<CalculationRecord>> {
        self.repository.list_records(filter)
    }

    /// Totals over the whole history, averaged at the calculator's precision.
    pub fn statistics(&self) -> Result<Statistics> {
        self.repository.statistics(None, self.calculator.precision())
    }

    /// Totals over the records of the last `days` days.
    pub fn recent_summary(&self, days: u32) -> Result<Statistics> {
        let since = TimeDelta::try_days(i64::from(days))
            .and_then(|window| Utc::now().checked_sub_signed(window))
            .ok_or_else(|| Error::InvalidTimestamp(format!("{days} days back is out of range")))?;
        db::ensure_storable(&since)?;
        self.repository.statistics(Some(since), self.calculator.precision())
    }

    /// Write the filtered history to `writer` and log the export. The log row
    /// and the snapshot come from the same transaction, and the writer is
    /// flushed before it commits, so a failed write is never logged.
    pub fn export<W: Write>(
        &self,
        format: ExportFormat,
        filter: &RecordFilter,
        destination: &str,
        writer: W,
    ) -> Result<ExportEntry> {
        let entry = self.repository.store().with_transaction(|tx| {
            let records = db::list_records(tx, filter)?;
            export::write_records(format, &records, writer)?;
            db::log_export(tx, format.as_str(), destination, records.len())
        })?;
        info!(format = %format, destination, records = entry.record_count, "history exported");
        Ok(entry)
    }

    /// Remove records older than `before`, or all of them. Returns the number
    /// removed.
    pub fn purge(&self, before: Option<DateTime<Utc>>) -> Result<usize> {
        self.repository.purge_records(before)
    }
}

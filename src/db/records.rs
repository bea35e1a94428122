use std::collections::HashMap;

use chrono::{DateTime, SubsecRound, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, ErrorCode, Row};
use rust_decimal::{Decimal, RoundingStrategy};
use tracing::info;

use super::{decimal_column, ensure_storable, format_timestamp, materials, timestamp_column};
use crate::error::{Error, Result};
use crate::models::{CalculationRecord, MaterialUsage, RecordFilter, Statistics};

const RECORD_COLUMNS: &str = "id, created_at, material_id, requested_quantity, waste_factor, \
     unit_cost, total_units, total_cost, note";

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<CalculationRecord> {
    Ok(CalculationRecord {
        id: Some(row.get(0)?),
        created_at: Some(timestamp_column(row, 1)?),
        material_id: row.get(2)?,
        requested_quantity: decimal_column(row, 3)?,
        waste_factor: decimal_column(row, 4)?,
        unit_cost: decimal_column(row, 5)?,
        total_units: decimal_column(row, 6)?,
        total_cost: decimal_column(row, 7)?,
        note: row.get(8)?,
    })
}

/// Append a calculation record. A missing id or timestamp is assigned here;
/// timestamps are kept at microsecond precision so the stored value reads back
/// identically.
pub fn save_record(conn: &Connection, record: &CalculationRecord) -> Result<CalculationRecord> {
    if record.requested_quantity <= Decimal::ZERO {
        return Err(Error::invalid_quantity(
            record.requested_quantity,
            "quantity must be greater than zero",
        ));
    }
    materials::get_material(conn, &record.material_id)?;

    let created_at = record.created_at.unwrap_or_else(Utc::now).trunc_subsecs(6);
    ensure_storable(&created_at)?;

    conn.execute(
        "INSERT INTO calculation_records (
            id, created_at, material_id, requested_quantity, waste_factor,
            unit_cost, total_units, total_cost, note
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            record.id,
            format_timestamp(&created_at),
            record.material_id,
            record.requested_quantity.to_string(),
            record.waste_factor.to_string(),
            record.unit_cost.to_string(),
            record.total_units.to_string(),
            record.total_cost.to_string(),
            record.note,
        ],
    )
    .map_err(|err| map_foreign_key(err, &record.material_id))?;

    let saved = CalculationRecord {
        id: Some(conn.last_insert_rowid()),
        created_at: Some(created_at),
        ..record.clone()
    };
    info!(
        record = saved.id,
        material = %saved.material_id,
        total_units = %saved.total_units,
        total_cost = %saved.total_cost,
        "calculation recorded"
    );
    Ok(saved)
}

/// Records matching `filter`, oldest first.
pub fn list_records(conn: &Connection, filter: &RecordFilter) -> Result<Vec<CalculationRecord>> {
    let mut clauses = Vec::new();
    let mut values = Vec::new();

    if let Some(id) = filter.record_id {
        values.push(Value::Integer(id));
        clauses.push(format!("id = ?{}", values.len()));
    }
    if let Some(material_id) = &filter.material_id {
        values.push(Value::Text(material_id.clone()));
        clauses.push(format!("material_id = ?{}", values.len()));
    }
    if let Some(since) = &filter.since {
        values.push(Value::Text(format_timestamp(since)));
        clauses.push(format!("created_at >= ?{}", values.len()));
    }
    if let Some(until) = &filter.until {
        values.push(Value::Text(format_timestamp(until)));
        clauses.push(format!("created_at < ?{}", values.len()));
    }

    let mut sql = format!("SELECT {RECORD_COLUMNS} FROM calculation_records");
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY created_at ASC, id ASC");
    if let Some(limit) = filter.limit {
        values.push(Value::Integer(i64::try_from(limit).unwrap_or(i64::MAX)));
        sql.push_str(&format!(" LIMIT ?{}", values.len()));
    }

    let mut stmt = conn.prepare(&sql)?;
    let records = stmt
        .query_map(params_from_iter(values.iter()), record_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(records)
}

/// Single record by id, or `None` when it was never saved or has been purged.
pub fn get_record(conn: &Connection, id: i64) -> Result<Option<CalculationRecord>> {
    Ok(list_records(conn, &RecordFilter::by_id(id))?.into_iter().next())
}

/// Maintenance: drop history older than `before`, or all of it when `None`.
/// Returns the number of removed rows.
pub fn purge_records(conn: &Connection, before: Option<DateTime<Utc>>) -> Result<usize> {
    let removed = match before {
        Some(before) => conn.execute(
            "DELETE FROM calculation_records WHERE created_at < ?1",
            [format_timestamp(&before)],
        )?,
        None => conn.execute("DELETE FROM calculation_records", [])?,
    };
    info!(removed, "purged calculation records");
    Ok(removed)
}

/// Aggregate the history, or only records created at or after `since`.
/// Sums are exact; the average is rounded half-up to `precision` places. Sums
/// that leave the decimal range are an [`Error::Overflow`].
pub fn statistics(
    conn: &Connection,
    since: Option<DateTime<Utc>>,
    precision: u32,
) -> Result<Statistics> {
    let rows = match &since {
        Some(since) => {
            let mut stmt = conn.prepare(
                "SELECT material_id, total_units, total_cost FROM calculation_records
                 WHERE created_at >= ?1 ORDER BY id",
            )?;
            let rows = stmt
                .query_map([format_timestamp(since)], usage_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        }
        None => {
            let mut stmt = conn.prepare(
                "SELECT material_id, total_units, total_cost FROM calculation_records ORDER BY id",
            )?;
            let rows = stmt
                .query_map([], usage_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        }
    };

    let mut usage: HashMap<String, MaterialUsage> = HashMap::new();
    let mut total_cost = Decimal::ZERO;
    for (material_id, units, cost) in &rows {
        total_cost = checked_sum(total_cost, *cost, "total cost")?;
        let entry = usage
            .entry(material_id.clone())
            .or_insert_with(|| MaterialUsage {
                material_id: material_id.clone(),
                records: 0,
                total_units: Decimal::ZERO,
                total_cost: Decimal::ZERO,
            });
        entry.records += 1;
        entry.total_units = checked_sum(entry.total_units, *units, "units")?;
        entry.total_cost = checked_sum(entry.total_cost, *cost, "cost")?;
    }

    let mut per_material: Vec<_> = usage.into_values().collect();
    per_material.sort_by(|a, b| {
        b.records
            .cmp(&a.records)
            .then_with(|| a.material_id.cmp(&b.material_id))
    });

    let total_records = rows.len() as i64;
    let average_cost = if total_records == 0 {
        Decimal::ZERO
    } else {
        total_cost
            .checked_div(Decimal::from(total_records))
            .ok_or_else(|| Error::Overflow("average cost".into()))?
            .round_dp_with_strategy(precision, RoundingStrategy::MidpointAwayFromZero)
    };

    Ok(Statistics {
        since,
        total_records,
        total_cost,
        average_cost,
        most_used_material: per_material.first().map(|u| u.material_id.clone()),
        most_used_count: per_material.first().map_or(0, |u| u.records),
        per_material,
    })
}

fn usage_from_row(row: &Row<'_>) -> rusqlite::Result<(String, Decimal, Decimal)> {
    Ok((row.get(0)?, decimal_column(row, 1)?, decimal_column(row, 2)?))
}

fn checked_sum(acc: Decimal, value: Decimal, what: &str) -> Result<Decimal> {
    acc.checked_add(value)
        .ok_or_else(|| Error::Overflow(format!("summed {what} exceeds the decimal range")))
}

/// A foreign key failure here means the material vanished between the lookup
/// and the insert.
fn map_foreign_key(err: rusqlite::Error, material_id: &str) -> Error {
    if matches!(
        err.sqlite_error_code(),
        Some(ErrorCode::ConstraintViolation)
    ) && err.to_string().contains("FOREIGN KEY")
    {
        Error::MaterialNotFound(material_id.to_string())
    } else {
        err.into()
    }
}

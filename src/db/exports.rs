use chrono::{SubsecRound, Utc};
use rusqlite::{params, Connection};

use super::{format_timestamp, timestamp_column};
use crate::error::Result;
use crate::models::ExportEntry;

/// Remember that history was exported, and where to.
pub fn log_export(
    conn: &Connection,
    format: &str,
    destination: &str,
    record_count: usize,
) -> Result<ExportEntry> {
    let created_at = Utc::now().trunc_subsecs(6);
    let record_count = i64::try_from(record_count).unwrap_or(i64::MAX);

    conn.execute(
        "INSERT INTO export_log (created_at, format, destination, record_count)
         VALUES (?1, ?2, ?3, ?4)",
        params![format_timestamp(&created_at), format, destination, record_count],
    )?;

    Ok(ExportEntry {
        id: conn.last_insert_rowid(),
        created_at,
        format: format.to_string(),
        destination: destination.to_string(),
        record_count,
    })
}

/// Most recent exports first.
pub fn list_exports(conn: &Connection, limit: usize) -> Result<Vec<ExportEntry>> {
    let mut stmt = conn.prepare(
        "SELECT id, created_at, format, destination, record_count
         FROM export_log
         ORDER BY created_at DESC, id DESC
         LIMIT ?1",
    )?;

    let entries = stmt
        .query_map([i64::try_from(limit).unwrap_or(i64::MAX)], |row| {
            Ok(ExportEntry {
                id: row.get(0)?,
                created_at: timestamp_column(row, 1)?,
                format: row.get(2)?,
                destination: row.get(3)?,
                record_count: row.get(4)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(entries)
}

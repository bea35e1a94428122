//! Rendering of calculation history for use outside the tool.

use std::fmt;
use std::io::Write;
use std::str::FromStr;

use crate::db::format_timestamp;
use crate::error::{Error, Result};
use crate::models::CalculationRecord;

/// Output formats for history exports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
}

impl ExportFormat {
    /// Lowercase name, as accepted by `FromStr` and stored in the export log.
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExportFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            other => Err(Error::Export(format!(
                "unsupported format '{other}', expected 'json' or 'csv'"
            ))),
        }
    }
}

const CSV_HEADER: [&str; 9] = [
    "id",
    "created_at",
    "material_id",
    "requested_quantity",
    "waste_factor",
    "unit_cost",
    "total_units",
    "total_cost",
    "note",
];

/// Write `records` to `writer` in `format` and flush it. Buffered writers
/// report their failures here rather than on drop.
pub fn write_records<W: Write>(
    format: ExportFormat,
    records: &[CalculationRecord],
    writer: W,
) -> Result<()> {
    match format {
        ExportFormat::Json => write_json(records, writer),
        ExportFormat::Csv => write_csv(records, writer),
    }
}

fn write_json<W: Write>(records: &[CalculationRecord], mut writer: W) -> Result<()> {
    serde_json::to_writer_pretty(&mut writer, records)?;
    writeln!(writer).map_err(|err| Error::Export(err.to_string()))?;
    writer.flush().map_err(|err| Error::Export(err.to_string()))?;
    Ok(())
}

fn write_csv<W: Write>(records: &[CalculationRecord], writer: W) -> Result<()> {
    let mut out = csv::Writer::from_writer(writer);
    out.write_record(CSV_HEADER)?;

    for record in records {
        out.write_record([
            record.id.map(|id| id.to_string()).unwrap_or_default(),
            record
                .created_at
                .as_ref()
                .map(format_timestamp)
                .unwrap_or_default(),
            record.material_id.clone(),
            record.requested_quantity.to_string(),
            record.waste_factor.to_string(),
            record.unit_cost.to_string(),
            record.total_units.to_string(),
            record.total_cost.to_string(),
            record.note.clone().unwrap_or_default(),
        ])?;
    }

    out.flush().map_err(|err| Error::Export(err.to_string()))?;
    Ok(())
}

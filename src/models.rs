//! Domain models that mirror the SQLite schema. These stay light-weight data
//! holders; validation of the material invariants lives here so both the
//! repository and the calculator enforce the same rules.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// A material definition priced per unit of measure.
pub struct Material {
    /// Caller-chosen key, e.g. `"brick"`.
    pub id: String,
    /// Display name; must not be blank.
    pub name: String,
    /// Unit of measure the cost refers to ("m2", "kg", "piece").
    pub unit: String,
    /// Price of one `unit`. Zero is allowed for free offcuts.
    pub unit_cost: Decimal,
    /// Extra fraction ordered on top of the requested quantity.
    pub waste_factor: Decimal,
    /// Lifts the `< 1` cap on `waste_factor` for extreme-waste materials.
    pub allow_extreme_waste: bool,
}

impl Material {
    /// Build a material with no waste allowance.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        unit: impl Into<String>,
        unit_cost: Decimal,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            unit: unit.into(),
            unit_cost,
            waste_factor: Decimal::ZERO,
            allow_extreme_waste: false,
        }
    }

    /// Set the fraction ordered on top of the requested quantity, e.g. `0.1`
    /// for ten percent.
    pub fn with_waste_factor(mut self, waste_factor: Decimal) -> Self {
        self.waste_factor = waste_factor;
        self
    }

    /// Permit a waste factor of 1 or more, for materials where most of the
    /// order ends up as offcuts.
    pub fn allowing_extreme_waste(mut self) -> Self {
        self.allow_extreme_waste = true;
        self
    }

    /// Check the invariants every stored material must satisfy.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::InvalidMaterial("id must not be empty".into()));
        }
        if self.name.trim().is_empty() {
            return Err(Error::InvalidMaterial(format!(
                "name of '{}' must not be empty",
                self.id
            )));
        }
        if self.unit.trim().is_empty() {
            return Err(Error::InvalidMaterial(format!(
                "unit of '{}' must not be empty",
                self.id
            )));
        }
        if self.unit_cost < Decimal::ZERO {
            return Err(Error::InvalidMaterial(format!(
                "unit cost of '{}' must not be negative, got {}",
                self.id, self.unit_cost
            )));
        }
        if self.waste_factor < Decimal::ZERO {
            return Err(Error::InvalidMaterial(format!(
                "waste factor of '{}' must not be negative, got {}",
                self.id, self.waste_factor
            )));
        }
        if self.waste_factor >= Decimal::ONE && !self.allow_extreme_waste {
            return Err(Error::InvalidMaterial(format!(
                "waste factor of '{}' must be below 1 unless extreme waste is allowed, got {}",
                self.id, self.waste_factor
            )));
        }
        Ok(())
    }
}

impl fmt::Display for Material {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} per {})", self.name, self.unit_cost, self.unit)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// One persisted calculation. Rows are append-only: once saved, nothing in the
/// library updates them.
pub struct CalculationRecord {
    /// Assigned by the store when `None` on save.
    pub id: Option<i64>,
    /// Assigned by the store when `None` on save; kept at microsecond precision.
    pub created_at: Option<DateTime<Utc>>,
    /// Material the calculation was made for; must exist when saved.
    pub material_id: String,
    /// Quantity asked for before waste, in the material's unit.
    pub requested_quantity: Decimal,
    /// Snapshot of the material's waste factor at calculation time.
    pub waste_factor: Decimal,
    /// Snapshot of the material's unit cost at calculation time.
    pub unit_cost: Decimal,
    /// Waste-adjusted quantity to order, rounded.
    pub total_units: Decimal,
    /// `total_units` times `unit_cost`, rounded.
    pub total_cost: Decimal,
    /// Free text from the caller; blank notes are dropped.
    pub note: Option<String>,
}

impl fmt::Display for CalculationRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let id = self
            .id
            .map(|id| format!("#{id}"))
            .unwrap_or_else(|| "#new".to_string());
        write!(
            f,
            "{id} {}: {} requested, {} units, cost {}",
            self.material_id, self.requested_quantity, self.total_units, self.total_cost
        )?;
        if let Some(note) = self.note.as_deref().filter(|n| !n.is_empty()) {
            write!(f, " ({note})")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// Criteria for [`crate::db::list_records`]. Every field is optional and the
/// set ones are combined with AND.
pub struct RecordFilter {
    /// Exactly this record.
    pub record_id: Option<i64>,
    /// Only records made for this material.
    pub material_id: Option<String>,
    /// Inclusive lower bound.
    pub since: Option<DateTime<Utc>>,
    /// Exclusive upper bound.
    pub until: Option<DateTime<Utc>>,
    /// Keep at most this many of the oldest matches.
    pub limit: Option<usize>,
}

impl RecordFilter {
    /// Filter matching a single record id.
    pub fn by_id(record_id: i64) -> Self {
        Self {
            record_id: Some(record_id),
            ..Self::default()
        }
    }

    /// Filter matching every record of one material.
    pub fn by_material(material_id: impl Into<String>) -> Self {
        Self {
            material_id: Some(material_id.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Waste-adjusted quantity and its cost, both rounded.
pub struct Estimate {
    /// Requested quantity plus waste, at the calculator's scale.
    pub total_units: Decimal,
    /// Cost of `total_units`, at the calculator's scale.
    pub total_cost: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// A material paired with its estimate; produced when comparing materials.
pub struct Quote {
    pub material: Material,
    pub estimate: Estimate,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
/// Aggregates over the calculation history, or over a recent window of it.
pub struct Statistics {
    /// Start of the window; `None` covers the whole history.
    pub since: Option<DateTime<Utc>>,
    pub total_records: i64,
    /// Exact sum of every record's cost.
    pub total_cost: Decimal,
    /// Mean cost per record, rounded to the calculator's precision.
    pub average_cost: Decimal,
    /// Material with the most records; ties go to the smallest id.
    pub most_used_material: Option<String>,
    pub most_used_count: i64,
    /// Usage per material, most used first.
    pub per_material: Vec<MaterialUsage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
/// Totals for one material inside [`Statistics`].
pub struct MaterialUsage {
    pub material_id: String,
    pub records: i64,
    pub total_units: Decimal,
    pub total_cost: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
/// Row of the export log.
pub struct ExportEntry {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    /// `json` or `csv`.
    pub format: String,
    /// File path, or `stdout`.
    pub destination: String,
    /// Number of records written.
    pub record_count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
/// Size and row counts of a database file, for maintenance output.
pub struct StoreInfo {
    pub path: PathBuf,
    /// File size on disk; 0 if it cannot be read.
    pub size_bytes: u64,
    pub schema_version: i64,
    pub materials: i64,
    pub records: i64,
    pub exports: i64,
}

//! Error taxonomy shared by the store, repository, calculator and session.
//!
//! Every fallible operation in the library returns [`Result`]; the binary wraps
//! these in `anyhow` for context and prints [`Error::kind`] on failure.

use std::path::PathBuf;
use std::time::Duration;

use rust_decimal::Decimal;
use thiserror::Error;

/// Everything the library can fail with. Variants carry enough context to
/// print a useful message without the caller re-stating the request.
#[derive(Debug, Error)]
pub enum Error {
    /// The database file or its directory cannot be opened or created.
    #[error("storage unavailable at {}: {reason}", path.display())]
    StorageUnavailable { path: PathBuf, reason: String },

    /// The write guard or the database file stayed busy past the store
    /// timeout.
    #[error("storage operation timed out after {}ms", waited.as_millis())]
    StorageTimeout { waited: Duration },

    /// No material with this id exists.
    #[error("material '{0}' not found")]
    MaterialNotFound(String),

    /// A material violates its invariants (blank fields, negative cost,
    /// waste factor out of range).
    #[error("invalid material: {0}")]
    InvalidMaterial(String),

    /// The requested quantity is zero, negative or too large to compute.
    #[error("invalid quantity {quantity}: {reason}")]
    InvalidQuantity { quantity: Decimal, reason: String },

    /// Deletion is blocked while history rows still reference the material.
    #[error("material '{id}' is referenced by {records} calculation record(s)")]
    MaterialInUse { id: String, records: i64 },

    /// A created-at timestamp that cannot be stored in fixed-width form.
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("invalid dimensions: {0}")]
    InvalidDimensions(String),

    #[error("no materials given to compare")]
    NoMaterials,

    #[error("precision {0} is out of range (0..=10)")]
    InvalidPrecision(u32),

    /// A decimal result does not fit the 96-bit mantissa at the configured
    /// scale.
    #[error("arithmetic overflow: {0}")]
    Overflow(String),

    #[error("configuration error: {0}")]
    Config(String),

    /// Rendering or writing an export failed; the export is not logged.
    #[error("export failed: {0}")]
    Export(String),

    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl Error {
    /// Stable variant name, printed by the entrypoint next to the message.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::StorageUnavailable { .. } => "StorageUnavailable",
            Error::StorageTimeout { .. } => "StorageTimeout",
            Error::MaterialNotFound(_) => "MaterialNotFound",
            Error::InvalidMaterial(_) => "InvalidMaterial",
            Error::InvalidQuantity { .. } => "InvalidQuantity",
            Error::MaterialInUse { .. } => "MaterialInUse",
            Error::InvalidTimestamp(_) => "InvalidTimestamp",
            Error::InvalidDimensions(_) => "InvalidDimensions",
            Error::NoMaterials => "NoMaterials",
            Error::InvalidPrecision(_) => "InvalidPrecision",
            Error::Overflow(_) => "Overflow",
            Error::Config(_) => "Config",
            Error::Export(_) => "Export",
            Error::Sqlite(_) => "Sqlite",
        }
    }

    pub(crate) fn invalid_quantity(quantity: Decimal, reason: impl Into<String>) -> Self {
        Error::InvalidQuantity {
            quantity,
            reason: reason.into(),
        }
    }
}

impl From<csv::Error> for Error {
    fn from(err: csv::Error) -> Self {
        Error::Export(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Export(err.to_string())
    }
}

/// Result alias used throughout the library.
pub type Result<T> = std::result::Result<T, Error>;

//! Process configuration, resolved once at startup and handed to the store and
//! calculator. Nothing below `main` reads the environment.

use std::path::PathBuf;
use std::time::Duration;

use crate::calculator::{DEFAULT_PRECISION, MAX_PRECISION};
use crate::db::DEFAULT_TIMEOUT;
use crate::error::{Error, Result};

/// Environment variable naming the database file.
pub const DB_PATH_ENV: &str = "DB_PATH";
/// Environment variable with the storage timeout in milliseconds.
pub const DB_TIMEOUT_ENV: &str = "DB_TIMEOUT_MS";
/// Environment variable with the number of decimal places for results.
pub const PRECISION_ENV: &str = "CALC_PRECISION";

/// Database location used when `DB_PATH` is unset or blank, relative to the
/// working directory.
pub const DEFAULT_DB_PATH: &str = "data/materials_calculator.db";

/// Settings resolved once at startup and passed down explicitly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// SQLite file; its directory is created on open.
    pub db_path: PathBuf,
    /// Bound on waiting for the write guard or a busy file.
    pub timeout: Duration,
    /// Decimal places for units, costs and averages.
    pub precision: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            timeout: DEFAULT_TIMEOUT,
            precision: DEFAULT_PRECISION,
        }
    }
}

impl Config {
    /// Build a configuration from raw variable values, as looked up by `lookup`.
    /// Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let value = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let mut config = Config {
            db_path: resolve_db_path(value(DB_PATH_ENV)),
            ..Config::default()
        };

        if let Some(raw) = value(DB_TIMEOUT_ENV) {
            config.timeout = parse_timeout_ms(&raw)?;
        }
        if let Some(raw) = value(PRECISION_ENV) {
            config.precision = parse_precision(&raw)?;
        }

        Ok(config)
    }

    /// Read the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }
}

/// `DB_PATH` when set and non-empty, otherwise [`DEFAULT_DB_PATH`].
pub fn resolve_db_path(env_value: Option<String>) -> PathBuf {
    env_value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH))
}

/// Positive whole milliseconds.
pub fn parse_timeout_ms(raw: &str) -> Result<Duration> {
    let millis: u64 = raw
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("{DB_TIMEOUT_ENV} must be a whole number of milliseconds, got '{raw}'")))?;
    if millis == 0 {
        return Err(Error::Config(format!("{DB_TIMEOUT_ENV} must be greater than zero")));
    }
    Ok(Duration::from_millis(millis))
}

/// Whole number of decimal places, at most [`MAX_PRECISION`].
pub fn parse_precision(raw: &str) -> Result<u32> {
    let precision: u32 = raw
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("{PRECISION_ENV} must be a whole number, got '{raw}'")))?;
    if precision > MAX_PRECISION {
        return Err(Error::InvalidPrecision(precision));
    }
    Ok(precision)
}

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard, TryLockError};
use std::thread;
use std::time::{Duration, Instant};

use rusqlite::{Connection, ErrorCode, OpenFlags, Transaction, TransactionBehavior};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::models::StoreInfo;

/// Default bound on waiting for the write guard or a busy database file.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Bumped whenever the fixed schema below changes shape.
const SCHEMA_VERSION: i64 = 1;

/// Pause between attempts while another writer holds the guard.
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(2);

pub(crate) const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS materials (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        id TEXT NOT NULL UNIQUE,
        name TEXT NOT NULL,
        unit TEXT NOT NULL,
        unit_cost TEXT NOT NULL,
        waste_factor TEXT NOT NULL DEFAULT '0',
        allow_extreme_waste INTEGER NOT NULL DEFAULT 0
    );

    CREATE TABLE IF NOT EXISTS calculation_records (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        created_at TEXT NOT NULL,
        material_id TEXT NOT NULL,
        requested_quantity TEXT NOT NULL,
        waste_factor TEXT NOT NULL,
        unit_cost TEXT NOT NULL,
        total_units TEXT NOT NULL,
        total_cost TEXT NOT NULL,
        note TEXT,
        FOREIGN KEY(material_id) REFERENCES materials(id) ON DELETE RESTRICT
    );

    CREATE INDEX IF NOT EXISTS idx_records_created_at
        ON calculation_records(created_at, id);
    CREATE INDEX IF NOT EXISTS idx_records_material
        ON calculation_records(material_id);

    CREATE TABLE IF NOT EXISTS export_log (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        created_at TEXT NOT NULL,
        format TEXT NOT NULL,
        destination TEXT NOT NULL,
        record_count INTEGER NOT NULL
    );

    CREATE TRIGGER IF NOT EXISTS calculation_records_append_only
        BEFORE UPDATE ON calculation_records
    BEGIN
        SELECT RAISE(ABORT, 'calculation records are append-only');
    END;
";

/// Owner of the single database file.
///
/// Each unit of work opens its own connection, so a `Store` can be shared
/// across threads behind an `Arc`. Writers serialize on `gate`; readers take
/// its shared side and only wait while a write transaction is open.
#[derive(Debug)]
pub struct Store {
    path: PathBuf,
    timeout: Duration,
    gate: RwLock<()>,
}

impl Store {
    /// Open (or create) the database at `path` with [`DEFAULT_TIMEOUT`].
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_timeout(path, DEFAULT_TIMEOUT)
    }

    /// Ensure the file and its directory exist, create the fixed schema, and
    /// return a store whose operations give up after `timeout`.
    pub fn open_with_timeout(path: impl AsRef<Path>, timeout: Duration) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let unavailable = |reason: String| Error::StorageUnavailable {
            path: path.clone(),
            reason,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|err| unavailable(format!("failed to create data directory: {err}")))?;
        }

        let store = Self {
            path: path.clone(),
            timeout,
            gate: RwLock::new(()),
        };

        let mut conn = store
            .connect()
            .map_err(|err| unavailable(format!("failed to open SQLite database: {err}")))?;
        ensure_schema(&mut conn).map_err(|err| match err {
            Error::StorageUnavailable { reason, .. } => unavailable(reason),
            other if is_busy(&other) => {
                unavailable("database file is locked by another process".into())
            }
            other => unavailable(other.to_string()),
        })?;

        debug!(path = %store.path.display(), timeout_ms = timeout.as_millis() as u64, "opened store");
        Ok(store)
    }

    /// Location of the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bound on every wait for the write guard or a busy file.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Write a consistent copy of the database to `destination` with
    /// `VACUUM INTO`. Writers wait until the copy is done; an existing file at
    /// `destination` is never overwritten.
    pub fn backup(&self, destination: impl AsRef<Path>) -> Result<()> {
        let destination = destination.as_ref();
        let unavailable = |reason: String| Error::StorageUnavailable {
            path: destination.to_path_buf(),
            reason,
        };

        if destination.exists() {
            return Err(unavailable("backup destination already exists".into()));
        }
        if let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|err| unavailable(format!("failed to create backup directory: {err}")))?;
        }
        let target = destination
            .to_str()
            .ok_or_else(|| unavailable("backup path is not valid UTF-8".into()))?;

        self.with_connection(|conn| {
            conn.execute("VACUUM INTO ?1", [target])?;
            Ok(())
        })
        .map_err(|err| match err {
            Error::StorageTimeout { .. } => err,
            other => unavailable(other.to_string()),
        })?;

        info!(source = %self.path.display(), destination = %destination.display(), "database backed up");
        Ok(())
    }

    /// File size, schema version and row counts.
    pub fn info(&self) -> Result<StoreInfo> {
        self.with_connection(|conn| {
            let count = |table: &str| -> Result<i64> {
                Ok(conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?)
            };
            let schema_version = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;

            Ok(StoreInfo {
                path: self.path.clone(),
                size_bytes: fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0),
                schema_version,
                materials: count("materials")?,
                records: count("calculation_records")?,
                exports: count("export_log")?,
            })
        })
    }

    /// Run `f` inside one write transaction. `Ok` commits; any `Err` rolls back
    /// and is returned unchanged.
    pub fn with_transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T>,
    {
        let _guard = self.acquire_write()?;
        let mut conn = self.connect().map_err(|err| self.classify(err))?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|err| self.classify(err.into()))?;

        match f(&tx) {
            Ok(value) => {
                tx.commit().map_err(|err| self.classify(err.into()))?;
                debug!("transaction committed");
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback() {
                    warn!(error = %rollback_err, "rollback failed");
                }
                debug!(error = %err, "transaction rolled back");
                Err(self.classify(err))
            }
        }
    }

    /// Run a read-only unit of work.
    pub fn with_connection<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let _guard = self.acquire_read()?;
        let conn = self.connect().map_err(|err| self.classify(err))?;
        f(&conn).map_err(|err| self.classify(err))
    }

    /// Open a fresh connection with foreign keys and the busy timeout applied.
    fn connect(&self) -> Result<Connection> {
        let conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(self.timeout)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(conn)
    }

    fn acquire_write(&self) -> Result<RwLockWriteGuard<'_, ()>> {
        let deadline = Instant::now() + self.timeout;
        loop {
            match self.gate.try_write() {
                Ok(guard) => return Ok(guard),
                // The gate guards no data, so a panic elsewhere leaves nothing
                // inconsistent behind it.
                Err(TryLockError::Poisoned(poisoned)) => return Ok(poisoned.into_inner()),
                Err(TryLockError::WouldBlock) => self.wait_until(deadline)?,
            }
        }
    }

    fn acquire_read(&self) -> Result<RwLockReadGuard<'_, ()>> {
        let deadline = Instant::now() + self.timeout;
        loop {
            match self.gate.try_read() {
                Ok(guard) => return Ok(guard),
                Err(TryLockError::Poisoned(poisoned)) => return Ok(poisoned.into_inner()),
                Err(TryLockError::WouldBlock) => self.wait_until(deadline)?,
            }
        }
    }

    fn wait_until(&self, deadline: Instant) -> Result<()> {
        if Instant::now() >= deadline {
            warn!(timeout_ms = self.timeout.as_millis() as u64, "gave up waiting for store lock");
            return Err(Error::StorageTimeout {
                waited: self.timeout,
            });
        }
        thread::sleep(LOCK_POLL_INTERVAL);
        Ok(())
    }

    /// Busy/locked means another process held the file for the whole busy
    /// timeout.
    fn classify(&self, err: Error) -> Error {
        if is_busy(&err) {
            Error::StorageTimeout {
                waited: self.timeout,
            }
        } else {
            err
        }
    }
}

fn is_busy(err: &Error) -> bool {
    match err {
        Error::Sqlite(sql) => matches!(
            sql.sqlite_error_code(),
            Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
        ),
        _ => false,
    }
}

/// Create the fixed schema on first use and stamp its version. A file written
/// by a newer schema is refused rather than modified.
fn ensure_schema(conn: &mut Connection) -> Result<()> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let version: i64 = tx.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if version > SCHEMA_VERSION {
        return Err(Error::StorageUnavailable {
            path: PathBuf::new(),
            reason: format!(
                "schema version {version} is newer than supported version {SCHEMA_VERSION}"
            ),
        });
    }

    tx.execute_batch(SCHEMA)?;
    if version < SCHEMA_VERSION {
        tx.execute_batch(&format!("PRAGMA user_version = {SCHEMA_VERSION};"))?;
    }
    tx.commit()?;
    Ok(())
}

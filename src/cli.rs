//! Command-line surface. Running without a subcommand performs one
//! demonstration calculation so a fresh container can prove it works.

use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use tempfile::NamedTempFile;

use crate::calculator::Calculator;
use crate::config::Config;
use crate::db::Store;
use crate::export::ExportFormat;
use crate::geometry::{Room, Surface};
use crate::models::{CalculationRecord, Material, RecordFilter, Statistics};
use crate::session::Session;

/// Material used by the demonstration cycle.
const DEMO_MATERIAL_ID: &str = "brick";

#[derive(Debug, Parser)]
#[command(name = "materials-calculator")]
#[command(version)]
#[command(about = "Compute material quantities and costs, keeping a history in SQLite")]
pub struct Cli {
    /// Database file (overrides DB_PATH)
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Storage timeout in milliseconds (overrides DB_TIMEOUT_MS)
    #[arg(long, global = true)]
    pub timeout_ms: Option<u64>,

    /// Decimal places for units and costs (overrides CALC_PRECISION)
    #[arg(long, global = true)]
    pub precision: Option<u32>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Store the sample brick material and calculate 100 pieces (default)
    Demo,

    /// Manage material definitions
    Materials {
        #[command(subcommand)]
        action: MaterialCommand,
    },

    /// Calculate and record the requirement for one material
    Calc {
        material: String,
        quantity: Decimal,
        #[arg(long)]
        note: Option<String>,
    },

    /// Calculate for a room's floor or walls
    Room {
        material: String,
        #[arg(long)]
        length: Decimal,
        #[arg(long)]
        width: Decimal,
        /// Ceiling height, required for walls
        #[arg(long)]
        height: Option<Decimal>,
        /// Total door area in m2
        #[arg(long, default_value = "0")]
        doors: Decimal,
        /// Total window area in m2
        #[arg(long, default_value = "0")]
        windows: Decimal,
        /// floor or walls
        #[arg(long, default_value = "floor")]
        surface: Surface,
        #[arg(long)]
        note: Option<String>,
    },

    /// Compare materials for the same quantity without recording anything
    Compare {
        quantity: Decimal,
        #[arg(required = true, num_args = 1..)]
        materials: Vec<String>,
    },

    /// Show recorded calculations, oldest first
    History {
        #[arg(long)]
        material: Option<String>,
        /// Inclusive lower bound (RFC 3339)
        #[arg(long)]
        since: Option<DateTime<Utc>>,
        /// Exclusive upper bound (RFC 3339)
        #[arg(long)]
        until: Option<DateTime<Utc>>,
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Summarise the calculation history
    Stats {
        /// Only count calculations from the last N days
        #[arg(long)]
        days: Option<u32>,
    },

    /// Export history as json or csv
    Export {
        #[arg(long, default_value = "json")]
        format: ExportFormat,
        /// Output file; stdout when omitted
        #[arg(long)]
        output: Option<PathBuf>,
        #[arg(long)]
        material: Option<String>,
    },

    /// Delete recorded calculations
    Purge {
        /// Remove records created before this instant (RFC 3339)
        #[arg(long, conflicts_with = "all")]
        before: Option<DateTime<Utc>>,
        /// Remove the whole history
        #[arg(long)]
        all: bool,
    },

    /// Show the database location, size and row counts
    Info,

    /// Copy the database to a new file
    Backup {
        /// Destination file; must not exist yet
        destination: PathBuf,
    },
}

#[derive(Debug, Subcommand)]
pub enum MaterialCommand {
    /// List materials in insertion order
    List,
    /// Create or update a material
    Add {
        id: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        unit: String,
        #[arg(long)]
        unit_cost: Decimal,
        /// Extra fraction to order, e.g. 0.1 for ten percent
        #[arg(long, default_value = "0")]
        waste_factor: Decimal,
        /// Accept waste factors of 1 or more
        #[arg(long)]
        allow_extreme_waste: bool,
    },
    /// Delete a material that has no recorded calculations
    Delete { id: String },
}

impl Cli {
    /// Command-line flags win over the environment.
    pub fn apply_overrides(&self, config: &mut Config) -> Result<()> {
        if let Some(db) = &self.db {
            config.db_path = db.clone();
        }
        if let Some(ms) = self.timeout_ms {
            if ms == 0 {
                bail!("--timeout-ms must be greater than zero");
            }
            config.timeout = Duration::from_millis(ms);
        }
        if let Some(precision) = self.precision {
            // Validated when the calculator is built.
            config.precision = precision;
        }
        Ok(())
    }
}

/// Open the store described by `config` and execute `command`, writing
/// human-readable output to `out`.
pub fn run<W: Write>(command: Option<Command>, config: &Config, out: &mut W) -> Result<()> {
    let store = Store::open_with_timeout(&config.db_path, config.timeout)
        .context("failed to open the calculation database")?;
    let calculator = Calculator::new(config.precision)?;
    let session = Session::new(Arc::new(store), calculator);

    match command.unwrap_or(Command::Demo) {
        Command::Demo => run_demo(&session, out),
        Command::Materials { action } => run_materials(&session, action, out),
        Command::Calc {
            material,
            quantity,
            note,
        } => {
            let record = session.calculate(&material, quantity, note)?;
            print_record(out, &record)
        }
        Command::Room {
            material,
            length,
            width,
            height,
            doors,
            windows,
            surface,
            note,
        } => {
            let mut room = Room::new(length, width).with_openings(doors, windows);
            if let Some(height) = height {
                room = room.with_height(height);
            }
            let record = session.calculate_room(&material, &room, surface, note)?;
            print_record(out, &record)
        }
        Command::Compare {
            quantity,
            materials,
        } => {
            for quote in session.compare(&materials, quantity)? {
                writeln!(
                    out,
                    "{:<16} {:>12} {:<6} {:>12}",
                    quote.material.id,
                    quote.estimate.total_units,
                    quote.material.unit,
                    quote.estimate.total_cost
                )?;
            }
            Ok(())
        }
        Command::History {
            material,
            since,
            until,
            limit,
        } => {
            let filter = RecordFilter {
                material_id: material,
                since,
                until,
                limit,
                ..RecordFilter::default()
            };
            let records = session.history(&filter)?;
            if records.is_empty() {
                writeln!(out, "No calculations recorded.")?;
            }
            for record in &records {
                print_record(out, record)?;
            }
            Ok(())
        }
        Command::Stats { days } => {
            let stats = match days {
                Some(days) => session.recent_summary(days)?,
                None => session.statistics()?,
            };
            print_statistics(out, &stats, days)
        }
        Command::Export {
            format,
            output,
            material,
        } => {
            let filter = RecordFilter {
                material_id: material,
                ..RecordFilter::default()
            };
            match output {
                Some(path) => {
                    let count = export_to_file(&session, format, &filter, &path)?;
                    writeln!(out, "Exported {count} record(s) to {}", path.display())?;
                }
                None => {
                    session.export(format, &filter, "stdout", &mut *out)?;
                }
            }
            Ok(())
        }
        Command::Purge { before, all } => {
            if before.is_none() && !all {
                bail!("refusing to purge without --before or --all");
            }
            let removed = session.purge(before)?;
            writeln!(out, "Removed {removed} record(s)")?;
            Ok(())
        }
        Command::Info => {
            let info = session.repository().store().info()?;
            writeln!(out, "Database:     {}", info.path.display())?;
            writeln!(out, "Size:         {:.2} KiB", info.size_bytes as f64 / 1024.0)?;
            writeln!(out, "Schema:       v{}", info.schema_version)?;
            writeln!(out, "Materials:    {}", info.materials)?;
            writeln!(out, "Calculations: {}", info.records)?;
            writeln!(out, "Exports:      {}", info.exports)?;
            Ok(())
        }
        Command::Backup { destination } => {
            session.repository().store().backup(&destination)?;
            writeln!(out, "Backed up to {}", destination.display())?;
            Ok(())
        }
    }
}

/// Export into a temporary file next to `path` and move it into place only
/// once the export is committed, so a failed export leaves any existing file
/// untouched.
fn export_to_file(
    session: &Session,
    format: ExportFormat,
    filter: &RecordFilter,
    path: &Path,
) -> Result<i64> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut staging = NamedTempFile::new_in(dir)
        .with_context(|| format!("failed to create a temporary file in {}", dir.display()))?;

    let entry = session.export(
        format,
        filter,
        &path.display().to_string(),
        BufWriter::new(staging.as_file_mut()),
    )?;
    staging
        .persist(path)
        .with_context(|| format!("failed to move export into {}", path.display()))?;
    Ok(entry.record_count)
}

fn print_statistics<W: Write>(out: &mut W, stats: &Statistics, days: Option<u32>) -> Result<()> {
    if let Some(days) = days {
        writeln!(out, "Last {days} day(s)")?;
    }
    writeln!(out, "Calculations: {}", stats.total_records)?;
    writeln!(out, "Total cost:   {}", stats.total_cost)?;
    writeln!(out, "Average cost: {}", stats.average_cost)?;
    if let Some(material) = &stats.most_used_material {
        writeln!(out, "Most used:    {material} ({} times)", stats.most_used_count)?;
    }
    for usage in &stats.per_material {
        writeln!(
            out,
            "  {:<16} {:>4} records {:>12} units {:>12} cost",
            usage.material_id, usage.records, usage.total_units, usage.total_cost
        )?;
    }
    Ok(())
}

fn run_demo<W: Write>(session: &Session, out: &mut W) -> Result<()> {
    let brick = Material::new(DEMO_MATERIAL_ID, "Red Brick", "piece", Decimal::new(50, 2))
        .with_waste_factor(Decimal::new(5, 2));
    session.repository().upsert_material(&brick)?;

    let record = session.calculate(
        DEMO_MATERIAL_ID,
        Decimal::from(100),
        Some("demonstration".to_string()),
    )?;
    writeln!(out, "Material: {brick}")?;
    print_record(out, &record)
}

fn run_materials<W: Write>(session: &Session, action: MaterialCommand, out: &mut W) -> Result<()> {
    let repo = session.repository();
    match action {
        MaterialCommand::List => {
            let materials = repo.list_materials()?;
            if materials.is_empty() {
                writeln!(out, "No materials defined.")?;
            }
            for m in materials {
                writeln!(
                    out,
                    "{:<16} {:<24} {:>10} per {:<6} waste {}",
                    m.id, m.name, m.unit_cost, m.unit, m.waste_factor
                )?;
            }
        }
        MaterialCommand::Add {
            id,
            name,
            unit,
            unit_cost,
            waste_factor,
            allow_extreme_waste,
        } => {
            let mut material = Material::new(id, name, unit, unit_cost).with_waste_factor(waste_factor);
            material.allow_extreme_waste = allow_extreme_waste;
            let saved = repo.upsert_material(&material)?;
            writeln!(out, "Saved {}: {saved}", saved.id)?;
        }
        MaterialCommand::Delete { id } => {
            repo.delete_material(&id)?;
            writeln!(out, "Deleted {id}")?;
        }
    }
    Ok(())
}

fn print_record<W: Write>(out: &mut W, record: &CalculationRecord) -> Result<()> {
    let when = record
        .created_at
        .map(|ts| ts.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_default();
    writeln!(out, "{when}  {record}")?;
    Ok(())
}

/// Standard output, locked for the duration of a command.
pub fn stdout() -> io::StdoutLock<'static> {
    io::stdout().lock()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn config_in(dir: &std::path::Path) -> Config {
        Config {
            db_path: dir.join("data").join("calc.db"),
            ..Config::default()
        }
    }

    #[test]
    fn no_subcommand_runs_demo() {
        let dir = tempdir().unwrap();
        let mut out = Vec::new();
        run(None, &config_in(dir.path()), &mut out).unwrap();

        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("105.00 units"), "{text}");
        assert!(text.contains("cost 52.50"), "{text}");
    }

    #[test]
    fn parses_calc_arguments() {
        let cli = Cli::try_parse_from(["materials-calculator", "calc", "brick", "12.5", "--note", "shed"])
            .unwrap();
        match cli.command {
            Some(Command::Calc { material, quantity, note }) => {
                assert_eq!(material, "brick");
                assert_eq!(quantity, Decimal::new(125, 1));
                assert_eq!(note.as_deref(), Some("shed"));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn flags_override_environment() {
        let cli = Cli::try_parse_from([
            "materials-calculator",
            "--db",
            "/tmp/other.db",
            "--precision",
            "3",
            "stats",
        ])
        .unwrap();
        let mut config = Config::default();
        cli.apply_overrides(&mut config).unwrap();
        assert_eq!(config.db_path, PathBuf::from("/tmp/other.db"));
        assert_eq!(config.precision, 3);
    }

    #[test]
    fn purge_requires_explicit_scope() {
        let dir = tempdir().unwrap();
        let mut out = Vec::new();
        let err = run(
            Some(Command::Purge { before: None, all: false }),
            &config_in(dir.path()),
            &mut out,
        )
        .unwrap_err();
        assert!(err.to_string().contains("--before or --all"));
    }

    #[test]
    fn export_to_file_replaces_target_only_when_done() {
        let dir = tempdir().unwrap();
        let config = config_in(dir.path());
        let mut out = Vec::new();
        run(None, &config, &mut out).unwrap();

        let target = dir.path().join("history.json");
        std::fs::write(&target, "old contents").unwrap();
        run(
            Some(Command::Export {
                format: ExportFormat::Json,
                output: Some(target.clone()),
                material: None,
            }),
            &config,
            &mut out,
        )
        .unwrap();

        let exported: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&target).unwrap()).unwrap();
        assert_eq!(exported.as_array().unwrap().len(), 1);

        let mut names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        names.sort();
        assert_eq!(names, ["data", "history.json"]);
    }

    #[test]
    fn backup_and_info_commands() {
        let dir = tempdir().unwrap();
        let config = config_in(dir.path());
        let mut out = Vec::new();
        run(None, &config, &mut out).unwrap();

        let copy = dir.path().join("copy.db");
        run(Some(Command::Backup { destination: copy.clone() }), &config, &mut out).unwrap();

        let copied = Config {
            db_path: copy,
            ..Config::default()
        };
        let mut info = Vec::new();
        run(Some(Command::Info), &copied, &mut info).unwrap();
        let text = String::from_utf8(info).unwrap();
        assert!(text.contains("Materials:    1"), "{text}");
        assert!(text.contains("Calculations: 1"), "{text}");
    }

    #[test]
    fn stats_for_recent_days() {
        let dir = tempdir().unwrap();
        let config = config_in(dir.path());
        let mut out = Vec::new();
        run(None, &config, &mut out).unwrap();

        let mut stats = Vec::new();
        run(Some(Command::Stats { days: Some(7) }), &config, &mut stats).unwrap();
        let text = String::from_utf8(stats).unwrap();
        assert!(text.starts_with("Last 7 day(s)"), "{text}");
        assert!(text.contains("Calculations: 1"), "{text}");
    }

    #[test]
    fn unknown_material_surfaces_library_error() {
        let dir = tempdir().unwrap();
        let mut out = Vec::new();
        let err = run(
            Some(Command::Calc {
                material: "marble".into(),
                quantity: Decimal::ONE,
                note: None,
            }),
            &config_in(dir.path()),
            &mut out,
        )
        .unwrap_err();
        let lib_err = err.downcast_ref::<crate::Error>().unwrap();
        assert_eq!(lib_err.kind(), "MaterialNotFound");
    }
}

//! End-to-end tests against a real database file.

use std::io::{self, Write};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::{TimeZone, Utc};
use materials_calculator::export::ExportFormat;
use materials_calculator::geometry::{Room, Surface};
use materials_calculator::{
    CalculationRecord, Calculator, Error, Material, RecordFilter, Repository, Session, Store,
};
use rust_decimal::Decimal;
use tempfile::{tempdir, TempDir};

fn dec(s: &str) -> Decimal {
    s.parse().unwrap()
}

fn brick() -> Material {
    Material::new("brick", "Red Brick", "piece", dec("0.50")).with_waste_factor(dec("0.05"))
}

fn open_session(dir: &TempDir) -> Session {
    let store = Store::open(dir.path().join("data").join("calc.db")).unwrap();
    Session::new(Arc::new(store), Calculator::default())
}

#[test]
fn brick_scenario_is_persisted() {
    let dir = tempdir().unwrap();
    let session = open_session(&dir);
    session.repository().upsert_material(&brick()).unwrap();

    let record = session.calculate("brick", dec("100"), None).unwrap();
    assert_eq!(record.total_units.to_string(), "105.00");
    assert_eq!(record.total_cost.to_string(), "52.50");
    assert!(record.id.is_some());
    assert!(record.created_at.is_some());

    let history = session.history(&RecordFilter::by_id(record.id.unwrap())).unwrap();
    assert_eq!(history, vec![record]);
}

#[test]
fn history_survives_reopening() {
    let dir = tempdir().unwrap();
    {
        let session = open_session(&dir);
        session.repository().upsert_material(&brick()).unwrap();
        session.calculate("brick", dec("10"), Some("first".into())).unwrap();
    }

    let session = open_session(&dir);
    let history = session.history(&RecordFilter::default()).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].note.as_deref(), Some("first"));
}

#[test]
fn unknown_material_leaves_no_record() {
    let dir = tempdir().unwrap();
    let session = open_session(&dir);

    let err = session.calculate("marble", dec("1"), None).unwrap_err();
    assert!(matches!(err, Error::MaterialNotFound(_)));

    let orphan = CalculationRecord {
        id: None,
        created_at: None,
        material_id: "marble".into(),
        requested_quantity: dec("1"),
        waste_factor: Decimal::ZERO,
        unit_cost: dec("1"),
        total_units: dec("1"),
        total_cost: dec("1"),
        note: None,
    };
    let err = session.repository().save_record(&orphan).unwrap_err();
    assert!(matches!(err, Error::MaterialNotFound(_)));
    assert!(session.history(&RecordFilter::default()).unwrap().is_empty());
}

#[test]
fn invalid_quantity_leaves_no_record() {
    let dir = tempdir().unwrap();
    let session = open_session(&dir);
    session.repository().upsert_material(&brick()).unwrap();

    for q in ["0", "-5"] {
        let err = session.calculate("brick", dec(q), None).unwrap_err();
        assert!(matches!(err, Error::InvalidQuantity { .. }));
    }
    assert!(session.history(&RecordFilter::default()).unwrap().is_empty());
}

#[test]
fn saved_record_round_trips() {
    let dir = tempdir().unwrap();
    let session = open_session(&dir);
    let repo: &Repository = session.repository();
    repo.upsert_material(&brick()).unwrap();

    let record = CalculationRecord {
        id: None,
        created_at: Some(Utc.with_ymd_and_hms(2025, 2, 3, 4, 5, 6).unwrap()),
        material_id: "brick".into(),
        requested_quantity: dec("40"),
        waste_factor: dec("0.05"),
        unit_cost: dec("0.50"),
        total_units: dec("42.00"),
        total_cost: dec("21.00"),
        note: Some("garden wall".into()),
    };
    let saved = repo.save_record(&record).unwrap();
    let loaded = repo.get_record(saved.id.unwrap()).unwrap().unwrap();

    assert_eq!(loaded, CalculationRecord { id: saved.id, ..record });
}

#[test]
fn referenced_material_cannot_be_deleted() {
    let dir = tempdir().unwrap();
    let session = open_session(&dir);
    let repo = session.repository();
    repo.upsert_material(&brick()).unwrap();
    session.calculate("brick", dec("3"), None).unwrap();

    let err = repo.delete_material("brick").unwrap_err();
    assert!(matches!(err, Error::MaterialInUse { ref id, records: 1 } if id == "brick"));
    assert_eq!(repo.list_materials().unwrap().len(), 1);

    // Once the history is purged the material is free to go.
    session.purge(None).unwrap();
    repo.delete_material("brick").unwrap();
    assert!(repo.list_materials().unwrap().is_empty());
}

#[test]
fn records_keep_material_snapshot() {
    let dir = tempdir().unwrap();
    let session = open_session(&dir);
    let repo = session.repository();
    repo.upsert_material(&brick()).unwrap();
    let before = session.calculate("brick", dec("100"), None).unwrap();

    repo.upsert_material(&Material::new("brick", "Red Brick", "piece", dec("0.80")))
        .unwrap();
    let after = session.calculate("brick", dec("100"), None).unwrap();

    let history = session.history(&RecordFilter::by_material("brick")).unwrap();
    assert_eq!(history, vec![before, after]);
    assert_eq!(history[0].unit_cost, dec("0.50"));
    assert_eq!(history[1].total_cost, dec("80.00"));
}

#[test]
fn room_calculation_uses_wall_area() {
    let dir = tempdir().unwrap();
    let session = open_session(&dir);
    let paper = Material::new("wallpaper", "Wallpaper", "m2", dec("4"))
        .with_waste_factor(dec("0.10"));
    session.repository().upsert_material(&paper).unwrap();

    let room = Room::new(dec("4"), dec("3"))
        .with_height(dec("2.5"))
        .with_openings(dec("1.6"), dec("2.4"));
    let record = session
        .calculate_room("wallpaper", &room, Surface::Walls, None)
        .unwrap();

    assert_eq!(record.requested_quantity, dec("31"));
    assert_eq!(record.total_units.to_string(), "34.10");
    assert_eq!(record.total_cost.to_string(), "136.40");
    assert_eq!(record.note.as_deref(), Some("walls 4 x 3 x 2.5 m"));
}

#[test]
fn compare_does_not_record() {
    let dir = tempdir().unwrap();
    let session = open_session(&dir);
    let repo = session.repository();
    repo.upsert_material(&Material::new("tile", "Tile", "m2", dec("30"))).unwrap();
    repo.upsert_material(&Material::new("laminate", "Laminate", "m2", dec("12")))
        .unwrap();

    let quotes = session
        .compare(&["tile".to_string(), "laminate".to_string()], dec("20"))
        .unwrap();
    assert_eq!(quotes[0].material.id, "laminate");
    assert_eq!(quotes[0].estimate.total_cost, dec("240"));
    assert!(session.history(&RecordFilter::default()).unwrap().is_empty());

    let err = session
        .compare(&["tile".to_string(), "granite".to_string()], dec("20"))
        .unwrap_err();
    assert!(matches!(err, Error::MaterialNotFound(id) if id == "granite"));
}

#[test]
fn export_is_logged() {
    let dir = tempdir().unwrap();
    let session = open_session(&dir);
    session.repository().upsert_material(&brick()).unwrap();
    session.calculate("brick", dec("100"), None).unwrap();
    session.calculate("brick", dec("50"), None).unwrap();

    let mut buf = Vec::new();
    let entry = session
        .export(ExportFormat::Csv, &RecordFilter::default(), "memory", &mut buf)
        .unwrap();
    assert_eq!(entry.record_count, 2);
    assert_eq!(String::from_utf8(buf).unwrap().lines().count(), 3);

    let exports = session.repository().list_exports(10).unwrap();
    assert_eq!(exports, vec![entry]);
}

/// Writer whose buffered bytes never reach their destination.
struct LostWrites;

impl Write for LostWrites {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Err(io::Error::other("device gone"))
    }
}

#[test]
fn failed_export_is_not_logged() {
    let dir = tempdir().unwrap();
    let session = open_session(&dir);
    session.repository().upsert_material(&brick()).unwrap();
    session.calculate("brick", dec("100"), None).unwrap();

    for format in [ExportFormat::Json, ExportFormat::Csv] {
        let err = session
            .export(format, &RecordFilter::default(), "lost.out", LostWrites)
            .unwrap_err();
        assert!(matches!(err, Error::Export(_)), "{err}");
    }
    assert!(session.repository().list_exports(10).unwrap().is_empty());
}

#[test]
fn statistics_report_overflow_instead_of_panicking() {
    let dir = tempdir().unwrap();
    let session = open_session(&dir);
    let ballast = Material::new("ballast", "Ballast", "kg", dec("1"));
    session.repository().upsert_material(&ballast).unwrap();

    let huge = dec("50000000000000000000000000000");
    let err = session.calculate("ballast", huge, None).unwrap_err();
    assert!(matches!(err, Error::Overflow(_)), "{err}");

    for _ in 0..2 {
        session
            .repository()
            .save_record(&CalculationRecord {
                id: None,
                created_at: None,
                material_id: "ballast".into(),
                requested_quantity: huge,
                waste_factor: Decimal::ZERO,
                unit_cost: dec("1"),
                total_units: huge,
                total_cost: huge,
                note: None,
            })
            .unwrap();
    }
    let err = session.statistics().unwrap_err();
    assert!(matches!(err, Error::Overflow(_)), "{err}");
}

#[test]
fn far_future_timestamp_does_not_poison_history() {
    let dir = tempdir().unwrap();
    let session = open_session(&dir);
    session.repository().upsert_material(&brick()).unwrap();
    session.calculate("brick", dec("1"), None).unwrap();

    let record = CalculationRecord {
        id: None,
        created_at: Some(Utc.with_ymd_and_hms(12000, 1, 1, 0, 0, 0).unwrap()),
        material_id: "brick".into(),
        requested_quantity: dec("1"),
        waste_factor: dec("0.05"),
        unit_cost: dec("0.50"),
        total_units: dec("1.05"),
        total_cost: dec("0.53"),
        note: None,
    };
    let err = session.repository().save_record(&record).unwrap_err();
    assert!(matches!(err, Error::InvalidTimestamp(_)), "{err}");
    assert_eq!(session.history(&RecordFilter::default()).unwrap().len(), 1);
}

#[test]
fn recent_summary_and_backup() {
    let dir = tempdir().unwrap();
    let session = open_session(&dir);
    let repo = session.repository();
    repo.upsert_material(&brick()).unwrap();

    let old = CalculationRecord {
        id: None,
        created_at: Some(Utc::now() - chrono::Duration::days(30)),
        material_id: "brick".into(),
        requested_quantity: dec("10"),
        waste_factor: dec("0.05"),
        unit_cost: dec("0.50"),
        total_units: dec("10.50"),
        total_cost: dec("5.25"),
        note: None,
    };
    repo.save_record(&old).unwrap();
    session.calculate("brick", dec("100"), None).unwrap();

    let recent = session.recent_summary(7).unwrap();
    assert_eq!(recent.total_records, 1);
    assert_eq!(recent.total_cost, dec("52.50"));
    assert_eq!(session.statistics().unwrap().total_records, 2);
    assert!(session.recent_summary(u32::MAX).is_err());

    let copy = dir.path().join("backup").join("calc.db");
    repo.store().backup(&copy).unwrap();
    let restored = Session::new(Arc::new(Store::open(&copy).unwrap()), Calculator::default());
    assert_eq!(restored.history(&RecordFilter::default()).unwrap().len(), 2);
}

#[test]
fn concurrent_calculations_all_land() {
    let dir = tempdir().unwrap();
    let session = Arc::new(open_session(&dir));
    session.repository().upsert_material(&brick()).unwrap();

    let threads: Vec<_> = (1..=8)
        .map(|n| {
            let session = Arc::clone(&session);
            thread::spawn(move || {
                for i in 0..5 {
                    let qty = Decimal::from(n * 10 + i);
                    session.calculate("brick", qty, None).unwrap();
                }
            })
        })
        .collect();
    for handle in threads {
        handle.join().unwrap();
    }

    let history = session.history(&RecordFilter::default()).unwrap();
    assert_eq!(history.len(), 40);

    let mut ids: Vec<_> = history.iter().map(|r| r.id.unwrap()).collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 40);

    let stats = session.statistics().unwrap();
    assert_eq!(stats.total_records, 40);
}

#[test]
fn blocked_writer_times_out() {
    let dir = tempdir().unwrap();
    let store = Arc::new(
        Store::open_with_timeout(dir.path().join("calc.db"), Duration::from_millis(100)).unwrap(),
    );

    let (entered_tx, entered_rx) = mpsc::channel();
    let holder = {
        let store = Arc::clone(&store);
        thread::spawn(move || {
            store
                .with_transaction(|_| {
                    entered_tx.send(()).unwrap();
                    thread::sleep(Duration::from_millis(600));
                    Ok(())
                })
                .unwrap();
        })
    };
    entered_rx.recv().unwrap();

    let started = Instant::now();
    let err = store.with_transaction(|_| Ok(())).unwrap_err();
    assert!(matches!(err, Error::StorageTimeout { .. }), "{err}");
    assert!(started.elapsed() < Duration::from_millis(500));

    // Readers wait for the writer as well.
    let err = store.with_connection(|_| Ok(())).unwrap_err();
    assert!(matches!(err, Error::StorageTimeout { .. }), "{err}");

    holder.join().unwrap();
    store.with_transaction(|_| Ok(())).unwrap();
}

#[test]
fn readers_share_the_store() {
    let dir = tempdir().unwrap();
    let store = Arc::new(
        Store::open_with_timeout(dir.path().join("calc.db"), Duration::from_millis(100)).unwrap(),
    );

    let (entered_tx, entered_rx) = mpsc::channel();
    let reader = {
        let store = Arc::clone(&store);
        thread::spawn(move || {
            store
                .with_connection(|_| {
                    entered_tx.send(()).unwrap();
                    thread::sleep(Duration::from_millis(300));
                    Ok(())
                })
                .unwrap();
        })
    };
    entered_rx.recv().unwrap();

    // A second reader does not wait for the first.
    let started = Instant::now();
    store.with_connection(|_| Ok(())).unwrap();
    assert!(started.elapsed() < Duration::from_millis(100));

    reader.join().unwrap();
}

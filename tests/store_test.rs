//! Tests for the SQLite suspend history store.

use amd_s2idle::store::{CycleKey, CycleRecord, Store, StoreError, SCHEMA_VERSION};
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{ConnectOptions, Connection};
use tempfile::TempDir;

const KEY: CycleKey = CycleKey(20_250_301_120_000);

async fn open_temp() -> (TempDir, Store) {
    let dir = TempDir::new().expect("tempdir");
    let store = Store::open(&dir.path().join("data.db")).await.expect("open");
    (dir, store)
}

fn cycle(t0: CycleKey) -> CycleRecord {
    CycleRecord {
        t0,
        t1: CycleKey(t0.0 + 10),
        requested: 10,
        gpio: vec!["0".to_owned(), "5".to_owned()],
        wake_irq: vec![9, 1],
        kernel: 9.5,
        hw: 9.0,
    }
}

#[tokio::test]
async fn writes_before_start_cycle_fail() {
    let (_dir, mut store) = open_temp().await;
    let err = store.record_debug("x", None).await.unwrap_err();
    assert!(matches!(err, StoreError::NoCycle));
}

#[tokio::test]
async fn cycle_data_round_trips_in_order() {
    let (_dir, mut store) = open_temp().await;
    store.start_cycle(KEY).await.expect("start");
    store.record_cycle_data("first", "✅").await.expect("record");
    store.record_cycle_data("second", "❌").await.expect("record");
    store.sync().await.expect("sync");

    let rows = store.report_cycle_data(KEY).await.expect("report");
    assert_eq!(rows.len(), 2);
    assert_eq!((rows[0].id, rows[0].message.as_str()), (0, "first"));
    assert_eq!((rows[1].id, rows[1].symbol.as_str()), (1, "❌"));
}

#[tokio::test]
async fn sequence_continues_after_restart() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("data.db");
    {
        let mut store = Store::open(&path).await.expect("open");
        store.start_cycle(KEY).await.expect("start");
        store.record_debug("a", Some(7)).await.expect("record");
        store.record_debug("b", None).await.expect("record");
        store.close().await.expect("close");
    }
    let mut store = Store::open(&path).await.expect("reopen");
    store.start_cycle(KEY).await.expect("start");
    store.record_debug("c", Some(4)).await.expect("record");
    store.sync().await.expect("sync");

    let rows = store.report_debug(KEY).await.expect("report");
    let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
    assert_eq!(ids, [0, 1, 2]);
    assert_eq!(rows[0].priority, Some(7));
    assert_eq!(rows[1].priority, None);
}

#[tokio::test]
async fn cycle_record_round_trips_and_replaces() {
    let (_dir, mut store) = open_temp().await;
    store.start_cycle(KEY).await.expect("start");
    store.record_cycle(&cycle(KEY)).await.expect("record");
    let mut updated = cycle(KEY);
    updated.hw = 2.0;
    store.record_cycle(&updated).await.expect("replace");
    store.sync().await.expect("sync");

    let stored = store.report_cycle(KEY).await.expect("report").expect("row");
    assert_eq!(stored, updated);
    assert_eq!(store.get_last_cycle().await.expect("last"), Some(KEY));
}

#[tokio::test]
async fn battery_samples_fill_before_and_after() {
    let (_dir, mut store) = open_temp().await;
    store.start_cycle(KEY).await.expect("start");
    store.record_battery_energy("BAT0", 50_000, 60_000, "W").await.expect("b0");
    store.record_battery_energy("BAT0", 49_000, 60_000, "W").await.expect("b1");
    store.record_cycle(&cycle(KEY)).await.expect("cycle");
    store.sync().await.expect("sync");

    let rows = store.report_battery(KEY).await.expect("report");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].b0, Some(50_000));
    assert_eq!(rows[0].b1, Some(49_000));
    assert_eq!(rows[0].unit.as_deref(), Some("W"));

    let summary = store.report_summary(KEY, KEY).await.expect("summary");
    assert_eq!(summary.len(), 1);
    assert_eq!(summary[0].batteries, rows);
}

#[tokio::test]
async fn summary_respects_range() {
    let (_dir, mut store) = open_temp().await;
    for key in [KEY, CycleKey(KEY.0 + 100), CycleKey(KEY.0 + 200)] {
        store.start_cycle(key).await.expect("start");
        store.record_cycle(&cycle(key)).await.expect("cycle");
    }
    store.sync().await.expect("sync");
    let summary = store
        .report_summary(CycleKey(KEY.0 + 1), CycleKey(KEY.0 + 200))
        .await
        .expect("summary");
    let keys: Vec<CycleKey> = summary.iter().map(|s| s.cycle.t0).collect();
    assert_eq!(keys, [CycleKey(KEY.0 + 100), CycleKey(KEY.0 + 200)]);
}

#[tokio::test]
async fn prereq_snapshot_is_found() {
    let (_dir, mut store) = open_temp().await;
    assert_eq!(store.get_last_prereq_ts().await.expect("last"), None);
    store.start_cycle(KEY).await.expect("start");
    store.record_prereq("Kernel 6.16", "🐧").await.expect("record");
    store.sync().await.expect("sync");
    assert_eq!(store.get_last_prereq_ts().await.expect("last"), Some(KEY));
    let rows = store.report_prereq(KEY).await.expect("report");
    assert_eq!(rows[0].message, "Kernel 6.16");
}

#[tokio::test]
async fn reopening_is_idempotent() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("data.db");
    Store::open(&path).await.expect("open").close().await.expect("close");
    let mut store = Store::open(&path).await.expect("reopen");
    assert_eq!(store.schema_version().await.expect("version"), SCHEMA_VERSION);
}

#[tokio::test]
async fn legacy_debug_table_gains_priority() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("data.db");
    {
        let mut conn = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true)
            .connect()
            .await
            .expect("connect");
        sqlx::raw_sql(
            "CREATE TABLE debug (t0 INTEGER NOT NULL, id INTEGER NOT NULL, message TEXT NOT NULL, PRIMARY KEY (t0, id));
             INSERT INTO debug (t0, id, message) VALUES (20250301120000, 0, 'old line');",
        )
        .execute(&mut conn)
        .await
        .expect("legacy schema");
        conn.close().await.expect("close");
    }

    let mut store = Store::open(&path).await.expect("open");
    assert_eq!(store.schema_version().await.expect("version"), SCHEMA_VERSION);
    let rows = store.report_debug(KEY).await.expect("report");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].message, "old line");
    assert_eq!(rows[0].priority, None);
}

#[tokio::test]
async fn newer_schema_is_refused() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("data.db");
    {
        let mut conn = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true)
            .connect()
            .await
            .expect("connect");
        sqlx::raw_sql("PRAGMA user_version = 99")
            .execute(&mut conn)
            .await
            .expect("stamp");
        conn.close().await.expect("close");
    }
    let err = Store::open(&path).await.unwrap_err();
    assert!(matches!(
        err,
        StoreError::SchemaTooNew {
            found: 99,
            supported: SCHEMA_VERSION
        }
    ));
}

#[tokio::test]
async fn fallback_location_is_used() {
    let dir = TempDir::new().expect("tempdir");
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, "file").expect("write");
    let store = Store::open_with_fallback(&blocker.join("data.db"), &dir.path().join("fallback"))
        .await
        .expect("fallback");
    assert_eq!(store.path(), dir.path().join("fallback").join("data.db"));
}

#[test]
fn cycle_key_formats_as_local_time() {
    assert_eq!(KEY.to_string(), "2025-03-01 12:00:00");
    assert_eq!(CycleKey(42).to_string(), "42");
}

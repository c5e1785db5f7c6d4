//! Tests for report gathering and rendering.

use amd_s2idle::report::{day_range, Report, ReportFormat, DEFAULT_REPORT_DAYS};
use amd_s2idle::store::{CycleKey, CycleRecord, Store};
use chrono::{Local, NaiveDate, TimeDelta};
use tempfile::TempDir;

const PREREQ: CycleKey = CycleKey(20_250_301_115_900);
const FIRST: CycleKey = CycleKey(20_250_301_120_000);
const SECOND: CycleKey = CycleKey(20_250_302_080_000);

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

async fn populated() -> (TempDir, Store) {
    let dir = TempDir::new().expect("tempdir");
    let mut store = Store::open(&dir.path().join("data.db")).await.expect("open");

    store.start_cycle(PREREQ).await.expect("start");
    store.record_prereq("AMD Ryzen 7 7840U", "💻").await.expect("prereq");
    store.record_debug("SMU FW version 76.70.0", None).await.expect("debug");

    store.start_cycle(FIRST).await.expect("start");
    store.record_battery_energy("BAT0", 50_000, 100_000, "W").await.expect("b0");
    store.record_battery_energy("BAT0", 49_000, 100_000, "W").await.expect("b1");
    store.record_cycle_data("Userspace suspended for 0:00:10", "✅").await.expect("data");
    store.record_debug("gpe0A increased from 3 to 5", Some(4)).await.expect("debug");
    store
        .record_cycle(&CycleRecord {
            t0: FIRST,
            t1: CycleKey(20_250_301_120_010),
            requested: 10,
            gpio: vec!["4".to_owned()],
            wake_irq: vec![9, 1],
            kernel: 9.5,
            hw: 9.0,
        })
        .await
        .expect("cycle");

    store.start_cycle(SECOND).await.expect("start");
    store
        .record_cycle(&CycleRecord {
            t0: SECOND,
            t1: CycleKey(20_250_302_080_100),
            requested: 60,
            gpio: Vec::new(),
            wake_irq: Vec::new(),
            kernel: 59.0,
            hw: 58.0,
        })
        .await
        .expect("cycle");
    store.sync().await.expect("sync");
    (dir, store)
}

#[test]
fn day_range_covers_whole_days() {
    let (since, until) = day_range(Some(date(2025, 3, 1)), Some(date(2025, 3, 2)));
    assert_eq!(since, CycleKey(20_250_301_000_000));
    assert_eq!(until, CycleKey(20_250_302_235_959));
}

#[test]
fn day_range_defaults_to_recent_history() {
    let (since, until) = day_range(None, Some(date(2025, 3, 1)));
    assert_eq!(since, CycleKey(20_241_231_000_000));
    assert_eq!(until, CycleKey(20_250_301_235_959));

    let today = Local::now().date_naive();
    let (since, _) = day_range(None, None);
    let expected = today - TimeDelta::days(DEFAULT_REPORT_DAYS);
    assert_eq!(since.to_datetime().map(|t| t.date_naive()), Some(expected));
}

#[test]
fn report_format_parses_names() {
    assert_eq!("txt".parse::<ReportFormat>().expect("txt"), ReportFormat::Txt);
    assert_eq!("stdout".parse::<ReportFormat>().expect("stdout"), ReportFormat::Txt);
    assert_eq!("json".parse::<ReportFormat>().expect("json"), ReportFormat::Json);
    let err = "html".parse::<ReportFormat>().unwrap_err();
    assert_eq!(err.to_string(), "unsupported report format 'html'");
}

#[tokio::test]
async fn gather_limits_cycles_to_range() {
    let (_dir, mut store) = populated().await;
    let (since, until) = day_range(Some(date(2025, 3, 1)), Some(date(2025, 3, 1)));
    let report = Report::gather(&mut store, since, until, false).await.expect("gather");
    assert_eq!(report.prereq.len(), 1);
    assert!(report.prereq_debug.is_empty());
    assert_eq!(report.cycles.len(), 1);
    assert_eq!(report.cycles[0].cycle.t0, FIRST);
    assert!(report.cycles[0].debug.is_empty());

    let (since, until) = day_range(Some(date(2025, 3, 1)), Some(date(2025, 3, 2)));
    let report = Report::gather(&mut store, since, until, true).await.expect("gather");
    assert_eq!(report.cycles.len(), 2);
    assert_eq!(report.prereq_debug.len(), 1);
    assert_eq!(report.cycles[0].debug.len(), 1);
}

#[tokio::test]
async fn text_report_lists_cycles() {
    let (_dir, mut store) = populated().await;
    let (since, until) = day_range(Some(date(2025, 3, 1)), Some(date(2025, 3, 2)));
    let report = Report::gather(&mut store, since, until, true).await.expect("gather");
    let text = ReportFormat::Txt.renderer().render(&report).expect("render");

    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], "Prerequisite checks (2025-03-01 11:59:00)");
    assert_eq!(lines[1], "💻 AMD Ryzen 7 7840U");
    assert!(lines.contains(&"Cycle 1: 2025-03-01 12:00:00 -> 2025-03-01 12:00:10 (requested 0:00:10)"));
    assert!(lines.contains(&"  Wakeup IRQs: 9, 1"));
    assert!(lines.contains(&"  Active GPIOs: 4"));
    assert!(lines.contains(&"  🔋 Battery BAT0 went from 50000 to 49000 µWh (1.00% of capacity lost)"));
    assert!(lines.contains(&"  ✅ Userspace suspended for 0:00:10"));
    assert!(lines.contains(&"    🚦 gpe0A increased from 3 to 5"));
    assert!(lines.contains(&"Cycle 2: 2025-03-02 08:00:00 -> 2025-03-02 08:01:00 (requested 0:01:00)"));
}

#[tokio::test]
async fn text_report_for_empty_range() {
    let (_dir, mut store) = populated().await;
    let (since, until) = day_range(Some(date(2024, 1, 1)), Some(date(2024, 1, 2)));
    let report = Report::gather(&mut store, since, until, false).await.expect("gather");
    let text = ReportFormat::Txt.renderer().render(&report).expect("render");
    assert!(text.ends_with("No suspend cycles recorded in this range\n"));
}

#[tokio::test]
async fn json_report_is_structured() {
    let (_dir, mut store) = populated().await;
    let (since, until) = day_range(Some(date(2025, 3, 1)), Some(date(2025, 3, 1)));
    let report = Report::gather(&mut store, since, until, false).await.expect("gather");
    let text = ReportFormat::Json.renderer().render(&report).expect("render");

    let value: serde_json::Value = serde_json::from_str(&text).expect("json");
    let cycle = &value["cycles"][0];
    assert_eq!(cycle["cycle"]["t0"], 20_250_301_120_000_i64);
    assert_eq!(cycle["cycle"]["wake_irq"], serde_json::json!([9, 1]));
    assert_eq!(cycle["batteries"][0]["b1"], 49_000);
    assert_eq!(cycle["findings"][0]["symbol"], "✅");
    assert!(cycle.get("debug").is_none());
    assert!(value.get("prereq_debug").is_none());
}

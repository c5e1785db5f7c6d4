//! Row types returned by the store.

use std::fmt;

use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use serde::{Deserialize, Serialize};

const KEY_FORMAT: &str = "%Y%m%d%H%M%S";

/// A cycle or prerequisite snapshot key: local time truncated to seconds,
/// encoded as the integer `YYYYMMDDHHMMSS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CycleKey(pub i64);

impl CycleKey {
    /// Key for a point in time.
    pub fn from_datetime(time: DateTime<Local>) -> Self {
        let text = time.format(KEY_FORMAT).to_string();
        // Formatted digits always fit; fall back to 0 only on pathological years.
        Self(text.parse().unwrap_or(0))
    }

    /// Key for the current time.
    pub fn now() -> Self {
        Self::from_datetime(Local::now())
    }

    /// Back to a local time, if the key is a valid timestamp.
    pub fn to_datetime(self) -> Option<DateTime<Local>> {
        let naive = NaiveDateTime::parse_from_str(&self.0.to_string(), KEY_FORMAT).ok()?;
        Local.from_local_datetime(&naive).earliest()
    }
}

impl fmt::Display for CycleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_datetime() {
            Some(t) => write!(f, "{}", t.format("%Y-%m-%d %H:%M:%S")),
            None => write!(f, "{}", self.0),
        }
    }
}

/// A row of `prereq_data` or `cycle_data`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRow {
    /// Snapshot or cycle key.
    pub t0: CycleKey,
    /// Sequence id within the key.
    pub id: i64,
    /// Message text.
    pub message: String,
    /// Status glyph.
    pub symbol: String,
}

/// A row of `debug`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebugRow {
    /// Cycle key.
    pub t0: CycleKey,
    /// Sequence id within the cycle.
    pub id: i64,
    /// Message text.
    pub message: String,
    /// Syslog priority, absent for rows written before priorities existed.
    pub priority: Option<i64>,
}

/// Summary of one suspend cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleRecord {
    /// Suspend start.
    pub t0: CycleKey,
    /// Resume.
    pub t1: CycleKey,
    /// Requested suspend duration in seconds.
    pub requested: i64,
    /// GPIOs reported active.
    pub gpio: Vec<String>,
    /// IRQs that woke the system.
    pub wake_irq: Vec<u32>,
    /// Seconds the kernel reported being suspended.
    pub kernel: f64,
    /// Seconds spent in hardware sleep.
    pub hw: f64,
}

/// A row of `battery`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatteryRow {
    /// Cycle key.
    pub t0: CycleKey,
    /// Power supply name.
    pub name: String,
    /// Energy or charge before suspend.
    pub b0: Option<i64>,
    /// Energy or charge after resume.
    pub b1: Option<i64>,
    /// Full capacity.
    pub full: Option<i64>,
    /// Unit of the three values.
    pub unit: Option<String>,
}

/// A cycle with its battery samples, as returned by range queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleSummary {
    /// Cycle row.
    pub cycle: CycleRecord,
    /// Battery rows sharing the cycle key.
    pub batteries: Vec<BatteryRow>,
}

pub(crate) type MessageRowTuple = (i64, i64, String, String);
pub(crate) type DebugRowTuple = (i64, i64, String, Option<i64>);
pub(crate) type CycleRowTuple = (i64, i64, i64, Option<String>, Option<String>, Option<f64>, Option<f64>);
pub(crate) type BatteryRowTuple = (i64, String, Option<i64>, Option<i64>, Option<i64>, Option<String>);

pub(crate) fn message_row_into_record(row: MessageRowTuple) -> MessageRow {
    let (t0, id, message, symbol) = row;
    MessageRow {
        t0: CycleKey(t0),
        id,
        message,
        symbol,
    }
}

pub(crate) fn debug_row_into_record(row: DebugRowTuple) -> DebugRow {
    let (t0, id, message, priority) = row;
    DebugRow {
        t0: CycleKey(t0),
        id,
        message,
        priority,
    }
}

pub(crate) fn cycle_row_into_record(row: CycleRowTuple) -> CycleRecord {
    let (t0, t1, requested, gpio, wake_irq, kernel, hw) = row;
    CycleRecord {
        t0: CycleKey(t0),
        t1: CycleKey(t1),
        requested,
        gpio: split_list(gpio.as_deref())
            .map(str::to_owned)
            .collect(),
        wake_irq: split_list(wake_irq.as_deref())
            .filter_map(|s| s.parse().ok())
            .collect(),
        kernel: kernel.unwrap_or(0.0),
        hw: hw.unwrap_or(0.0),
    }
}

pub(crate) fn battery_row_into_record(row: BatteryRowTuple) -> BatteryRow {
    let (t0, name, b0, b1, full, unit) = row;
    BatteryRow {
        t0: CycleKey(t0),
        name,
        b0,
        b1,
        full,
        unit,
    }
}

fn split_list(text: Option<&str>) -> impl Iterator<Item = &str> {
    text.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

pub(crate) fn join_list<T: ToString>(items: &[T]) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

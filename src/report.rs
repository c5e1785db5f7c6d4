//! Reports over stored suspend history.
//!
//! [`Report::gather`] reads a key range out of the [`Store`]; a
//! [`ReportRenderer`] turns it into text or JSON.

use std::fmt::Write as _;
use std::str::FromStr;

use anyhow::Result;
use chrono::{Local, NaiveDate, TimeDelta};
use serde::Serialize;

use crate::failures::format_duration;
use crate::store::{BatteryRow, CycleKey, CycleRecord, DebugRow, MessageRow, Store, StoreError};
use crate::symbol::Symbol;

/// Days covered when no start date is given.
pub const DEFAULT_REPORT_DAYS: i64 = 60;

/// Inclusive key range covering whole days.
///
/// `until` defaults to today and `since` to [`DEFAULT_REPORT_DAYS`]
/// before `until`.
pub fn day_range(since: Option<NaiveDate>, until: Option<NaiveDate>) -> (CycleKey, CycleKey) {
    let until = until.unwrap_or_else(|| Local::now().date_naive());
    let since = since.unwrap_or_else(|| {
        until
            .checked_sub_signed(TimeDelta::days(DEFAULT_REPORT_DAYS))
            .unwrap_or(until)
    });
    (day_key(since, 0), day_key(until, 235_959))
}

fn day_key(day: NaiveDate, time: i64) -> CycleKey {
    let date: i64 = day.format("%Y%m%d").to_string().parse().unwrap_or(0);
    CycleKey(date.saturating_mul(1_000_000).saturating_add(time))
}

/// One cycle and everything recorded under its key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleReport {
    /// Cycle summary.
    pub cycle: CycleRecord,
    /// Battery samples.
    pub batteries: Vec<BatteryRow>,
    /// Report findings.
    pub findings: Vec<MessageRow>,
    /// Debug lines, when requested.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub debug: Vec<DebugRow>,
}

/// Everything a report shows.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Report {
    /// Most recent prerequisite snapshot.
    pub prereq: Vec<MessageRow>,
    /// Debug lines of that snapshot, when requested.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub prereq_debug: Vec<DebugRow>,
    /// Cycles in the requested range, oldest first.
    pub cycles: Vec<CycleReport>,
}

impl Report {
    /// Read the report for `since..=until` from `store`.
    ///
    /// # Errors
    ///
    /// Returns an error if a query fails.
    pub async fn gather(
        store: &mut Store,
        since: CycleKey,
        until: CycleKey,
        include_debug: bool,
    ) -> Result<Self, StoreError> {
        let mut report = Self::default();
        if let Some(key) = store.get_last_prereq_ts().await? {
            report.prereq = store.report_prereq(key).await?;
            if include_debug {
                report.prereq_debug = store.report_debug(key).await?;
            }
        }
        for summary in store.report_summary(since, until).await? {
            let key = summary.cycle.t0;
            let findings = store.report_cycle_data(key).await?;
            let debug = if include_debug {
                store.report_debug(key).await?
            } else {
                Vec::new()
            };
            report.cycles.push(CycleReport {
                cycle: summary.cycle,
                batteries: summary.batteries,
                findings,
                debug,
            });
        }
        Ok(report)
    }
}

/// Turns a [`Report`] into output text.
pub trait ReportRenderer {
    /// Render `report`.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    fn render(&self, report: &Report) -> Result<String>;
}

/// Output format selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReportFormat {
    /// Plain text.
    #[default]
    Txt,
    /// JSON document.
    Json,
}

impl ReportFormat {
    /// Renderer for this format.
    pub fn renderer(self) -> Box<dyn ReportRenderer> {
        match self {
            Self::Txt => Box::new(TextRenderer),
            Self::Json => Box::new(JsonRenderer { pretty: true }),
        }
    }
}

impl FromStr for ReportFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "txt" | "text" | "stdout" => Ok(Self::Txt),
            "json" => Ok(Self::Json),
            other => anyhow::bail!("unsupported report format '{other}'"),
        }
    }
}

/// Plain text renderer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextRenderer;

#[allow(clippy::cast_precision_loss)] // stored energies and durations fit f64
fn as_f64(value: i64) -> f64 {
    value as f64
}

fn battery_line(row: &BatteryRow) -> Option<String> {
    let (b0, b1) = (row.b0?, row.b1?);
    let unit = row.unit.as_deref().unwrap_or_default();
    let mut line = format!("Battery {} went from {b0} to {b1} µ{unit}h", row.name);
    if let Some(full) = row.full.filter(|f| *f > 0) {
        let lost = as_f64(b0.saturating_sub(b1)) / as_f64(full) * 100.0;
        let _ = write!(line, " ({lost:.2}% of capacity lost)");
    }
    Some(line)
}

impl ReportRenderer for TextRenderer {
    fn render(&self, report: &Report) -> Result<String> {
        let mut out = String::new();
        if let Some(first) = report.prereq.first() {
            writeln!(out, "Prerequisite checks ({})", first.t0)?;
            for row in &report.prereq {
                writeln!(out, "{} {}", row.symbol, row.message)?;
            }
            for row in &report.prereq_debug {
                let symbol = Symbol::for_priority(row.priority.and_then(|p| u8::try_from(p).ok()));
                writeln!(out, "  {symbol} {}", row.message)?;
            }
            writeln!(out)?;
        }
        if report.cycles.is_empty() {
            writeln!(out, "No suspend cycles recorded in this range")?;
        }
        for (index, cycle) in report.cycles.iter().enumerate() {
            let c = &cycle.cycle;
            writeln!(
                out,
                "Cycle {}: {} -> {} (requested {})",
                index.saturating_add(1),
                c.t0,
                c.t1,
                format_duration(as_f64(c.requested))
            )?;
            if !c.wake_irq.is_empty() {
                let irqs: Vec<String> = c.wake_irq.iter().map(u32::to_string).collect();
                writeln!(out, "  Wakeup IRQs: {}", irqs.join(", "))?;
            }
            if !c.gpio.is_empty() {
                writeln!(out, "  Active GPIOs: {}", c.gpio.join(", "))?;
            }
            for battery in cycle.batteries.iter().filter_map(battery_line) {
                writeln!(out, "  {} {battery}", Symbol::Battery)?;
            }
            for row in &cycle.findings {
                writeln!(out, "  {} {}", row.symbol, row.message)?;
            }
            for row in &cycle.debug {
                let symbol = Symbol::for_priority(row.priority.and_then(|p| u8::try_from(p).ok()));
                writeln!(out, "    {symbol} {}", row.message)?;
            }
        }
        Ok(out)
    }
}

/// JSON renderer.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonRenderer {
    /// Indent the output.
    pub pretty: bool,
}

impl ReportRenderer for JsonRenderer {
    fn render(&self, report: &Report) -> Result<String> {
        let text = if self.pretty {
            serde_json::to_string_pretty(report)?
        } else {
            serde_json::to_string(report)?
        };
        Ok(text)
    }
}

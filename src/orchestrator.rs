//! The suspend cycle state machine.
//!
//! Each cycle walks `Idle → Preparing → Suspending → Analyzing →
//! Persisting` and ends in `Idle`, or `Done` after the last one. Capture
//! steps that fail leave a warning in the debug table and the cycle goes
//! on. Only a failed suspend trigger stops the run; whatever was gathered
//! up to that point is still committed.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use anyhow::{bail, ensure, Context, Result};
use chrono::{DateTime, Local};
use rand::Rng;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::correlator::{Correlator, Finding};
use crate::failures::{format_duration, low_residency, spurious_wakeup, Failure, WAKE_THRESHOLD};
use crate::kernel_log::KernelLog;
use crate::store::{CycleKey, CycleRecord, Store, StoreError};
use crate::symbol::{Symbol, PRIORITY_WARNING};
use crate::system::acpi::set_pm_debug;
use crate::system::{
    program_wakealarm, AcpiTraceGuard, AcpiTracer, PmDebugGuard, SuspendError, SuspendTrigger,
    Sysfs, SystemProbe, ThermalZone, TraceMode,
};

/// Shortest cycle random mode will request, in seconds.
pub const MIN_RANDOM_DURATION: u32 = 4;

/// Where the orchestrator is in the current cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    /// Between cycles.
    Idle,
    /// Taking the pre-suspend snapshot.
    Preparing,
    /// Waiting for the trigger to return.
    Suspending,
    /// Reading the log and post-resume state.
    Analyzing,
    /// Writing the cycle summary.
    Persisting,
    /// The run is over.
    Done,
}

impl fmt::Display for CycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Preparing => "preparing",
            Self::Suspending => "suspending",
            Self::Analyzing => "analyzing",
            Self::Persisting => "persisting",
            Self::Done => "done",
        };
        f.write_str(name)
    }
}

/// Parameters of a test run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSettings {
    /// Number of cycles.
    pub count: u32,
    /// Seconds per cycle, or the maximum in random mode.
    pub duration: u32,
    /// Seconds between cycles, or the maximum in random mode.
    pub wait: u32,
    /// Pick duration and wait at random per cycle.
    pub random: bool,
    /// Trace BIOS debug output instead of `Notify()` events.
    pub bios_debug: bool,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            count: 1,
            duration: 10,
            wait: 4,
            random: false,
            bios_debug: false,
        }
    }
}

impl RunSettings {
    /// Reject settings random mode cannot satisfy.
    ///
    /// # Errors
    ///
    /// Returns an error when random mode has a maximum duration of
    /// [`MIN_RANDOM_DURATION`] seconds or less.
    pub fn validate(&self) -> Result<()> {
        if self.random {
            ensure!(
                self.duration > MIN_RANDOM_DURATION,
                "Invalid max duration {}",
                self.duration
            );
        }
        Ok(())
    }

    /// Duration and wait for the next cycle.
    pub fn plan<R: Rng>(&self, rng: &mut R) -> (u32, u32) {
        if !self.random {
            return (self.duration, self.wait);
        }
        let duration = rng.gen_range(MIN_RANDOM_DURATION..=self.duration.max(MIN_RANDOM_DURATION));
        let wait = if self.wait == 0 {
            0
        } else {
            rng.gen_range(1..=self.wait)
        };
        (duration, wait)
    }
}

/// What one cycle produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleOutcome {
    /// Cycle key.
    pub key: CycleKey,
    /// Requested suspend length in seconds.
    pub requested: u32,
    /// Wall clock seconds from suspend to analysis.
    pub userspace_duration: f64,
    /// Seconds the kernel reported being suspended.
    pub kernel_duration: f64,
    /// Seconds in hardware sleep.
    pub hw_sleep_duration: f64,
    /// IRQs that woke the system.
    pub wake_irqs: Vec<u32>,
    /// GPIOs reported active.
    pub gpios: Vec<String>,
    /// Failures diagnosed for the cycle.
    pub failures: Vec<Failure>,
}

/// What a whole run produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunOutcome {
    /// Completed cycles in order.
    pub cycles: Vec<CycleOutcome>,
    /// Whether Ctrl-C ended the run early.
    pub interrupted: bool,
}

impl RunOutcome {
    /// Every failure of every cycle.
    pub fn failures(&self) -> impl Iterator<Item = &Failure> {
        self.cycles.iter().flat_map(|c| c.failures.iter())
    }
}

/// A run stopped by a failed suspend trigger.
///
/// Carries the cycles finished before the failure so callers can still
/// report them alongside the failed cycle.
#[derive(Debug, thiserror::Error)]
#[error("suspend failed")]
pub struct SuspendFailed {
    /// Key the failed cycle was recorded under.
    pub key: CycleKey,
    /// Cycles completed before the failure.
    pub outcome: RunOutcome,
    /// Why the trigger failed.
    #[source]
    pub source: SuspendError,
}

impl SuspendFailed {
    /// Inclusive key range covering the completed cycles and the failed one.
    pub fn key_range(&self) -> (CycleKey, CycleKey) {
        let first = self.outcome.cycles.first().map_or(self.key, |c| c.key);
        (first, self.key)
    }
}

#[derive(Debug, Default)]
struct Snapshot {
    gpes: BTreeMap<String, u64>,
    thermal: Vec<ThermalZone>,
}

/// Drives suspend cycles and writes their results to a [`Store`].
pub struct Orchestrator {
    store: Store,
    probe: Box<dyn SystemProbe>,
    trigger: Box<dyn SuspendTrigger>,
    log: Option<Box<dyn KernelLog>>,
    sysfs: Sysfs,
    tracer: AcpiTracer,
    correlator: Correlator,
    needs_irq1_workaround: bool,
    state: CycleState,
    snapshot: Snapshot,
    last_suspend: DateTime<Local>,
    key: CycleKey,
    requested: u32,
}

impl Orchestrator {
    /// Orchestrator over the given store, probe and trigger, reading
    /// files under `sysfs`.
    pub fn new(
        store: Store,
        probe: Box<dyn SystemProbe>,
        trigger: Box<dyn SuspendTrigger>,
        sysfs: Sysfs,
    ) -> Self {
        let now = Local::now();
        Self {
            store,
            probe,
            trigger,
            log: None,
            tracer: AcpiTracer::new(sysfs.clone()),
            sysfs,
            correlator: Correlator::new(),
            needs_irq1_workaround: false,
            state: CycleState::Idle,
            snapshot: Snapshot::default(),
            last_suspend: now,
            key: CycleKey::from_datetime(now),
            requested: 0,
        }
    }

    /// Replay this kernel log after every cycle.
    pub fn with_kernel_log(mut self, log: Box<dyn KernelLog>) -> Self {
        self.log = Some(log);
        self
    }

    /// Treat IRQ1 wakeups as the known firmware bug.
    pub fn with_irq1_workaround(mut self, needed: bool) -> Self {
        self.needs_irq1_workaround = needed;
        self
    }

    /// Current state.
    pub fn state(&self) -> CycleState {
        self.state
    }

    /// The store results are written to.
    pub fn store(&mut self) -> &mut Store {
        &mut self.store
    }

    /// Give back the store.
    pub fn into_store(self) -> Store {
        self.store
    }

    fn enter(&mut self, state: CycleState) {
        debug!(from = %self.state, to = %state, "cycle state");
        self.state = state;
    }

    async fn degraded(&mut self, what: &str, err: impl fmt::Display) -> Result<(), StoreError> {
        warn!(error = %err, "unable to capture {what}");
        self.store
            .record_debug(&format!("Unable to capture {what}: {err}"), Some(PRIORITY_WARNING))
            .await
    }

    async fn cycle_data(&mut self, message: &str, symbol: Symbol) -> Result<(), StoreError> {
        self.store.record_cycle_data(message, symbol.as_str()).await
    }

    /// Run the configured number of cycles.
    ///
    /// Ctrl-C during the wait before a cycle ends the run without
    /// starting that cycle.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid settings, a store failure or a failed
    /// suspend trigger.
    pub async fn run(&mut self, settings: &RunSettings) -> Result<RunOutcome> {
        settings.validate()?;
        let mut outcome = RunOutcome::default();
        if settings.count == 0 {
            self.enter(CycleState::Done);
            return Ok(outcome);
        }
        if settings.random {
            info!(
                count = settings.count,
                min_duration = MIN_RANDOM_DURATION,
                max_duration = settings.duration,
                max_wait = settings.wait,
                "running random cycle test"
            );
        } else {
            info!(
                count = settings.count,
                duration = settings.duration,
                wait = settings.wait,
                "running cycle test"
            );
        }

        let mut rng = rand::thread_rng();
        for index in 1..=settings.count {
            let (duration, wait) = settings.plan(&mut rng);
            if !countdown("Suspending system", wait.div_ceil(2), true).await {
                info!("interrupted before cycle {index}");
                outcome.interrupted = true;
                break;
            }

            let trace = self.prepare(duration, settings.bios_debug).await?;
            info!(cycle = index, started = %self.last_suspend, duration, "cycle started");
            if let Err(source) = self.suspend().await {
                drop(trace);
                self.enter(CycleState::Persisting);
                self.cycle_data(&source.to_string(), Symbol::Fail).await?;
                self.store.sync().await?;
                self.enter(CycleState::Done);
                return Err(SuspendFailed {
                    key: self.key,
                    outcome,
                    source,
                }
                .into());
            }
            countdown("Collecting data", wait.div_ceil(2), false).await;

            let cycle = self.analyze().await?;
            drop(trace);
            self.persist(&cycle).await?;
            outcome.cycles.push(cycle);
            self.enter(CycleState::Idle);
        }

        if let Err(e) = self.trigger.finish().await {
            warn!(error = %e, trigger = self.trigger.name(), "trigger cleanup failed");
        }
        self.enter(CycleState::Done);
        Ok(outcome)
    }

    /// Pre-suspend half of a cycle driven by the systemd sleep hook.
    ///
    /// Tracing and power management debug messages stay enabled until
    /// [`Orchestrator::post_hook`] runs.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be stored.
    pub async fn pre_hook(&mut self, duration: u32, bios_debug: bool) -> Result<()> {
        if let Some(guard) = self.prepare(duration, bios_debug).await? {
            guard.keep();
        }
        self.store.sync().await?;
        if let Err(e) = set_pm_debug(&self.sysfs, true) {
            self.degraded("pm_debug_messages", e).await?;
            self.store.sync().await?;
        }
        self.enter(CycleState::Suspending);
        Ok(())
    }

    /// Post-resume half of a hook driven cycle.
    ///
    /// Continues the most recent cycle in the store.
    ///
    /// # Errors
    ///
    /// Returns an error if no cycle was started or the results cannot be
    /// stored.
    pub async fn post_hook(&mut self) -> Result<CycleOutcome> {
        if let Err(e) = set_pm_debug(&self.sysfs, false) {
            warn!(error = %e, "unable to disable pm_debug_messages");
        }
        let Some(key) = self.store.get_last_cycle().await? else {
            bail!("no suspend cycle was started by the pre hook");
        };
        let last_suspend = key
            .to_datetime()
            .with_context(|| format!("cycle key {} is not a timestamp", key.0))?;
        let requested = self
            .store
            .report_cycle(key)
            .await?
            .map_or(0, |c| u32::try_from(c.requested).unwrap_or(0));

        self.key = key;
        self.last_suspend = last_suspend;
        self.requested = requested;
        self.snapshot = Snapshot::default();
        self.store.start_cycle(key).await?;
        if let Err(e) = self.tracer.disable() {
            self.degraded("ACPI tracing state", e).await?;
        }

        let cycle = self.analyze().await?;
        self.persist(&cycle).await?;
        self.enter(CycleState::Done);
        Ok(cycle)
    }

    async fn prepare(&mut self, duration: u32, bios_debug: bool) -> Result<Option<AcpiTraceGuard>> {
        self.enter(CycleState::Preparing);
        self.last_suspend = Local::now();
        self.key = CycleKey::from_datetime(self.last_suspend);
        self.requested = duration;
        self.correlator.reset();
        self.snapshot = Snapshot::default();

        if let Some(log) = self.log.as_deref_mut() {
            if let Err(e) = log.seek_tail(Some(self.last_suspend)) {
                warn!(error = %e, "unable to mark kernel log position");
            }
        }
        self.store.start_cycle(self.key).await?;

        self.capture_batteries().await?;
        self.snapshot.gpes = self.capture_gpes().await?;
        self.capture_lid().await?;
        match self.probe.kernel_cmdline() {
            Ok(cmdline) => {
                self.store
                    .record_debug(&format!("/proc/cmdline: {cmdline}"), None)
                    .await?;
            }
            Err(e) => self.degraded("kernel command line", e).await?,
        }
        for exe in self.probe.compositors() {
            self.store
                .record_debug(&format!("{exe} compositor is running"), None)
                .await?;
        }
        if let Some(lines) = self.probe.power_profile() {
            self.store.record_debug("Power Profiles:", None).await?;
            let last = lines.len().saturating_sub(1);
            for (i, line) in lines.iter().enumerate() {
                let prefix = if i == last { "└─" } else { "│ " };
                self.store
                    .record_debug(&format!("{prefix}{line}"), None)
                    .await?;
            }
        }
        self.snapshot.thermal = self.capture_thermal().await?;

        let mode = if bios_debug {
            TraceMode::Bios
        } else {
            TraceMode::Notify
        };
        let guard = match self.tracer.enable(mode) {
            Ok(guard) => {
                if guard.is_none() {
                    debug!(?mode, "ACPI tracing unavailable");
                }
                guard
            }
            Err(e) => {
                self.degraded("ACPI tracing", e).await?;
                None
            }
        };

        self.store
            .record_cycle(&CycleRecord {
                t0: self.key,
                t1: self.key,
                requested: i64::from(duration),
                gpio: Vec::new(),
                wake_irq: Vec::new(),
                kernel: 0.0,
                hw: 0.0,
            })
            .await?;
        Ok(guard)
    }

    async fn suspend(&mut self) -> Result<(), SuspendError> {
        self.enter(CycleState::Suspending);
        let timer = format!(
            "Suspend timer programmed for {}",
            format_duration(f64::from(self.requested))
        );
        if let Err(e) = self.store.record_debug(&timer, None).await {
            warn!(error = %e, "unable to record suspend timer");
        }
        match program_wakealarm(&self.sysfs, self.requested) {
            Ok(true) => {}
            Ok(false) => {
                let message = "No RTC device found, please manually wake system";
                if let Err(e) = self.cycle_data(message, Symbol::Warn).await {
                    warn!(error = %e, "unable to record missing RTC");
                }
            }
            Err(alarm) => {
                if let Err(e) = self.degraded("RTC wake alarm", alarm).await {
                    warn!(error = %e, "unable to record wake alarm failure");
                }
            }
        }

        let _pm_debug = match PmDebugGuard::enable(&self.sysfs) {
            Ok(guard) => Some(guard),
            Err(e) => {
                debug!(error = %e, "pm_debug_messages unavailable");
                None
            }
        };
        info!(trigger = self.trigger.name(), "suspending");
        self.trigger.suspend().await?;
        info!("resumed");
        Ok(())
    }

    async fn analyze(&mut self) -> Result<CycleOutcome> {
        self.enter(CycleState::Analyzing);
        let resumed = Local::now();
        #[allow(clippy::cast_precision_loss)]
        let userspace = resumed
            .signed_duration_since(self.last_suspend)
            .num_microseconds()
            .map_or(0.0, |us| us as f64 / 1_000_000.0);

        self.correlator.reset();
        if let Some(log) = self.log.as_deref_mut() {
            let correlator = &mut self.correlator;
            let replay = log
                .seek_tail(Some(self.last_suspend))
                .and_then(|()| log.process_callback(&mut |line, priority| correlator.observe(line, priority)));
            if let Err(e) = replay {
                self.degraded("kernel log", e).await?;
            }
        }
        for line in self.correlator.debug_lines().to_vec() {
            self.store.record_debug(&line.message, line.priority).await?;
        }
        for finding in self.correlator.findings(self.needs_irq1_workaround) {
            match finding {
                Finding::CycleData { message, symbol } => self.cycle_data(&message, symbol).await?,
                Finding::Debug { message, priority } => {
                    self.store.record_debug(&message, Some(priority)).await?;
                }
            }
        }
        let mut failures = self.correlator.failures(self.needs_irq1_workaround);

        match self.probe.wakeup_irq() {
            Ok(Some(irq)) => self.store.record_debug(&irq.to_string(), None).await?,
            Ok(None) => {}
            Err(e) => self.degraded("wakeup IRQ", e).await?,
        }
        let after = self.capture_gpes().await?;
        for (name, count) in &after {
            let before = self.snapshot.gpes.get(name).copied().unwrap_or(*count);
            if *count > before {
                self.store
                    .record_debug(&format!("{name} increased from {before} to {count}"), None)
                    .await?;
            }
        }
        self.capture_lid().await?;
        if self.probe.rtc_uses_acpi_alarm() == Some(false) {
            self.cycle_data("`rtc_cmos` not configured to use ACPI alarm", Symbol::Warn)
                .await?;
            failures.push(Failure::RtcAlarmWrong);
        }
        let hw = self.capture_hw_sleep().await?;
        self.capture_batteries().await?;
        self.capture_thermal().await?;

        let kernel = self.correlator.kernel_duration();
        failures.extend(self.analyze_duration(userspace, kernel, hw).await?);

        for failure in &failures {
            self.store
                .record_debug(&failure.to_string(), Some(PRIORITY_WARNING))
                .await?;
        }
        Ok(CycleOutcome {
            key: self.key,
            requested: self.requested,
            userspace_duration: userspace,
            kernel_duration: kernel,
            hw_sleep_duration: hw,
            wake_irqs: self.correlator.wakeup_irqs().to_vec(),
            gpios: self.correlator.active_gpios().to_vec(),
            failures,
        })
    }

    async fn persist(&mut self, cycle: &CycleOutcome) -> Result<()> {
        self.enter(CycleState::Persisting);
        self.store
            .record_cycle(&CycleRecord {
                t0: cycle.key,
                t1: CycleKey::now(),
                requested: i64::from(cycle.requested),
                gpio: cycle.gpios.clone(),
                wake_irq: cycle.wake_irqs.clone(),
                kernel: cycle.kernel_duration,
                hw: cycle.hw_sleep_duration,
            })
            .await?;
        self.store.sync().await.context("committing cycle results")?;
        Ok(())
    }

    async fn analyze_duration(&mut self, userspace: f64, kernel: f64, hw: f64) -> Result<Vec<Failure>, StoreError> {
        let mut failures = Vec::new();
        match spurious_wakeup(self.requested, userspace) {
            None => {
                self.cycle_data(
                    &format!("Userspace suspended for {}", format_duration(userspace)),
                    Symbol::Ok,
                )
                .await?;
            }
            Some(failure) => {
                let minimum = f64::from(self.requested) * WAKE_THRESHOLD;
                self.cycle_data(
                    &format!(
                        "Userspace suspended for {} (< minimum expected {})",
                        format_duration(userspace),
                        format_duration(minimum)
                    ),
                    Symbol::Fail,
                )
                .await?;
                failures.push(failure);
            }
        }
        if userspace <= 0.0 {
            return Ok(failures);
        }

        self.cycle_data(
            &format!(
                "Kernel suspended for total of {} ({:.2}%)",
                format_duration(kernel),
                kernel / userspace * 100.0
            ),
            Symbol::Ok,
        )
        .await?;

        let residency = low_residency(userspace, hw);
        let symbol = if residency.is_some() { Symbol::Fail } else { Symbol::Ok };
        let share = hw / userspace;
        let message = if share > 0.0 {
            format!(
                "In a hardware sleep state for {} ({:.2}%)",
                format_duration(hw),
                share * 100.0
            )
        } else {
            format!("In a hardware sleep state for {}", format_duration(hw))
        };
        self.cycle_data(&message, symbol).await?;
        failures.extend(residency);
        Ok(failures)
    }

    async fn capture_hw_sleep(&mut self) -> Result<f64, StoreError> {
        let hw = match self.probe.last_hw_sleep() {
            Ok(Some(secs)) => secs,
            Ok(None) => {
                self.store
                    .record_debug("HW sleep statistics file is missing", None)
                    .await?;
                self.correlator.hw_sleep_duration()
            }
            Err(e) if e.is_permission_denied() => {
                let message = if self.probe.lockdown() {
                    "Unable to gather hardware sleep data with lockdown engaged"
                } else {
                    "Failed to read hardware sleep data"
                };
                self.cycle_data(message, Symbol::Warn).await?;
                self.correlator.hw_sleep_duration()
            }
            Err(e) => {
                self.degraded("hardware sleep data", e).await?;
                self.correlator.hw_sleep_duration()
            }
        };
        if hw <= 0.0 {
            self.cycle_data("Did not reach hardware sleep state", Symbol::Fail)
                .await?;
        }
        Ok(hw)
    }

    async fn capture_gpes(&mut self) -> Result<BTreeMap<String, u64>, StoreError> {
        match self.probe.gpe_counters() {
            Ok(gpes) => Ok(gpes),
            Err(e) => {
                self.degraded("GPE counters", e).await?;
                Ok(BTreeMap::new())
            }
        }
    }

    async fn capture_lid(&mut self) -> Result<(), StoreError> {
        match self.probe.lid_states() {
            Ok(lids) => {
                for (path, state) in lids {
                    self.store
                        .record_debug(&format!("ACPI Lid ({path}): {state}"), None)
                        .await?;
                }
                Ok(())
            }
            Err(e) => self.degraded("lid state", e).await,
        }
    }

    async fn capture_batteries(&mut self) -> Result<(), StoreError> {
        let batteries = match self.probe.batteries() {
            Ok(b) => b,
            Err(e) => return self.degraded("battery state", e).await,
        };
        for battery in batteries {
            self.store
                .record_debug(
                    &format!(
                        "{} energy level is {} {}",
                        battery.name,
                        battery.energy,
                        battery.unit()
                    ),
                    None,
                )
                .await?;
            self.store
                .record_battery_energy(
                    &battery.name,
                    battery.energy,
                    battery.full,
                    battery.report_unit(),
                )
                .await?;
        }
        Ok(())
    }

    async fn capture_thermal(&mut self) -> Result<Vec<ThermalZone>, StoreError> {
        let zones = match self.probe.thermal_zones() {
            Ok(z) => z,
            Err(e) => {
                self.degraded("thermal zones", e).await?;
                return Ok(Vec::new());
            }
        };
        if zones.is_empty() {
            return Ok(zones);
        }
        self.store.record_debug("Thermal zones", None).await?;
        let last = zones.len().saturating_sub(1);
        for (i, zone) in zones.iter().enumerate() {
            let branch = if i == last { "└─" } else { "├─" };
            self.store
                .record_debug(&format!("{branch}{}", zone.name), None)
                .await?;
            let before = self
                .snapshot
                .thermal
                .iter()
                .find(|z| z.name == zone.name)
                .map(|z| z.temp_c);
            let temp = match before {
                Some(b) if self.state == CycleState::Analyzing => {
                    format!("{b}°C -> {}°C", zone.temp_c)
                }
                _ => format!("{}°C", zone.temp_c),
            };
            self.store.record_debug(&format!(" temp: {temp}"), None).await?;
            for trip in &zone.trips {
                self.store
                    .record_debug(&format!(" {} trip: {}°C", trip.kind, trip.temp_c), None)
                    .await?;
                if zone.temp_c > trip.temp_c {
                    self.cycle_data(
                        &format!(
                            "Thermal zone {} past trip point {}: {}°C",
                            zone.name, trip.kind, trip.temp_c
                        ),
                        Symbol::Thermal,
                    )
                    .await?;
                }
            }
        }
        Ok(zones)
    }
}

/// Sleep for `secs` seconds, logging a countdown.
///
/// When `interruptible`, Ctrl-C cuts the wait short and `false` is
/// returned.
pub async fn countdown(message: &str, secs: u32, interruptible: bool) -> bool {
    if secs == 0 {
        return true;
    }
    info!(seconds = secs, "{message}");
    let sleep = tokio::time::sleep(Duration::from_secs(u64::from(secs)));
    if !interruptible {
        sleep.await;
        return true;
    }
    tokio::select! {
        () = sleep => true,
        _ = tokio::signal::ctrl_c() => false,
    }
}

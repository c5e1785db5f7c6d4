//! Tests for the suspend cycle state machine with a fake trigger.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use amd_s2idle::failures::Failure;
use amd_s2idle::kernel_log::{FileLog, KernelLog};
use amd_s2idle::orchestrator::{CycleState, Orchestrator, RunSettings, SuspendFailed};
use amd_s2idle::store::{MessageRow, Store};
use amd_s2idle::symbol::PRIORITY_WARNING;
use amd_s2idle::system::{SuspendError, SuspendTrigger, Sysfs, SysfsProbe};
use async_trait::async_trait;
use rand::SeedableRng;
use tempfile::TempDir;

const KERNEL_LOG: &str = "PM: suspend entry (s2idle)\n\
amd_pmc: Last suspend in deepest state for 950000us\n\
PM: Timekeeping suspended for 1.000 seconds\n\
amd_gpio AMDI0030:00: GPIO 4 is active: 0x38\n\
PM: Triggering wakeup from IRQ 7\n\
PM: suspend exit\n";

#[derive(Default)]
struct Calls {
    suspends: AtomicUsize,
    finishes: AtomicUsize,
    pm_debug: Mutex<Option<String>>,
}

/// Trigger that pretends to suspend, optionally changing the fake tree
/// the way a real resume would.
struct FakeTrigger {
    root: PathBuf,
    fail: bool,
    delay: Duration,
    mutate: bool,
    calls: Arc<Calls>,
}

impl FakeTrigger {
    fn new(root: &Path, calls: &Arc<Calls>) -> Self {
        Self {
            root: root.to_path_buf(),
            fail: false,
            delay: Duration::ZERO,
            mutate: false,
            calls: Arc::clone(calls),
        }
    }
}

#[async_trait]
impl SuspendTrigger for FakeTrigger {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn suspend(&self) -> Result<(), SuspendError> {
        self.calls.suspends.fetch_add(1, Ordering::SeqCst);
        *self.calls.pm_debug.lock().expect("lock") =
            std::fs::read_to_string(self.root.join("sys/power/pm_debug_messages"))
                .ok()
                .map(|v| v.trim().to_owned());
        if self.fail {
            return Err(SuspendError::NotPermitted("no".to_owned()));
        }
        if self.mutate {
            write(&self.root, "sys/firmware/acpi/interrupts/gpe0A", "5 EN enabled\n");
            write(&self.root, "sys/class/power_supply/BAT0/energy_now", "49000000\n");
            write(&self.root, "sys/class/thermal/thermal_zone0/temp", "50000\n");
        }
        tokio::time::sleep(self.delay).await;
        Ok(())
    }

    async fn finish(&self) -> Result<(), SuspendError> {
        self.calls.finishes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn write(root: &Path, rel: &str, contents: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
    std::fs::write(path, contents).expect("write");
}

struct Fixture {
    dir: TempDir,
}

impl Fixture {
    fn new() -> Self {
        let fx = Self {
            dir: TempDir::new().expect("tempdir"),
        };
        std::fs::create_dir_all(fx.root()).expect("root");
        fx
    }

    fn root(&self) -> PathBuf {
        self.dir.path().join("root")
    }

    fn write(&self, rel: &str, contents: &str) {
        write(&self.root(), rel, contents);
    }

    fn read(&self, rel: &str) -> String {
        std::fs::read_to_string(self.root().join(rel))
            .expect("read")
            .trim()
            .to_owned()
    }

    async fn orchestrator(&self, trigger: FakeTrigger) -> Orchestrator {
        let store = Store::open(&self.dir.path().join("data.db")).await.expect("store");
        let sysfs = Sysfs::new(self.root());
        let log: Box<dyn KernelLog> = Box::new(FileLog::from_text(KERNEL_LOG.to_owned()));
        Orchestrator::new(
            store,
            Box::new(SysfsProbe::new(sysfs.clone())),
            Box::new(trigger),
            sysfs,
        )
        .with_kernel_log(log)
    }
}

fn has(rows: &[MessageRow], symbol: &str, message: &str) -> bool {
    rows.iter().any(|r| r.symbol == symbol && r.message == message)
}

fn settings(duration: u32) -> RunSettings {
    RunSettings {
        count: 1,
        duration,
        wait: 0,
        random: false,
        bios_debug: false,
    }
}

#[tokio::test]
async fn immediate_wake_is_spurious() {
    let fx = Fixture::new();
    let calls = Arc::new(Calls::default());
    let mut orch = fx.orchestrator(FakeTrigger::new(&fx.root(), &calls)).await;

    let outcome = orch.run(&settings(10)).await.expect("run");
    assert_eq!(orch.state(), CycleState::Done);
    assert!(!outcome.interrupted);
    assert_eq!(calls.suspends.load(Ordering::SeqCst), 1);
    assert_eq!(calls.finishes.load(Ordering::SeqCst), 1);

    let cycle = &outcome.cycles[0];
    assert_eq!(cycle.requested, 10);
    assert_eq!(cycle.wake_irqs, [7]);
    assert_eq!(cycle.gpios, ["4"]);
    assert_eq!(cycle.kernel_duration, 1.0);
    assert!((cycle.hw_sleep_duration - 0.95).abs() < 1e-9);
    assert!(matches!(
        cycle.failures.as_slice(),
        [Failure::SpuriousWakeup { requested: 10, .. }]
    ));

    let mut store = orch.into_store();
    let stored = store.report_cycle(cycle.key).await.expect("cycle").expect("row");
    assert_eq!(stored.requested, 10);
    assert_eq!(stored.wake_irq, [7]);
    assert_eq!(stored.gpio, ["4"]);

    let rows = store.report_cycle_data(cycle.key).await.expect("rows");
    assert!(has(&rows, "🚦", "No RTC device found, please manually wake system"));
    assert!(has(&rows, "💤", "Hardware sleep cycle count: 1"));
    assert!(rows
        .iter()
        .any(|r| r.symbol == "❌" && r.message.starts_with("Userspace suspended for")));

    let debug = store.report_debug(cycle.key).await.expect("debug");
    assert!(debug.iter().any(|r| r.message == "PM: Triggering wakeup from IRQ 7"));
    let spurious = cycle.failures[0].to_string();
    assert!(debug
        .iter()
        .any(|r| r.priority == Some(i64::from(PRIORITY_WARNING)) && r.message == spurious));
}

#[tokio::test]
async fn full_length_cycle_has_no_failures() {
    let fx = Fixture::new();
    fx.write("sys/class/rtc/rtc0/wakealarm", "");
    let calls = Arc::new(Calls::default());
    let mut trigger = FakeTrigger::new(&fx.root(), &calls);
    trigger.delay = Duration::from_millis(1100);
    let mut orch = fx.orchestrator(trigger).await;

    let outcome = orch.run(&settings(1)).await.expect("run");
    let cycle = &outcome.cycles[0];
    assert!(cycle.failures.is_empty(), "failures: {:?}", cycle.failures);
    assert!(cycle.userspace_duration >= 1.0);
    assert_eq!(fx.read("sys/class/rtc/rtc0/wakealarm"), "+1");

    let mut store = orch.into_store();
    let rows = store.report_cycle_data(cycle.key).await.expect("rows");
    assert!(rows
        .iter()
        .any(|r| r.symbol == "✅" && r.message.starts_with("Userspace suspended for 0:00:01")));
    assert!(rows
        .iter()
        .any(|r| r.symbol == "✅" && r.message.starts_with("In a hardware sleep state for 0:00:00.950000")));
}

#[tokio::test]
async fn device_changes_are_reported() {
    let fx = Fixture::new();
    fx.write("sys/firmware/acpi/interrupts/gpe0A", "3 EN enabled\n");
    fx.write("sys/class/power_supply/BAT0/type", "Battery\n");
    fx.write("sys/class/power_supply/BAT0/energy_now", "50000000\n");
    fx.write("sys/class/power_supply/BAT0/energy_full", "60000000\n");
    fx.write("sys/class/thermal/thermal_zone0/type", "acpitz\n");
    fx.write("sys/class/thermal/thermal_zone0/temp", "40000\n");
    fx.write("sys/class/thermal/thermal_zone0/trip_point_0_type", "passive\n");
    fx.write("sys/class/thermal/thermal_zone0/trip_point_0_temp", "45000\n");
    fx.write("sys/module/rtc_cmos/parameters/use_acpi_alarm", "N\n");
    fx.write("sys/power/pm_debug_messages", "0\n");

    let calls = Arc::new(Calls::default());
    let mut trigger = FakeTrigger::new(&fx.root(), &calls);
    trigger.mutate = true;
    let mut orch = fx.orchestrator(trigger).await;

    let outcome = orch.run(&settings(10)).await.expect("run");
    let cycle = &outcome.cycles[0];
    assert!(cycle.failures.contains(&Failure::RtcAlarmWrong));
    assert_eq!(calls.pm_debug.lock().expect("lock").as_deref(), Some("1"));
    assert_eq!(fx.read("sys/power/pm_debug_messages"), "0");

    let mut store = orch.into_store();
    let debug = store.report_debug(cycle.key).await.expect("debug");
    let messages: Vec<&str> = debug.iter().map(|r| r.message.as_str()).collect();
    assert!(messages.contains(&"gpe0A increased from 3 to 5"));
    assert!(messages.contains(&"BAT0 energy level is 50000000 µWh"));
    assert!(messages.contains(&"BAT0 energy level is 49000000 µWh"));
    assert!(messages.contains(&" temp: 40°C"));
    assert!(messages.contains(&" temp: 40°C -> 50°C"));
    assert!(messages.contains(&" passive trip: 45°C"));

    let batteries = store.report_battery(cycle.key).await.expect("battery");
    assert_eq!(batteries[0].b0, Some(50_000_000));
    assert_eq!(batteries[0].b1, Some(49_000_000));

    let rows = store.report_cycle_data(cycle.key).await.expect("rows");
    assert!(has(&rows, "🌡️", "Thermal zone acpitz past trip point passive: 45°C"));
    assert!(has(&rows, "🚦", "`rtc_cmos` not configured to use ACPI alarm"));
}

#[tokio::test]
async fn probe_errors_degrade_instead_of_aborting() {
    let fx = Fixture::new();
    fx.write("sys/class/thermal/thermal_zone0/temp", "bogus\n");
    let calls = Arc::new(Calls::default());
    let mut orch = fx.orchestrator(FakeTrigger::new(&fx.root(), &calls)).await;

    let outcome = orch.run(&settings(10)).await.expect("run");
    let key = outcome.cycles[0].key;
    let mut store = orch.into_store();
    let debug = store.report_debug(key).await.expect("debug");
    assert!(debug.iter().any(|r| r.priority == Some(i64::from(PRIORITY_WARNING))
        && r.message.starts_with("Unable to capture thermal zones:")));
}

#[tokio::test]
async fn failed_suspend_is_persisted_and_returned() {
    let fx = Fixture::new();
    let calls = Arc::new(Calls::default());
    let mut trigger = FakeTrigger::new(&fx.root(), &calls);
    trigger.fail = true;
    let mut orch = fx.orchestrator(trigger).await;

    let err = orch.run(&settings(10)).await.unwrap_err();
    assert!(format!("{err:#}").contains("suspend failed"));
    assert!(format!("{err:#}").contains("CanSuspend=no"));
    assert_eq!(orch.state(), CycleState::Done);
    assert_eq!(calls.finishes.load(Ordering::SeqCst), 0);

    let failed = err.downcast_ref::<SuspendFailed>().expect("suspend failure");
    assert!(failed.outcome.cycles.is_empty());

    let mut store = orch.into_store();
    let key = store.get_last_cycle().await.expect("last").expect("cycle");
    assert_eq!(failed.key_range(), (key, key));
    let rows = store.report_cycle_data(key).await.expect("rows");
    assert!(has(
        &rows,
        "❌",
        "Unable to suspend: logind reports CanSuspend=no"
    ));
}

#[tokio::test]
async fn zero_count_runs_nothing() {
    let fx = Fixture::new();
    let calls = Arc::new(Calls::default());
    let mut orch = fx.orchestrator(FakeTrigger::new(&fx.root(), &calls)).await;
    let mut settings = settings(10);
    settings.count = 0;
    let outcome = orch.run(&settings).await.expect("run");
    assert!(outcome.cycles.is_empty());
    assert_eq!(orch.state(), CycleState::Done);
    assert_eq!(calls.suspends.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn random_mode_rejects_short_maximum() {
    let fx = Fixture::new();
    let calls = Arc::new(Calls::default());
    let mut orch = fx.orchestrator(FakeTrigger::new(&fx.root(), &calls)).await;
    let settings = RunSettings {
        random: true,
        duration: 4,
        ..RunSettings::default()
    };
    let err = orch.run(&settings).await.unwrap_err();
    assert_eq!(err.to_string(), "Invalid max duration 4");
    assert_eq!(calls.suspends.load(Ordering::SeqCst), 0);
}

#[test]
fn plan_respects_bounds() {
    let mut rng = rand::rngs::StdRng::seed_from_u64(7);
    let fixed = RunSettings::default();
    assert_eq!(fixed.plan(&mut rng), (10, 4));

    let random = RunSettings {
        random: true,
        duration: 30,
        wait: 5,
        ..RunSettings::default()
    };
    for _ in 0..200 {
        let (duration, wait) = random.plan(&mut rng);
        assert!((4..=30).contains(&duration));
        assert!((1..=5).contains(&wait));
    }

    let no_wait = RunSettings {
        wait: 0,
        ..random
    };
    assert_eq!(no_wait.plan(&mut rng).1, 0);
}

#[tokio::test]
async fn hooks_split_a_cycle() {
    let fx = Fixture::new();
    for (key, value) in [
        ("trace_debug_layer", "0x0\n"),
        ("trace_debug_level", "0x0\n"),
        ("trace_method_name", "(null)\n"),
        ("trace_state", "disable\n"),
    ] {
        fx.write(&format!("sys/module/acpi/parameters/{key}"), value);
    }
    fx.write("sys/power/pm_debug_messages", "0\n");
    let calls = Arc::new(Calls::default());

    let mut pre = fx.orchestrator(FakeTrigger::new(&fx.root(), &calls)).await;
    pre.pre_hook(30, false).await.expect("pre hook");
    assert_eq!(pre.state(), CycleState::Suspending);
    assert_eq!(fx.read("sys/module/acpi/parameters/trace_state"), "enable");
    assert_eq!(fx.read("sys/power/pm_debug_messages"), "1");
    let mut store = pre.into_store();
    let key = store.get_last_cycle().await.expect("last").expect("cycle");
    store.close().await.expect("close");

    let mut post = fx.orchestrator(FakeTrigger::new(&fx.root(), &calls)).await;
    let cycle = post.post_hook().await.expect("post hook");
    assert_eq!(cycle.key, key);
    assert_eq!(cycle.requested, 30);
    assert_eq!(cycle.wake_irqs, [7]);
    assert_eq!(fx.read("sys/module/acpi/parameters/trace_state"), "disable");
    assert_eq!(fx.read("sys/power/pm_debug_messages"), "0");
    assert_eq!(calls.suspends.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn post_hook_without_cycle_fails() {
    let fx = Fixture::new();
    let calls = Arc::new(Calls::default());
    let mut orch = fx.orchestrator(FakeTrigger::new(&fx.root(), &calls)).await;
    let err = orch.post_hook().await.unwrap_err();
    assert!(err.to_string().contains("no suspend cycle"));
}

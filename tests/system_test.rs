//! Tests for sysfs probing, tracer toggles and suspend triggers.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use amd_s2idle::system::cpu::{iommu_affected, parse_cpuinfo, pc6_cc6_enabled, unsupported_model};
use amd_s2idle::system::suspend::{parse_busctl_bool, parse_busctl_string};
use amd_s2idle::system::{
    irq1_workaround_needed, pci_devices, program_wakealarm, soc_needs_irq1_wa, AcpiTracer, LogindSuspend, PmDebugGuard, ProbeError,
    SuspendError, SuspendTrigger, SysfsProbe, SysfsSuspend, Sysfs, SystemProbe, TraceMode,
};
use tempfile::TempDir;

struct Tree {
    dir: TempDir,
}

impl Tree {
    fn new() -> Self {
        Self {
            dir: TempDir::new().expect("tempdir"),
        }
    }

    fn sysfs(&self) -> Sysfs {
        Sysfs::new(self.dir.path())
    }

    fn path(&self, rel: &str) -> PathBuf {
        self.dir.path().join(rel.trim_start_matches('/'))
    }

    fn write(&self, rel: &str, contents: &str) {
        let path = self.path(rel);
        std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        std::fs::write(path, contents).expect("write");
    }

    fn read(&self, rel: &str) -> String {
        std::fs::read_to_string(self.path(rel)).expect("read")
    }

    fn tracer_params(&self) {
        for (key, value) in [
            ("trace_debug_layer", "0x0\n"),
            ("trace_debug_level", "0x0\n"),
            ("trace_method_name", "(null)\n"),
            ("trace_state", "disable\n"),
        ] {
            self.write(&format!("/sys/module/acpi/parameters/{key}"), value);
        }
    }
}

fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write script");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).expect("chmod");
    path
}

#[test]
fn cpuinfo_first_block_only() {
    let text = "processor\t: 0\nvendor_id\t: AuthenticAMD\ncpu family\t: 26\nmodel\t\t: 36\nmodel name\t: AMD Ryzen AI 9 HX 370\n\nprocessor\t: 1\nvendor_id\t: GenuineIntel\n";
    let cpu = parse_cpuinfo(text).expect("cpu");
    assert!(cpu.is_amd());
    assert_eq!((cpu.family, cpu.model), (0x1A, 0x24));
    assert_eq!(cpu.model_name, "AMD Ryzen AI 9 HX 370");
    assert!(iommu_affected(cpu.family, cpu.model));
    assert_eq!(parse_cpuinfo("nothing here"), None);
}

#[test]
fn model_tables() {
    assert!(unsupported_model(0x17, 0x31));
    assert!(unsupported_model(0x19, 0x08));
    assert!(!unsupported_model(0x19, 0x74));

    assert!(soc_needs_irq1_wa(0x17, 0x68, ""));
    assert!(soc_needs_irq1_wa(0x19, 0x50, "64.65.0"));
    assert!(!soc_needs_irq1_wa(0x19, 0x50, "64.66.0"));
    assert!(!soc_needs_irq1_wa(0x19, 0x50, "garbage"));
    assert!(!soc_needs_irq1_wa(0x19, 0x74, "1.0.0"));
}

#[test]
fn irq1_workaround_follows_cpu_and_smu_firmware() {
    let tree = Tree::new();
    assert!(!irq1_workaround_needed(&tree.sysfs()));

    tree.write(
        "/proc/cpuinfo",
        "vendor_id\t: AuthenticAMD\ncpu family\t: 25\nmodel\t\t: 80\nmodel name\t: AMD Ryzen 7 5800U\n",
    );
    tree.write("/sys/bus/platform/drivers/amd_pmc/AMDI0005:00/smu_fw_version", "64.65.0\n");
    assert!(irq1_workaround_needed(&tree.sysfs()));

    tree.write("/sys/bus/platform/drivers/amd_pmc/AMDI0005:00/smu_fw_version", "64.66.0\n");
    assert!(!irq1_workaround_needed(&tree.sysfs()));
}

#[test]
fn pci_functions_report_class_and_driver() {
    let tree = Tree::new();
    tree.write("/sys/bus/pci/devices/0000:c4:00.0/class", "0x030000\n");
    tree.write("/sys/bus/pci/devices/0000:c4:00.0/vendor", "0x1002\n");
    tree.write("/sys/bus/pci/devices/0000:c4:00.0/device", "0x15bf\n");
    std::os::unix::fs::symlink(
        "../../../bus/pci/drivers/amdgpu",
        tree.path("/sys/bus/pci/devices/0000:c4:00.0/driver"),
    )
    .expect("symlink");
    tree.write("/sys/bus/pci/devices/0000:c5:00.0/class", "0x0c0340\n");
    tree.write("/sys/bus/pci/devices/0000:c5:00.0/vendor", "0x1022\n");
    tree.write("/sys/bus/pci/devices/0000:c6:00.0/vendor", "0x1022\n");

    let devices = pci_devices(&tree.sysfs());
    assert_eq!(devices.len(), 2);
    assert_eq!(devices[0].slot, "0000:c4:00.0");
    assert!(devices[0].is_amd_gpu());
    assert_eq!(devices[0].device, 0x15bf);
    assert_eq!(devices[0].driver.as_deref(), Some("amdgpu"));
    assert_eq!(devices[1].class, 0x0C_0340);
    assert_eq!(devices[1].driver, None);
}

#[test]
fn pc6_and_cc6_masks() {
    assert!(pc6_cc6_enabled(1 << 32, 1 << 22));
    assert!(!pc6_cc6_enabled(0, 1 << 22));
    assert!(!pc6_cc6_enabled(1 << 32, 1 << 5));
}

#[test]
fn busctl_reply_parsing() {
    assert_eq!(parse_busctl_string("s \"yes\""), "yes");
    assert_eq!(parse_busctl_string("challenge"), "challenge");
    assert!(parse_busctl_bool("b true"));
    assert!(!parse_busctl_bool("b false"));
}

#[test]
fn sysfs_errors_are_classified() {
    let tree = Tree::new();
    tree.write("/sys/x/value", "abc\n");
    let sysfs = tree.sysfs();
    assert!(sysfs.read("/sys/missing").unwrap_err().is_not_found());
    assert!(matches!(
        sysfs.read_int("/sys/x/value"),
        Err(ProbeError::Malformed { .. })
    ));
    assert_eq!(sysfs.read("/sys/x/value").expect("read"), "abc");
    assert!(sysfs.list_dir("/sys/none").is_empty());
}

#[test]
fn notify_tracing_restores_original_values() {
    let tree = Tree::new();
    tree.tracer_params();
    let tracer = AcpiTracer::new(tree.sysfs());
    assert!(tracer.supported());
    assert!(!tracer.original().contains_key("trace_method_name"));

    {
        let guard = tracer.enable(TraceMode::Notify).expect("enable");
        assert!(guard.is_some());
        assert_eq!(tree.read("/sys/module/acpi/parameters/trace_state"), "enable");
        assert_eq!(tree.read("/sys/module/acpi/parameters/trace_debug_layer"), "4");
    }
    assert_eq!(tree.read("/sys/module/acpi/parameters/trace_state"), "disable");
    assert_eq!(tree.read("/sys/module/acpi/parameters/trace_debug_layer"), "0x0");
}

#[test]
fn kept_guard_leaves_tracing_enabled() {
    let tree = Tree::new();
    tree.tracer_params();
    let tracer = AcpiTracer::new(tree.sysfs());
    tracer
        .enable(TraceMode::Notify)
        .expect("enable")
        .expect("guard")
        .keep();
    assert_eq!(tree.read("/sys/module/acpi/parameters/trace_state"), "enable");
    assert!(tracer.disable().expect("disable"));
    assert_eq!(tree.read("/sys/module/acpi/parameters/trace_state"), "disable");
}

#[test]
fn bios_tracing_needs_the_method() {
    let tree = Tree::new();
    tree.tracer_params();
    let tracer = AcpiTracer::new(tree.sysfs());
    assert!(tracer.enable(TraceMode::Bios).expect("enable").is_none());

    tree.write("/sys/firmware/acpi/tables/SSDT3", "....M460....");
    assert!(tracer.bios_trace_available());
    let guard = tracer.enable(TraceMode::Bios).expect("enable").expect("guard");
    assert_eq!(tree.read("/sys/module/acpi/parameters/trace_method_name"), "\\M460");
    assert_eq!(tree.read("/sys/module/acpi/parameters/trace_state"), "method");
    guard.finish().expect("finish");
    assert_eq!(tree.read("/sys/module/acpi/parameters/trace_state"), "disable");
}

#[test]
fn tracer_without_parameters_is_unsupported() {
    let tree = Tree::new();
    let tracer = AcpiTracer::new(tree.sysfs());
    assert!(!tracer.supported());
    assert!(tracer.enable(TraceMode::Notify).expect("enable").is_none());
    assert!(!tracer.disable().expect("disable"));
}

#[test]
fn pm_debug_guard_restores_previous_value() {
    let tree = Tree::new();
    tree.write("/sys/power/pm_debug_messages", "0\n");
    {
        let _guard = PmDebugGuard::enable(&tree.sysfs()).expect("enable");
        assert_eq!(tree.read("/sys/power/pm_debug_messages"), "1");
    }
    assert_eq!(tree.read("/sys/power/pm_debug_messages"), "0");
}

#[test]
fn sysfs_reads_batteries() {
    let tree = Tree::new();
    tree.write("/sys/class/power_supply/AC/type", "Mains\n");
    tree.write("/sys/class/power_supply/BAT0/type", "Battery\n");
    tree.write("/sys/class/power_supply/BAT0/energy_now", "41000000\n");
    tree.write("/sys/class/power_supply/BAT0/energy_full", "52000000\n");
    tree.write("/sys/class/power_supply/BAT1/type", "Battery\n");
    tree.write("/sys/class/power_supply/BAT1/charge_now", "3000000\n");
    tree.write("/sys/class/power_supply/BAT1/charge_full", "4000000\n");

    let batteries = SysfsProbe::new(tree.sysfs()).batteries().expect("batteries");
    assert_eq!(batteries.len(), 2);
    assert_eq!(batteries[0].name, "BAT0");
    assert_eq!((batteries[0].energy, batteries[0].full), (41_000_000, 52_000_000));
    assert_eq!(batteries[0].report_unit(), "W");
    assert_eq!(batteries[1].unit(), "µAh");
}

#[test]
fn sysfs_reads_gpes_and_lid() {
    let tree = Tree::new();
    tree.write("/sys/firmware/acpi/interrupts/gpe0A", "    12  EN enabled      unmasked\n");
    tree.write("/sys/firmware/acpi/interrupts/gpe_all", "99\n");
    tree.write("/sys/firmware/acpi/interrupts/sci", "99\n");
    tree.write("/proc/acpi/button/lid/LID0/state", "state:      open\n");

    let probe = SysfsProbe::new(tree.sysfs());
    let gpes = probe.gpe_counters().expect("gpes");
    assert_eq!(gpes.len(), 1);
    assert_eq!(gpes.get("gpe0A"), Some(&12));
    assert_eq!(
        probe.lid_states().expect("lid"),
        [("/proc/acpi/button/lid/LID0/state".to_owned(), "open".to_owned())]
    );
}

#[test]
fn sysfs_reads_thermal_zones() {
    let tree = Tree::new();
    tree.write("/sys/class/thermal/thermal_zone0/type", "acpitz\n");
    tree.write("/sys/class/thermal/thermal_zone0/temp", "45500\n");
    tree.write("/sys/class/thermal/thermal_zone0/trip_point_0_type", "critical\n");
    tree.write("/sys/class/thermal/thermal_zone0/trip_point_0_temp", "105000\n");
    tree.write("/sys/class/thermal/cooling_device0/type", "Processor\n");

    let zones = SysfsProbe::new(tree.sysfs()).thermal_zones().expect("zones");
    assert_eq!(zones.len(), 1);
    assert_eq!(zones[0].name, "acpitz");
    assert_eq!(zones[0].temp_c, 45.5);
    assert_eq!(zones[0].trips[0].kind, "critical");
    assert_eq!(zones[0].trips[0].temp_c, 105.0);
}

#[test]
fn sysfs_reads_wake_irq_and_hw_sleep() {
    let tree = Tree::new();
    let probe = SysfsProbe::new(tree.sysfs());
    assert_eq!(probe.wakeup_irq().expect("irq"), None);
    assert_eq!(probe.last_hw_sleep().expect("hw"), None);

    tree.write("/sys/power/pm_wakeup_irq", "9\n");
    for (name, value) in [
        ("chip_name", "IR-IO-APIC"),
        ("hwirq", "9"),
        ("name", "fasteoi"),
        ("actions", "acpi"),
    ] {
        tree.write(&format!("/sys/kernel/irq/9/{name}"), value);
    }
    let irq = probe.wakeup_irq().expect("irq").expect("some");
    assert_eq!(irq.to_string(), "Woke up from IRQ 9 (IR-IO-APIC 9-fasteoi acpi)");

    tree.write(
        "/sys/kernel/debug/amd_pmc/smu_fw_info",
        "Last S0i3 Status: Success\nTime (in us) in S0i3: 2500000\n",
    );
    assert_eq!(probe.last_hw_sleep().expect("hw"), Some(2.5));
    tree.write("/sys/power/suspend_stats/last_hw_sleep", "9000000\n");
    assert_eq!(probe.last_hw_sleep().expect("hw"), Some(9.0));
}

#[test]
fn sysfs_reads_rtc_and_lockdown() {
    let tree = Tree::new();
    let probe = SysfsProbe::new(tree.sysfs());
    assert_eq!(probe.rtc_uses_acpi_alarm(), None);
    assert!(!probe.lockdown());

    tree.write("/sys/module/rtc_cmos/parameters/use_acpi_alarm", "N\n");
    tree.write("/sys/kernel/security/lockdown", "none [integrity] confidentiality\n");
    assert_eq!(probe.rtc_uses_acpi_alarm(), Some(false));
    assert!(probe.lockdown());

    tree.write("/sys/kernel/security/lockdown", "[none] integrity confidentiality\n");
    assert!(!probe.lockdown());
}

#[test]
fn wakealarm_is_cleared_then_armed() {
    let tree = Tree::new();
    assert!(!program_wakealarm(&tree.sysfs(), 10).expect("no rtc"));

    tree.write("/sys/class/rtc/rtc0/wakealarm", "");
    assert!(program_wakealarm(&tree.sysfs(), 10).expect("rtc"));
    assert_eq!(tree.read("/sys/class/rtc/rtc0/wakealarm"), "+10\n");
}

#[tokio::test]
async fn sysfs_suspend_writes_mem() {
    let tree = Tree::new();
    tree.write("/sys/power/state", "");
    tree.write("/proc/driver/nvidia/suspend", "");
    let trigger = SysfsSuspend::new(tree.sysfs());
    assert_eq!(trigger.name(), "sysfs");
    trigger.suspend().await.expect("suspend");
    assert_eq!(tree.read("/sys/power/state"), "mem");
    assert_eq!(tree.read("/proc/driver/nvidia/suspend"), "resume");
}

#[tokio::test]
async fn sysfs_suspend_reports_state_write_failure() {
    let tree = Tree::new();
    tree.write("/sys/power/wakeup_count", "7\n");
    let trigger = SysfsSuspend::new(tree.sysfs());
    match trigger.suspend().await {
        Err(SuspendError::StateWrite { old, new, .. }) => assert_eq!((old, new), (7, 7)),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn logind_refusal_is_reported() {
    let dir = TempDir::new().expect("tempdir");
    let busctl = script(dir.path(), "busctl", "echo 's \"challenge\"'");
    let trigger = LogindSuspend::new(busctl);
    assert_eq!(trigger.name(), "logind");
    match trigger.suspend().await {
        Err(SuspendError::NotPermitted(reply)) => assert_eq!(reply, "challenge"),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn logind_failure_carries_stderr() {
    let dir = TempDir::new().expect("tempdir");
    let busctl = script(dir.path(), "busctl", "echo 'Access denied' >&2\nexit 1");
    match LogindSuspend::new(busctl).suspend().await {
        Err(SuspendError::Logind(message)) => assert_eq!(message, "Access denied"),
        other => panic!("unexpected {other:?}"),
    }
}

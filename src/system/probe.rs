//! Snapshots of device state taken around a suspend cycle.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::{file_name, read_trimmed, ProbeError, Sysfs};

/// Compositors whose presence is worth noting in a cycle's debug data.
pub const KNOWN_COMPOSITORS: [&str; 4] = ["kwin_wayland", "gnome-shell", "cosmic-session", "hyprland"];

/// One battery reading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Battery {
    /// Power supply name, e.g. `BAT0`.
    pub name: String,
    /// Current energy (µWh) or charge (µAh).
    pub energy: i64,
    /// Capacity when full, same unit.
    pub full: i64,
    /// Whether the values are energy rather than charge.
    pub energy_based: bool,
}

impl Battery {
    /// Unit of `energy` and `full` as the kernel reports them.
    pub fn unit(&self) -> &'static str {
        if self.energy_based {
            "µWh"
        } else {
            "µAh"
        }
    }

    /// Short unit stored with battery samples.
    pub fn report_unit(&self) -> &'static str {
        if self.energy_based {
            "W"
        } else {
            "A"
        }
    }
}

/// A thermal trip point.
#[derive(Debug, Clone, PartialEq)]
pub struct TripPoint {
    /// Trip type, e.g. `critical`.
    pub kind: String,
    /// Trip temperature in °C.
    pub temp_c: f64,
}

/// One thermal zone reading.
#[derive(Debug, Clone, PartialEq)]
pub struct ThermalZone {
    /// Zone name.
    pub name: String,
    /// Current temperature in °C.
    pub temp_c: f64,
    /// Trip points in index order.
    pub trips: Vec<TripPoint>,
}

/// Descriptor of the IRQ that woke the system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WakeIrq {
    /// IRQ number.
    pub irq: String,
    /// Interrupt controller.
    pub chip_name: String,
    /// Hardware IRQ number on the controller.
    pub hwirq: String,
    /// Flow handler name.
    pub name: String,
    /// Registered handlers.
    pub actions: String,
}

impl fmt::Display for WakeIrq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Woke up from IRQ {} ({} {}-{} {})",
            self.irq, self.chip_name, self.hwirq, self.name, self.actions
        )
    }
}

/// Device state read around a suspend cycle.
///
/// Every method is a snapshot; callers diff successive snapshots
/// themselves.
pub trait SystemProbe: Send + Sync {
    /// ACPI GPE interrupt counters by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the counters cannot be listed.
    fn gpe_counters(&self) -> Result<BTreeMap<String, u64>, ProbeError>;

    /// Lid switches as (path, state).
    ///
    /// # Errors
    ///
    /// Returns an error if a lid state file cannot be read.
    fn lid_states(&self) -> Result<Vec<(String, String)>, ProbeError>;

    /// Batteries present.
    ///
    /// # Errors
    ///
    /// Returns an error if a battery cannot be read.
    fn batteries(&self) -> Result<Vec<Battery>, ProbeError>;

    /// Thermal zones.
    ///
    /// # Errors
    ///
    /// Returns an error if a zone cannot be read.
    fn thermal_zones(&self) -> Result<Vec<ThermalZone>, ProbeError>;

    /// The IRQ that caused the last wakeup.
    ///
    /// # Errors
    ///
    /// Returns an error if the IRQ descriptor cannot be read.
    fn wakeup_irq(&self) -> Result<Option<WakeIrq>, ProbeError>;

    /// Seconds of hardware sleep in the last cycle.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::PermissionDenied`] when only the debugfs
    /// source exists and is locked down.
    fn last_hw_sleep(&self) -> Result<Option<f64>, ProbeError>;

    /// Whether `rtc_cmos` uses the ACPI alarm, if the parameter exists.
    fn rtc_uses_acpi_alarm(&self) -> Option<bool>;

    /// The kernel command line.
    ///
    /// # Errors
    ///
    /// Returns an error if `/proc/cmdline` cannot be read.
    fn kernel_cmdline(&self) -> Result<String, ProbeError>;

    /// Known compositors currently running.
    fn compositors(&self) -> Vec<String>;

    /// Output of `powerprofilesctl`, one entry per non-empty line.
    fn power_profile(&self) -> Option<Vec<String>>;

    /// Whether the kernel is locked down.
    fn lockdown(&self) -> bool;
}

/// [`SystemProbe`] reading the live system under a [`Sysfs`] root.
#[derive(Debug, Clone, Default)]
pub struct SysfsProbe {
    sysfs: Sysfs,
}

impl SysfsProbe {
    /// Probe the tree under `sysfs`.
    pub fn new(sysfs: Sysfs) -> Self {
        Self { sysfs }
    }

    /// The root being probed.
    pub fn sysfs(&self) -> &Sysfs {
        &self.sysfs
    }

    fn supply_value(&self, dir: &Path, key: &str) -> Option<i64> {
        read_trimmed(&dir.join(key)).ok()?.parse().ok()
    }
}

impl SystemProbe for SysfsProbe {
    fn gpe_counters(&self) -> Result<BTreeMap<String, u64>, ProbeError> {
        let mut out = BTreeMap::new();
        for path in self.sysfs.list_dir("/sys/firmware/acpi/interrupts") {
            let name = file_name(&path);
            if !name.starts_with("gpe") || name == "gpe_all" {
                continue;
            }
            let text = read_trimmed(&path)?;
            let count = text
                .split_whitespace()
                .next()
                .and_then(|t| t.parse().ok())
                .ok_or_else(|| ProbeError::Malformed {
                    path: path.clone(),
                    detail: format!("no counter in {text:?}"),
                })?;
            out.insert(name, count);
        }
        Ok(out)
    }

    fn lid_states(&self) -> Result<Vec<(String, String)>, ProbeError> {
        let mut out = Vec::new();
        for dir in self.sysfs.list_dir("/proc/acpi/button/lid") {
            let state = dir.join("state");
            let text = match read_trimmed(&state) {
                Ok(t) => t,
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            };
            let value = text
                .split_once(':')
                .map_or(text.as_str(), |(_, v)| v)
                .trim()
                .to_owned();
            out.push((format!("/proc/acpi/button/lid/{}/state", file_name(&dir)), value));
        }
        Ok(out)
    }

    fn batteries(&self) -> Result<Vec<Battery>, ProbeError> {
        let mut out = Vec::new();
        for dir in self.sysfs.list_dir("/sys/class/power_supply") {
            if read_trimmed(&dir.join("type")).ok().as_deref() != Some("Battery") {
                continue;
            }
            let name = file_name(&dir);
            let reading = match (
                self.supply_value(&dir, "energy_now"),
                self.supply_value(&dir, "energy_full"),
            ) {
                (Some(energy), Some(full)) => Some((energy, full, true)),
                _ => self
                    .supply_value(&dir, "charge_now")
                    .zip(self.supply_value(&dir, "charge_full"))
                    .map(|(energy, full)| (energy, full, false)),
            };
            match reading {
                Some((energy, full, energy_based)) => out.push(Battery {
                    name,
                    energy,
                    full,
                    energy_based,
                }),
                None => debug!(battery = %name, "battery reports neither energy nor charge"),
            }
        }
        Ok(out)
    }

    fn thermal_zones(&self) -> Result<Vec<ThermalZone>, ProbeError> {
        let mut out = Vec::new();
        for dir in self.sysfs.list_dir("/sys/class/thermal") {
            if !file_name(&dir).starts_with("thermal_zone") {
                continue;
            }
            let name = read_trimmed(&dir.join("type")).unwrap_or_else(|_| file_name(&dir));
            let temp = read_milli_celsius(&dir.join("temp"))?;
            let mut trips = Vec::new();
            for index in 0.. {
                let temp_path = dir.join(format!("trip_point_{index}_temp"));
                if !temp_path.exists() {
                    break;
                }
                trips.push(TripPoint {
                    kind: read_trimmed(&dir.join(format!("trip_point_{index}_type")))?,
                    temp_c: read_milli_celsius(&temp_path)?,
                });
            }
            out.push(ThermalZone {
                name,
                temp_c: temp,
                trips,
            });
        }
        Ok(out)
    }

    fn wakeup_irq(&self) -> Result<Option<WakeIrq>, ProbeError> {
        let irq = match self.sysfs.read("/sys/power/pm_wakeup_irq") {
            Ok(n) => n,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };
        let base = PathBuf::from("/sys/kernel/irq").join(&irq);
        let field = |name: &str| self.sysfs.read(base.join(name));
        Ok(Some(WakeIrq {
            chip_name: field("chip_name")?,
            hwirq: field("hwirq")?,
            name: field("name")?,
            actions: field("actions")?,
            irq,
        }))
    }

    fn last_hw_sleep(&self) -> Result<Option<f64>, ProbeError> {
        match self.sysfs.read_int("/sys/power/suspend_stats/last_hw_sleep") {
            Ok(us) => return Ok(Some(micros_to_secs(us))),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
        let info = match self.sysfs.read("/sys/kernel/debug/amd_pmc/smu_fw_info") {
            Ok(text) => text,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };
        Ok(info
            .lines()
            .filter(|l| !l.contains("Last S0i3 Status"))
            .find(|l| l.contains("Time (in us) in S0i3"))
            .and_then(|l| l.split_once(':'))
            .and_then(|(_, v)| v.trim().parse::<i64>().ok())
            .map(micros_to_secs))
    }

    fn rtc_uses_acpi_alarm(&self) -> Option<bool> {
        self.sysfs
            .read("/sys/module/rtc_cmos/parameters/use_acpi_alarm")
            .ok()
            .map(|v| v != "N")
    }

    fn kernel_cmdline(&self) -> Result<String, ProbeError> {
        self.sysfs.read("/proc/cmdline")
    }

    fn compositors(&self) -> Vec<String> {
        let mut found = Vec::new();
        for dir in self.sysfs.list_dir("/proc") {
            if !file_name(&dir).chars().all(|c| c.is_ascii_digit()) {
                continue;
            }
            let Ok(target) = std::fs::read_link(dir.join("exe")) else {
                continue;
            };
            let exe = file_name(&target);
            let exe = exe.split_whitespace().next().unwrap_or_default();
            if KNOWN_COMPOSITORS.contains(&exe) && !found.iter().any(|f| f == exe) {
                found.push(exe.to_owned());
            }
        }
        found
    }

    fn power_profile(&self) -> Option<Vec<String>> {
        let program = self.sysfs.path("/usr/bin/powerprofilesctl");
        if !program.exists() {
            return None;
        }
        let output = std::process::Command::new(&program)
            .stdin(std::process::Stdio::null())
            .output()
            .ok()?;
        if !output.status.success() {
            debug!(status = %output.status, "powerprofilesctl failed");
            return None;
        }
        Some(
            String::from_utf8_lossy(&output.stdout)
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_owned)
                .collect(),
        )
    }

    fn lockdown(&self) -> bool {
        self.sysfs
            .read("/sys/kernel/security/lockdown")
            .map(|v| !v.contains("[none]"))
            .unwrap_or(false)
    }
}

fn read_milli_celsius(path: &Path) -> Result<f64, ProbeError> {
    let text = read_trimmed(path)?;
    let milli: i64 = text.parse().map_err(|_| ProbeError::Malformed {
        path: path.to_path_buf(),
        detail: format!("expected millidegrees, found {text:?}"),
    })?;
    #[allow(clippy::cast_precision_loss)]
    let celsius = milli as f64 / 1000.0;
    Ok(celsius)
}

#[allow(clippy::cast_precision_loss)] // hardware sleep counters stay far below 2^53
fn micros_to_secs(us: i64) -> f64 {
    us as f64 / 1_000_000.0
}

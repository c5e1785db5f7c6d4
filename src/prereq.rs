//! Platform prerequisite checks for s2idle.
//!
//! [`PrerequisiteValidator::run`] inspects firmware tables, kernel
//! parameters, bound drivers, the kernel log and CPU registers, writing one
//! prerequisite record per finding. Checks that cannot run (missing
//! driver, no permission) leave a warning record and do not fail the run.

use std::io::ErrorKind;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, info};

use crate::failures::Failure;
use crate::kernel_log::{KernelLog, LogBackend};
use crate::store::{CycleKey, Store, StoreError};
use crate::symbol::Symbol;
use crate::system::cpu::{
    iommu_affected, parse_cpuinfo, pc6_cc6_enabled, read_cpuid, read_msr, unsupported_model,
    CPUID_EXT_TOPOLOGY, MSR_CSTATE_CC6, MSR_PSTATE_PC6,
};
use crate::system::pci::{CLASS_NETWORK_OTHER, CLASS_USB4, CLASS_USB_XHCI};
use crate::system::{
    file_name, kernel_at_least, link_name, pci_devices, read_trimmed, soc_needs_irq1_wa,
    CppcRegisters, CpuInfo, PciDevice, ProbeError, Sysfs,
};

/// Kernel message printed when the FADT advertises low power S0 idle.
pub const FADT_LOG_MARKER: &str = "Low-power S0 idle used by default for system suspend";

/// Verdict recorded when any check fails.
pub const BROKEN_PREREQUISITES: &str = "Your system does not meet s2idle prerequisites!";

/// Message recorded when the process cannot request suspend.
pub const ROOT_ERROR: &str = "Must be executed by root user";

const FADT_FLAGS_OFFSET: usize = 0x70;
const FADT_LOW_POWER_S0: u32 = 1 << 21;
const TAINT_WARN: i64 = 1 << 9;
const IVRS_IVINFO_OFFSET: usize = 36;
const IVINFO_DMA_PROTECTION: u32 = 0x2;
const IOMMU_ACPI_DEVICE: &str = "MSFT0201";
const NVME_SIMPLE_SUSPEND: &str = "platform quirk: setting simple suspend";
const DEFAULT_PPFEATUREMASK: &str = "0xfff7bfff";
const DMCUB_MINIMUM: u32 = 0x0900_1B00;
const WAKE_INT_MASTER_DEBOUNCE: u32 = 0x8000;
const I2C_HID_SPURIOUS: &str = "IDEA5002";
const DMI_FILTERED: [&str; 8] = [
    "product_serial",
    "board_serial",
    "board_asset_tag",
    "chassis_asset_tag",
    "chassis_serial",
    "modalias",
    "uevent",
    "product_uuid",
];

static AMDGPU_FIRMWARE_MISSING: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"Direct firmware load for amdgpu.*failed").ok());
static WCN6855_PRESENT: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"ath11k_pci.*wcn6855").ok());
static WCN6855_VERSION: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"ath11k_pci.*fw_version").ok());
static AHCI_DEVSLP: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"ahci.*flags.*sadm.*sds").ok());
static SATA_DEVSLP: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"ata.*Features.*Dev-Sleep").ok());

/// Whether a raw FADT sets the low power S0 idle flag.
///
/// `None` when the table is too short to hold the flags field.
pub fn decode_fadt_low_power_idle(table: &[u8]) -> Option<bool> {
    let raw = table.get(FADT_FLAGS_OFFSET..)?.first_chunk::<4>()?;
    let flags = u32::from_le_bytes(*raw);
    Some(flags & FADT_LOW_POWER_S0 != 0)
}

/// Outcome of a prerequisite run.
#[derive(Debug, Clone)]
pub struct PrereqOutcome {
    /// Snapshot key the findings were stored under.
    pub key: CycleKey,
    /// Whether every check passed.
    pub passed: bool,
    /// Failures found.
    pub failures: Vec<Failure>,
    /// Boot CPU identity, when readable.
    pub cpu: Option<CpuInfo>,
    /// SMU firmware version reported by `amd_pmc`.
    pub smu_version: Option<String>,
    /// SMU program number reported by `amd_pmc`.
    pub smu_program: Option<String>,
}

impl PrereqOutcome {
    /// Whether cycles on this SoC need the IRQ1 workaround check.
    pub fn needs_irq1_workaround(&self) -> bool {
        self.cpu.as_ref().is_some_and(|cpu| {
            cpu.is_amd()
                && soc_needs_irq1_wa(
                    cpu.family,
                    cpu.model,
                    self.smu_version.as_deref().unwrap_or_default(),
                )
        })
    }
}

/// Whether a WCN6855 firmware build id carries the spurious wakeup fix.
///
/// The fix shipped in build 37 and was backported to build 23.
pub fn wcn6855_build_fixed(build_id: &str) -> bool {
    build_id
        .rsplit('.')
        .next()
        .and_then(|last| last.parse::<u32>().ok())
        .is_some_and(|build| build >= 37 || build == 23)
}

/// Runs the prerequisite checks and records their findings.
pub struct PrerequisiteValidator<'a> {
    sysfs: Sysfs,
    store: &'a mut Store,
    log: Option<&'a mut (dyn KernelLog + 'static)>,
    failures: Vec<Failure>,
    cpu: Option<CpuInfo>,
    release: String,
    smu_version: Option<String>,
    smu_program: Option<String>,
}

impl<'a> PrerequisiteValidator<'a> {
    /// Validator writing to `store`, reading the kernel log through `log`
    /// when one is available.
    pub fn new(
        sysfs: Sysfs,
        store: &'a mut Store,
        log: Option<&'a mut (dyn KernelLog + 'static)>,
    ) -> Self {
        Self {
            sysfs,
            store,
            log,
            failures: Vec::new(),
            cpu: None,
            release: String::new(),
            smu_version: None,
            smu_program: None,
        }
    }

    /// Failures found so far.
    pub fn failures(&self) -> &[Failure] {
        &self.failures
    }

    async fn prereq(&mut self, message: &str, symbol: Symbol) -> Result<(), StoreError> {
        debug!(%symbol, message, "prerequisite");
        self.store.record_prereq(message, symbol.as_str()).await
    }

    async fn fail(&mut self, message: &str, failure: Failure) -> Result<bool, StoreError> {
        self.flag(message, Symbol::Fail, failure).await
    }

    async fn flag(
        &mut self,
        message: &str,
        symbol: Symbol,
        failure: Failure,
    ) -> Result<bool, StoreError> {
        self.prereq(message, symbol).await?;
        self.failures.push(failure);
        Ok(false)
    }

    fn search_log(&mut self, pattern: Option<&Regex>) -> Option<String> {
        let (log, pattern) = (self.log.as_deref_mut()?, pattern?);
        match log.seek().and_then(|()| log.match_pattern(pattern)) {
            Ok(line) => line,
            Err(e) => {
                debug!(error = %e, "kernel log search failed");
                None
            }
        }
    }

    async fn unavailable(&mut self, what: &str, err: &ProbeError) -> Result<bool, StoreError> {
        self.store.record_debug(&err.to_string(), None).await?;
        self.prereq(&format!("{what} unavailable"), Symbol::Warn).await?;
        Ok(true)
    }

    /// Run every check under a fresh snapshot key.
    ///
    /// # Errors
    ///
    /// Returns an error only if findings cannot be stored.
    pub async fn run(mut self) -> Result<PrereqOutcome, StoreError> {
        let key = CycleKey::now();
        self.store.start_cycle(key).await?;

        self.capture_kernel_version().await?;
        self.capture_cpu().await?;
        self.capture_smbios().await?;
        self.capture_cmdline().await?;
        self.check_lockdown().await?;

        let mut passed = true;
        if self.cpu.as_ref().is_some_and(CpuInfo::is_amd) {
            passed &= self.check_aspm().await?;
            passed &= self.check_i2c_hid().await?;
            passed &= self.check_pinctrl_amd().await?;
            passed &= self.check_amd_hsmp().await?;
            passed &= self.check_amd_pmc().await?;
            passed &= self.check_usb3().await?;
            passed &= self.check_usb4().await?;
            passed &= self.check_sleep_mode().await?;
            passed &= self.check_storage().await?;
            passed &= self.check_wcn6855_bug().await?;
            passed &= self.check_amdgpu().await?;
            passed &= self.check_amdgpu_parameters().await?;
            passed &= self.check_cpu().await?;
            passed &= self.check_msr().await?;
            self.capture_cppc().await?;
            passed &= self.check_smt().await?;
            passed &= self.check_iommu().await?;
            passed &= self.check_asus_rog_ally().await?;
            passed &= self.check_dpia_pg_dmcub().await?;
        }
        passed &= self.check_fadt().await?;
        passed &= self.check_logger().await?;
        passed &= self.check_lps0().await?;
        passed &= self.check_permissions().await?;
        passed &= self.check_wlan().await?;
        passed &= self.check_taint().await?;

        if !passed {
            self.prereq(BROKEN_PREREQUISITES, Symbol::Verdict).await?;
        }
        self.store.sync().await?;
        info!(passed, failures = self.failures.len(), "prerequisite checks complete");

        Ok(PrereqOutcome {
            key,
            passed,
            failures: self.failures,
            cpu: self.cpu,
            smu_version: self.smu_version,
            smu_program: self.smu_program,
        })
    }

    /// Record the running kernel release; later checks gate on it.
    ///
    /// # Errors
    ///
    /// Returns an error only if findings cannot be stored.
    pub async fn capture_kernel_version(&mut self) -> Result<(), StoreError> {
        if let Ok(release) = self.sysfs.read("/proc/sys/kernel/osrelease") {
            self.prereq(&format!("Kernel {release}"), Symbol::Linux).await?;
            self.release = release;
        }
        Ok(())
    }

    /// Record the DMI identity, flagging systems whose DMI tables were
    /// never scanned.
    ///
    /// # Errors
    ///
    /// Returns an error only if findings cannot be stored.
    pub async fn capture_smbios(&mut self) -> Result<bool, StoreError> {
        let dir = "/sys/class/dmi/id";
        if !self.sysfs.exists(dir) {
            return self
                .flag("DMI data was not setup", Symbol::Warn, Failure::DmiNotSetup)
                .await;
        }
        let keys: Vec<(String, String)> = self
            .sysfs
            .list_dir(dir)
            .into_iter()
            .filter(|p| p.is_file())
            .map(|p| file_name(&p))
            .filter(|name| !DMI_FILTERED.contains(&name.as_str()))
            .filter_map(|name| {
                let value = self.sysfs.read(format!("{dir}/{name}")).ok()?;
                Some((name, value))
            })
            .collect();
        let field = |key: &str| keys.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str());
        let (Some(vendor), Some(product), Some(family)) =
            (field("sys_vendor"), field("product_name"), field("product_family"))
        else {
            return self.fail("DMI data not found", Failure::DmiNotSetup).await;
        };
        let identity = format!("{vendor} {product} ({family})");
        self.prereq(&identity, Symbol::Cpu).await?;

        let mut detail = "DMI data:".to_owned();
        for (key, value) in &keys {
            if !matches!(key.as_str(), "sys_vendor" | "product_name" | "product_family") {
                detail.push_str(&format!("\n{key}: {value}"));
            }
        }
        self.store.record_debug(&detail, None).await?;
        Ok(true)
    }

    async fn capture_cpu(&mut self) -> Result<(), StoreError> {
        let Some(cpu) = self
            .sysfs
            .read("/proc/cpuinfo")
            .ok()
            .and_then(|text| parse_cpuinfo(&text))
        else {
            return self.store.record_debug("Unable to parse /proc/cpuinfo", None).await;
        };
        let message = format!(
            "{} (family {:x} model {:x})",
            cpu.model_name, cpu.family, cpu.model
        );
        self.prereq(&message, Symbol::Cpu).await?;
        self.cpu = Some(cpu);
        Ok(())
    }

    async fn capture_cmdline(&mut self) -> Result<(), StoreError> {
        if let Ok(cmdline) = self.sysfs.read("/proc/cmdline") {
            self.store
                .record_debug(&format!("/proc/cmdline: {cmdline}"), None)
                .await?;
        }
        Ok(())
    }

    async fn check_lockdown(&mut self) -> Result<(), StoreError> {
        if let Ok(lockdown) = self.sysfs.read("/sys/kernel/security/lockdown") {
            self.store
                .record_debug(&format!("Kernel lockdown: {lockdown}"), None)
                .await?;
        }
        Ok(())
    }

    /// `mem_sleep` must offer and select `s2idle`.
    ///
    /// # Errors
    ///
    /// Returns an error only if findings cannot be stored.
    pub async fn check_sleep_mode(&mut self) -> Result<bool, StoreError> {
        let mem_sleep = match self.sysfs.read("/sys/power/mem_sleep") {
            Ok(v) => v,
            Err(_) => {
                self.prereq("Kernel doesn't support sleep", Symbol::Fail).await?;
                return Ok(false);
            }
        };
        let cmdline = self.sysfs.read("/proc/cmdline").unwrap_or_default();
        if cmdline.contains("mem_sleep_default=deep") {
            return self
                .fail("Kernel command line is configured for 'deep' sleep", Failure::DeepSleep)
                .await;
        }
        if !mem_sleep.contains("[s2idle]") {
            return self
                .fail(
                    "System isn't configured for s2idle in firmware setup",
                    Failure::SleepModeWrong,
                )
                .await;
        }
        self.prereq("System is configured for s2idle", Symbol::Ok).await?;
        Ok(true)
    }

    /// The FADT must advertise low power S0 idle, via the kernel log or
    /// the raw table.
    ///
    /// # Errors
    ///
    /// Returns an error only if findings cannot be stored.
    pub async fn check_fadt(&mut self) -> Result<bool, StoreError> {
        let mut found = false;
        match self.log.as_deref_mut() {
            None => {
                self.prereq("Unable to test FADT from kernel log", Symbol::Warn).await?;
            }
            Some(log) => {
                let matched = log.seek().and_then(|()| log.match_line(&[FADT_LOG_MARKER]));
                match matched {
                    Ok(line) => found = line.is_some(),
                    Err(e) => debug!(error = %e, "kernel log search failed"),
                }
            }
        }
        if !found {
            self.store
                .record_debug("Fetching low power idle bit directly from FADT", None)
                .await?;
            match self.sysfs.read_bytes("/sys/firmware/acpi/tables/FACP") {
                Ok(table) => found = decode_fadt_low_power_idle(&table).unwrap_or(false),
                Err(e) => {
                    self.store.record_debug(&e.to_string(), None).await?;
                    self.prereq("FADT check unavailable", Symbol::Warn).await?;
                    return Ok(true);
                }
            }
        }
        if found {
            self.prereq("ACPI FADT supports Low-power S0 idle", Symbol::Ok).await?;
            Ok(true)
        } else {
            self.fail("ACPI FADT doesn't support Low-power S0 idle", Failure::FadtWrong)
                .await
        }
    }

    /// Package C6 and core C6 must be enabled.
    ///
    /// # Errors
    ///
    /// Returns an error only if findings cannot be stored.
    pub async fn check_msr(&mut self) -> Result<bool, StoreError> {
        let values = read_msr(&self.sysfs, MSR_PSTATE_PC6)
            .and_then(|pc6| read_msr(&self.sysfs, MSR_CSTATE_CC6).map(|cc6| (pc6, cc6)));
        match values {
            Ok((pc6, cc6)) if pc6_cc6_enabled(pc6, cc6) => {
                self.prereq("PC6 and CC6 enabled", Symbol::Ok).await?;
                Ok(true)
            }
            Ok((pc6, cc6)) => {
                self.store
                    .record_debug(&format!("PC6 MSR: 0x{pc6:x} CC6 MSR: 0x{cc6:x}"), None)
                    .await?;
                self.fail("PC6 or CC6 state disabled", Failure::MsrFailure).await
            }
            Err(e) if e.is_not_found() => {
                self.prereq(
                    "Unable to check MSRs: MSR kernel module not loaded",
                    Symbol::Fail,
                )
                .await?;
                Ok(false)
            }
            Err(e) if e.is_permission_denied() => {
                self.prereq("MSR checks unavailable", Symbol::Warn).await?;
                Ok(true)
            }
            Err(e) => self.unavailable("MSR checks", &e).await,
        }
    }

    /// Record the CPPC registers next to the C-state MSRs.
    ///
    /// # Errors
    ///
    /// Returns an error only if findings cannot be stored.
    pub async fn capture_cppc(&mut self) -> Result<(), StoreError> {
        let regs = match CppcRegisters::read(&self.sysfs) {
            Ok(regs) => regs,
            Err(e) => {
                debug!(error = %e, "CPPC MSRs unavailable");
                return Ok(());
            }
        };
        let raw = format!(
            "CPPC MSRs: enable 0x{:x} status 0x{:x} cap1 0x{:x} cap2 0x{:x} request 0x{:x}",
            regs.enable, regs.status, regs.cap1, regs.cap2, regs.request
        );
        self.store.record_debug(&raw, None).await?;
        let [lowest, nonlinear, nominal, highest] = regs.capabilities();
        self.store
            .record_debug(
                &format!(
                    "CPPC capabilities: lowest {lowest} lowest nonlinear {nonlinear} nominal {nominal} highest {highest}"
                ),
                None,
            )
            .await?;
        let [max, min, desired, epp] = regs.request_fields();
        self.store
            .record_debug(
                &format!(
                    "CPPC request: min {min} max {max} desired {desired} energy performance preference {epp}"
                ),
                None,
            )
            .await
    }

    /// SMT must be active where supported.
    ///
    /// # Errors
    ///
    /// Returns an error only if findings cannot be stored.
    pub async fn check_smt(&mut self) -> Result<bool, StoreError> {
        let control = match self.sysfs.read("/sys/devices/system/cpu/smt/control") {
            Ok(v) => v,
            Err(e) => return self.unavailable("SMT check", &e).await,
        };
        self.store
            .record_debug(&format!("SMT control: {control}"), None)
            .await?;
        if control == "notsupported" {
            return Ok(true);
        }
        if matches!(self.sysfs.read("/sys/devices/system/cpu/smt/active").as_deref(), Ok("0")) {
            return self.fail("SMT is not enabled", Failure::SmtNotEnabled).await;
        }
        self.prereq("SMT enabled", Symbol::Ok).await?;
        Ok(true)
    }

    /// The PCIe ASPM policy must be left at its default.
    ///
    /// # Errors
    ///
    /// Returns an error only if findings cannot be stored.
    pub async fn check_aspm(&mut self) -> Result<bool, StoreError> {
        let contents = match self.sysfs.read("/sys/module/pcie_aspm/parameters/policy") {
            Ok(v) => v,
            Err(e) => return self.unavailable("ASPM policy check", &e).await,
        };
        let policy = contents
            .split_whitespace()
            .find(|w| w.starts_with('['))
            .unwrap_or_default();
        if policy != "[default]" {
            return self
                .fail(&format!("ASPM policy set to {policy}"), Failure::AspmWrong)
                .await;
        }
        self.prereq("ASPM policy set to 'default'", Symbol::Ok).await?;
        Ok(true)
    }

    /// The kernel must not be tainted, ignoring warnings.
    ///
    /// # Errors
    ///
    /// Returns an error only if findings cannot be stored.
    pub async fn check_taint(&mut self) -> Result<bool, StoreError> {
        let taint = match self.sysfs.read_int("/proc/sys/kernel/tainted") {
            Ok(v) => v & !TAINT_WARN,
            Err(e) => return self.unavailable("Taint check", &e).await,
        };
        if taint != 0 {
            return self
                .fail(&format!("Kernel is tainted: {taint}"), Failure::TaintedKernel)
                .await;
        }
        Ok(true)
    }

    /// On affected models, an enabled IOMMU needs DMA protection, the
    /// `MSFT0201` ACPI device and an IOMMU policy bound to it.
    ///
    /// # Errors
    ///
    /// Returns an error only if findings cannot be stored.
    pub async fn check_iommu(&mut self) -> Result<bool, StoreError> {
        let Some(cpu) = self.cpu.as_ref() else {
            return Ok(true);
        };
        if !iommu_affected(cpu.family, cpu.model) {
            return Ok(true);
        }
        let Some(iommu) = self.sysfs.list_dir("/sys/class/iommu").into_iter().next() else {
            self.prereq("IOMMU disabled", Symbol::Ok).await?;
            return Ok(true);
        };
        self.store
            .record_debug(&format!("Found IOMMU {}", iommu.display()), None)
            .await?;

        let ivrs = match self.sysfs.read_bytes("/sys/firmware/acpi/tables/IVRS") {
            Ok(t) => t,
            Err(e) => return self.unavailable("IOMMU check", &e).await,
        };
        let Some(raw) = ivrs
            .get(IVRS_IVINFO_OFFSET..)
            .and_then(|rest| rest.first_chunk::<4>())
        else {
            let err = ProbeError::Malformed {
                path: self.sysfs.path("/sys/firmware/acpi/tables/IVRS"),
                detail: "table too small to contain virtualization info".to_owned(),
            };
            return self.unavailable("IOMMU check", &err).await;
        };
        let ivinfo = u32::from_le_bytes(*raw);
        self.store
            .record_debug(&format!("Virtualization info: 0x{ivinfo:x}"), None)
            .await?;
        if ivinfo & IVINFO_DMA_PROTECTION == 0 {
            return self
                .fail(
                    "IOMMU is misconfigured: Pre-boot DMA protection not enabled",
                    Failure::DmarNotEnabled,
                )
                .await;
        }

        let sysfs = self.sysfs.clone();
        let has = |dir: &str| {
            sysfs
                .list_dir(dir)
                .into_iter()
                .filter(|p| file_name(p).contains(IOMMU_ACPI_DEVICE))
                .collect::<Vec<_>>()
        };
        if has("/sys/bus/acpi/devices").is_empty() {
            return self
                .fail(
                    "IOMMU is misconfigured: missing MSFT0201 ACPI device",
                    Failure::MissingIommuAcpi {
                        device: IOMMU_ACPI_DEVICE.to_owned(),
                    },
                )
                .await;
        }
        if has("/sys/bus/platform/devices")
            .iter()
            .any(|dev| !dev.join("iommu").exists())
        {
            return self
                .fail(
                    "IOMMU is misconfigured: MSFT0201 has no IOMMU policy bound",
                    Failure::MissingIommuPolicy {
                        device: IOMMU_ACPI_DEVICE.to_owned(),
                    },
                )
                .await;
        }
        self.prereq("IOMMU properly configured", Symbol::Ok).await?;
        Ok(true)
    }

    /// The CPU model must support hardware sleep and the kernel must be
    /// allowed to bring up every core.
    ///
    /// # Errors
    ///
    /// Returns an error only if findings cannot be stored.
    pub async fn check_cpu(&mut self) -> Result<bool, StoreError> {
        let Some((family, model)) = self.cpu.as_ref().map(|c| (c.family, c.model)) else {
            return Ok(true);
        };
        if unsupported_model(family, model) {
            return self
                .fail(
                    "This CPU model does not support hardware sleep over s2idle",
                    Failure::UnsupportedModel,
                )
                .await;
        }

        let max_cpus = match self.sysfs.read_int("/sys/devices/system/cpu/kernel_max") {
            Ok(v) => u32::try_from(v.saturating_add(1)).unwrap_or(u32::MAX),
            Err(e) => return self.unavailable("CPU topology check", &e).await,
        };
        match read_cpuid(&self.sysfs, CPUID_EXT_TOPOLOGY, 1) {
            Ok([_, count, _, _]) => {
                if count > max_cpus {
                    return self
                        .fail(
                            &format!(
                                "The kernel has been limited to {max_cpus} CPU cores, but the system has {count} cores"
                            ),
                            Failure::LimitedCores {
                                actual: count,
                                expected: max_cpus,
                            },
                        )
                        .await;
                }
                self.store
                    .record_debug(&format!("CPU core count: {count} max: {max_cpus}"), None)
                    .await?;
                Ok(true)
            }
            Err(e) if e.is_not_found() => {
                self.prereq(
                    "Unable to check CPU topology: cpuid kernel module not loaded",
                    Symbol::Fail,
                )
                .await?;
                Ok(false)
            }
            Err(e) if e.is_permission_denied() => {
                self.prereq("CPUID checks unavailable", Symbol::Warn).await?;
                Ok(true)
            }
            Err(e) => self.unavailable("CPUID checks", &e).await,
        }
    }

    /// The `amd_pmc` driver must be bound.
    ///
    /// # Errors
    ///
    /// Returns an error only if findings cannot be stored.
    pub async fn check_amd_pmc(&mut self) -> Result<bool, StoreError> {
        let device = self
            .sysfs
            .list_dir("/sys/bus/platform/drivers/amd_pmc")
            .into_iter()
            .find(|p| p.is_dir() && file_name(p) != "module");
        let Some(device) = device else {
            return self
                .fail(
                    "PMC driver `amd_pmc` did not bind to any ACPI device",
                    Failure::MissingAmdPmc,
                )
                .await;
        };
        let mut message = "PMC driver `amd_pmc` loaded".to_owned();
        let version = std::fs::read_to_string(device.join("smu_fw_version"));
        let program = std::fs::read_to_string(device.join("smu_program"));
        if let (Ok(version), Ok(program)) = (version, program) {
            let (version, program) = (version.trim().to_owned(), program.trim().to_owned());
            message.push_str(&format!(" (Program {program} Firmware {version})"));
            self.smu_version = Some(version);
            self.smu_program = Some(program);
        }
        self.prereq(&message, Symbol::Ok).await?;
        Ok(true)
    }

    /// The LPS0 `_DSM` must not be disabled on the command line.
    ///
    /// # Errors
    ///
    /// Returns an error only if findings cannot be stored.
    pub async fn check_lps0(&mut self) -> Result<bool, StoreError> {
        for module in ["acpi", "acpi_x86"] {
            let Ok(value) = self
                .sysfs
                .read(format!("/sys/module/{module}/parameters/sleep_no_lps0"))
            else {
                continue;
            };
            if value == "Y" {
                self.prereq("LPS0 _DSM disabled", Symbol::Fail).await?;
                return Ok(false);
            }
            self.prereq("LPS0 _DSM enabled", Symbol::Ok).await?;
            return Ok(true);
        }
        self.prereq("LPS0 _DSM not found", Symbol::Look).await?;
        Ok(false)
    }

    /// Report the kernel log source and, for dmesg, that the ring buffer
    /// still holds the boot messages.
    ///
    /// # Errors
    ///
    /// Returns an error only if findings cannot be stored.
    pub async fn check_logger(&mut self) -> Result<bool, StoreError> {
        let Some(log) = self.log.as_deref() else {
            self.prereq("Kernel log unavailable", Symbol::Warn).await?;
            return Ok(true);
        };
        match log.backend() {
            LogBackend::Journal => {
                self.prereq("Logs are provided via systemd", Symbol::Ok).await?;
            }
            LogBackend::Dmesg => {
                let header = log.header().unwrap_or_default();
                self.prereq(
                    "Logs are provided via dmesg, timestamps may not be accurate over multiple cycles",
                    Symbol::Warn,
                )
                .await?;
                if !header.contains("Linux version") {
                    return self
                        .fail(
                            "Kernel ring buffer has wrapped, unable to accurately validate pre-requisites",
                            Failure::KernelRingBufferWrapped,
                        )
                        .await;
                }
            }
            LogBackend::File => {}
        }
        Ok(true)
    }

    /// `amd_hsmp` conflicts with `amd_pmc` on kernels before 6.10 unless
    /// its init call is blocked.
    ///
    /// # Errors
    ///
    /// Returns an error only if findings cannot be stored.
    pub async fn check_amd_hsmp(&mut self) -> Result<bool, StoreError> {
        if kernel_at_least(&self.release, 6, 10) {
            self.store
                .record_debug("New enough kernel to avoid HSMP check", None)
                .await?;
            return Ok(true);
        }
        let kconfig = self
            .sysfs
            .read(format!("/boot/config-{}", self.release))
            .unwrap_or_default();
        if kconfig.lines().any(|l| l.trim() == "CONFIG_AMD_HSMP=y") {
            return self
                .fail(
                    "HSMP driver `amd_hsmp` driver may conflict with amd_pmc",
                    Failure::AmdHsmpBug,
                )
                .await;
        }
        let cmdline = self.sysfs.read("/proc/cmdline").unwrap_or_default();
        let blocked = cmdline.contains("initcall_blacklist=hsmp_plt_init");
        if self.sysfs.exists("/sys/module/amd_hsmp") && !blocked {
            return self
                .fail("`amd_hsmp` driver may conflict with amd_pmc", Failure::AmdHsmpBug)
                .await;
        }
        self.prereq(
            &format!("HSMP driver `amd_hsmp` not detected (blocked: {blocked})"),
            Symbol::Ok,
        )
        .await?;
        Ok(true)
    }

    /// Every AMD display controller must be bound to `amdgpu`.
    ///
    /// # Errors
    ///
    /// Returns an error only if findings cannot be stored.
    pub async fn check_amdgpu(&mut self) -> Result<bool, StoreError> {
        for gpu in pci_devices(&self.sysfs).into_iter().filter(PciDevice::is_amd_gpu) {
            if gpu.driver.as_deref() != Some("amdgpu") {
                return self
                    .fail("GPU driver `amdgpu` not loaded", Failure::MissingAmdgpu)
                    .await;
            }
            self.prereq(&format!("GPU driver `amdgpu` bound to {}", gpu.slot), Symbol::Ok)
                .await?;
        }
        Ok(true)
    }

    /// `amdgpu` must run with its default feature mask and all of its
    /// firmware.
    ///
    /// # Errors
    ///
    /// Returns an error only if findings cannot be stored.
    pub async fn check_amdgpu_parameters(&mut self) -> Result<bool, StoreError> {
        if let Ok(mask) = self.sysfs.read("/sys/module/amdgpu/parameters/ppfeaturemask") {
            if mask != DEFAULT_PPFEATUREMASK {
                return self
                    .fail(
                        &format!("AMDGPU ppfeaturemask overridden to {mask}"),
                        Failure::AmdgpuPpFeatureMask,
                    )
                    .await;
            }
        }
        if self.log.is_none() {
            self.prereq("Unable to test for amdgpu from kernel log", Symbol::Warn)
                .await?;
            return Ok(true);
        }
        match self.search_log(AMDGPU_FIRMWARE_MISSING.as_ref()) {
            Some(line) if !line.contains("amdgpu/isp") => {
                self.fail(
                    "GPU firmware missing",
                    Failure::MissingAmdgpuFirmware { errors: vec![line] },
                )
                .await
            }
            _ => Ok(true),
        }
    }

    /// USB3 controllers must be driven by `xhci_hcd`.
    ///
    /// # Errors
    ///
    /// Returns an error only if findings cannot be stored.
    pub async fn check_usb3(&mut self) -> Result<bool, StoreError> {
        self.check_pci_driver(CLASS_USB_XHCI, "xhci_hcd", "USB3", Failure::MissingXhciHcd)
            .await
    }

    /// USB4 routers must be driven by `thunderbolt`.
    ///
    /// # Errors
    ///
    /// Returns an error only if findings cannot be stored.
    pub async fn check_usb4(&mut self) -> Result<bool, StoreError> {
        self.check_pci_driver(CLASS_USB4, "thunderbolt", "USB4", Failure::MissingThunderbolt)
            .await
    }

    async fn check_pci_driver(
        &mut self,
        class: u32,
        driver: &str,
        kind: &str,
        failure: Failure,
    ) -> Result<bool, StoreError> {
        let mut slots = Vec::new();
        for dev in pci_devices(&self.sysfs).into_iter().filter(|d| d.class == class) {
            if dev.driver.as_deref() != Some(driver) {
                let message = format!("{kind} controller for {} not using `{driver}` driver", dev.slot);
                return self.fail(&message, failure).await;
            }
            slots.push(dev.slot);
        }
        if !slots.is_empty() {
            let message = format!("{kind} driver `{driver}` bound to {}", slots.join(", "));
            self.prereq(&message, Symbol::Ok).await?;
        }
        Ok(true)
    }

    /// WLAN cards must have a driver bound.
    ///
    /// # Errors
    ///
    /// Returns an error only if findings cannot be stored.
    pub async fn check_wlan(&mut self) -> Result<bool, StoreError> {
        for dev in pci_devices(&self.sysfs)
            .into_iter()
            .filter(|d| d.class == CLASS_NETWORK_OTHER)
        {
            let Some(driver) = dev.driver else {
                return self
                    .flag(
                        &format!("WLAN device in {} missing driver", dev.slot),
                        Symbol::Warn,
                        Failure::MissingDriver { slot: dev.slot },
                    )
                    .await;
            };
            self.prereq(&format!("WLAN driver `{driver}` bound to {}", dev.slot), Symbol::Ok)
                .await?;
        }
        Ok(true)
    }

    /// NVMe disks must opt into simple suspend and SATA links must support
    /// DevSlp.
    ///
    /// # Errors
    ///
    /// Returns an error only if findings cannot be stored.
    pub async fn check_storage(&mut self) -> Result<bool, StoreError> {
        if self.log.is_none() {
            self.prereq("Unable to test storage from kernel log", Symbol::Warn)
                .await?;
            return Ok(true);
        }
        let devices = pci_devices(&self.sysfs);
        let mut valid_nvme = Vec::new();
        let mut invalid_nvme = Vec::new();
        for dev in devices.iter().filter(|d| d.driver.as_deref() == Some("nvme")) {
            if kernel_at_least(&self.release, 6, 10) {
                self.store
                    .record_debug("New enough kernel to avoid NVME check", None)
                    .await?;
                break;
            }
            let pattern = Regex::new(&format!(
                "{}.*{}",
                regex::escape(&dev.slot),
                regex::escape(NVME_SIMPLE_SUSPEND)
            ))
            .ok();
            if self.search_log(pattern.as_ref()).is_some() {
                valid_nvme.push(dev.slot.clone());
            } else {
                invalid_nvme.push(dev.slot.clone());
            }
        }
        let has_ahci = devices.iter().any(|d| d.driver.as_deref() == Some("ahci"));
        let has_sata = self.has_sata_disk();
        let valid_ahci = has_ahci && self.search_log(AHCI_DEVSLP.as_ref()).is_some();
        let valid_sata = has_sata && self.search_log(SATA_DEVSLP.as_ref()).is_some();

        let num_ssds = valid_nvme.len().saturating_add(invalid_nvme.len());
        for slot in &invalid_nvme {
            self.flag(
                &format!("NVME {slot} is not configured for s2idle in BIOS"),
                Symbol::Fail,
                Failure::AcpiNvmeStorageD3Enable {
                    disk: slot.clone(),
                    num_ssds,
                },
            )
            .await?;
        }
        for slot in &valid_nvme {
            self.prereq(&format!("NVME {slot} is configured for s2idle in BIOS"), Symbol::Ok)
                .await?;
        }
        if has_sata {
            if valid_sata {
                self.prereq("SATA supports DevSlp feature", Symbol::Ok).await?;
            } else {
                self.flag(
                    "SATA does not support DevSlp feature",
                    Symbol::Fail,
                    Failure::DevSlpDiskIssue,
                )
                .await?;
            }
        }
        if has_ahci {
            if valid_ahci {
                self.prereq("AHCI is configured for DevSlp in BIOS", Symbol::Ok)
                    .await?;
            } else {
                self.flag(
                    "AHCI is not configured for DevSlp in BIOS",
                    Symbol::Warn,
                    Failure::DevSlpHostIssue,
                )
                .await?;
            }
        }
        // A host without DevSlp only matters once a SATA disk is attached.
        Ok(invalid_nvme.is_empty() && (valid_sata || !has_sata) && (valid_ahci || !has_sata))
    }

    fn has_sata_disk(&self) -> bool {
        self.sysfs
            .list_dir("/sys/block")
            .iter()
            .filter_map(|block| std::fs::read_link(block).ok())
            .any(|target| target.to_string_lossy().contains("/ata"))
    }

    /// WCN6855 firmware older than the fixed build wakes the system.
    ///
    /// # Errors
    ///
    /// Returns an error only if findings cannot be stored.
    pub async fn check_wcn6855_bug(&mut self) -> Result<bool, StoreError> {
        if self.log.is_none() {
            self.prereq("Unable to test for wcn6855 bug from kernel log", Symbol::Warn)
                .await?;
            return Ok(true);
        }
        if self.search_log(WCN6855_PRESENT.as_ref()).is_none() {
            return Ok(true);
        }
        let Some(line) = self.search_log(WCN6855_VERSION.as_ref()) else {
            return Ok(true);
        };
        self.store
            .record_debug(&format!("WCN6855 version string: {line}"), None)
            .await?;
        let mut tokens = line.split_whitespace();
        let Some(build) = tokens.find(|t| *t == "fw_build_id").and_then(|_| tokens.next()) else {
            return Ok(true);
        };
        if wcn6855_build_fixed(build) {
            self.prereq(&format!("WCN6855 WLAN (fw build id {build})"), Symbol::Ok)
                .await?;
        } else {
            self.flag(
                &format!("WCN6855 WLAN may cause spurious wakeups (fw version {build})"),
                Symbol::Fail,
                Failure::Wcn6855Bug,
            )
            .await?;
        }
        Ok(true)
    }

    /// `pinctrl_amd` must be bound and every GPIO interrupt serviced.
    ///
    /// # Errors
    ///
    /// Returns an error only if findings cannot be stored.
    pub async fn check_pinctrl_amd(&mut self) -> Result<bool, StoreError> {
        let bound = self
            .sysfs
            .list_dir("/sys/bus/platform/drivers/amd_gpio")
            .iter()
            .any(|p| p.is_dir() && file_name(p) != "module");
        if !bound {
            self.prereq("GPIO driver `pinctrl_amd` not loaded", Symbol::Fail)
                .await?;
            return Ok(false);
        }
        self.prereq("GPIO driver `pinctrl_amd` available", Symbol::Ok).await?;
        let contents = match self.sysfs.read("/sys/kernel/debug/gpio") {
            Ok(text) => text,
            Err(e) => {
                debug!(error = %e, "GPIO debugfs unavailable");
                self.store
                    .record_debug("Unable to capture /sys/kernel/debug/gpio", None)
                    .await?;
                return Ok(true);
            }
        };
        let mut detail = String::new();
        let mut header = false;
        let mut unserviced = false;
        for line in contents.lines() {
            if line.contains("WAKE_INT_MASTER_REG:") {
                let value = line
                    .split_whitespace()
                    .nth(1)
                    .and_then(|v| u32::from_str_radix(v.trim_start_matches("0x"), 16).ok())
                    .unwrap_or(0);
                let state = if value & WAKE_INT_MASTER_DEBOUNCE != 0 {
                    "enabled"
                } else {
                    "disabled"
                };
                self.store
                    .record_debug(&format!("Windows GPIO 0 debounce: {state}"), None)
                    .await?;
                continue;
            }
            if !header && line.contains("trigger") {
                detail.push_str(line);
                detail.push('\n');
                header = true;
            }
            if line.contains("edge") || line.contains("level") {
                detail.push_str(line);
                detail.push('\n');
            }
            unserviced |= line.contains('🔥');
        }
        if !detail.is_empty() {
            self.store.record_debug(detail.trim_end(), None).await?;
        }
        if unserviced {
            return self
                .fail("GPIO interrupt is not serviced", Failure::UnservicedGpio)
                .await;
        }
        Ok(true)
    }

    /// I2C HID devices known to assert their attention line spuriously.
    ///
    /// # Errors
    ///
    /// Returns an error only if findings cannot be stored.
    pub async fn check_i2c_hid(&mut self) -> Result<bool, StoreError> {
        let mut devices = Vec::new();
        for client in self.sysfs.list_dir("/sys/bus/i2c/devices") {
            for name in input_names(&client) {
                devices.push((client.clone(), name));
            }
        }
        if devices.is_empty() {
            return Ok(true);
        }
        let mut ok = true;
        let mut detail = "I2C HID devices:".to_owned();
        let last = devices.len().saturating_sub(1);
        for (i, (client, name)) in devices.iter().enumerate() {
            let firmware = |field: &str| {
                read_trimmed(&client.join("firmware_node").join(field)).unwrap_or_default()
            };
            let prefix = if i == last { "└─" } else { "│ " };
            detail.push_str(&format!(
                "\n{prefix}{name} [{}] : {}",
                firmware("hid"),
                firmware("path")
            ));
            if name.contains(I2C_HID_SPURIOUS) {
                let driver = link_name(&client.join("driver")).unwrap_or_default();
                let remediation = format!(
                    "echo {} | sudo tee /sys/bus/i2c/drivers/{driver}/unbind",
                    file_name(client)
                );
                ok = self
                    .fail(
                        &format!("{name} may cause spurious wakeups"),
                        Failure::I2cHidBug {
                            name: name.clone(),
                            remediation,
                        },
                    )
                    .await?
                    && ok;
            }
        }
        self.store.record_debug(&detail, None).await?;
        Ok(ok)
    }

    /// ROG Ally MCU firmware must be new enough and keep power save on.
    ///
    /// # Errors
    ///
    /// Returns an error only if findings cannot be stored.
    pub async fn check_asus_rog_ally(&mut self) -> Result<bool, StoreError> {
        for dev in self.sysfs.list_dir("/sys/bus/hid/drivers/asus_rog_ally") {
            let Ok(version) = read_trimmed(&dev.join("mcu_version")) else {
                continue;
            };
            let Ok(actual) = version.parse::<u32>() else {
                continue;
            };
            let uevent = read_trimmed(&dev.join("uevent")).unwrap_or_default();
            let hid_id = uevent
                .lines()
                .find_map(|l| l.strip_prefix("HID_ID="))
                .unwrap_or_default();
            let vmin = if hid_id.contains("1ABE") {
                Some(319)
            } else if hid_id.contains("1B4C") {
                Some(313)
            } else {
                None
            };
            match vmin {
                Some(vmin) if actual < vmin => {
                    return self
                        .fail(
                            "ROG Ally MCU firmware too old",
                            Failure::RogAllyOldMcu { vmin, actual },
                        )
                        .await;
                }
                _ => {
                    self.store
                        .record_debug(&format!("ASUS ROG MCU found with MCU version {actual}"), None)
                        .await?;
                }
            }
        }
        for dev in self.sysfs.list_dir("/sys/class/firmware-attributes") {
            let path = dev.join("attributes/mcu_powersave/current_value");
            let Ok(value) = read_trimmed(&path) else {
                continue;
            };
            if value.parse::<i64>().is_ok_and(|v| v < 1) {
                return self
                    .fail(
                        "Rog Ally doesn't have MCU powersave enabled",
                        Failure::RogAllyMcuPowerSave,
                    )
                    .await;
            }
        }
        Ok(true)
    }

    /// Without USB4 routers, DCN 3.5 needs DMCUB firmware that power gates
    /// the unused display tunnels.
    ///
    /// # Errors
    ///
    /// Returns an error only if findings cannot be stored.
    pub async fn check_dpia_pg_dmcub(&mut self) -> Result<bool, StoreError> {
        let devices = pci_devices(&self.sysfs);
        if devices.iter().any(|d| d.class == CLASS_USB4) {
            self.store
                .record_debug("USB4 routers found, no need to check DMCUB version", None)
                .await?;
            return Ok(true);
        }
        for gpu in devices.iter().filter(|d| d.is_amd_gpu()) {
            if !has_dcn_3_5(&gpu.path) {
                continue;
            }
            let Some(current) = self.dmcub_version(gpu) else {
                continue;
            };
            if current < DMCUB_MINIMUM {
                return self
                    .fail(
                        "DMCUB Firmware is outdated",
                        Failure::DmcubTooOld {
                            current,
                            expected: DMCUB_MINIMUM,
                        },
                    )
                    .await;
            }
            return Ok(true);
        }
        Ok(true)
    }

    fn dmcub_version(&self, gpu: &PciDevice) -> Option<u32> {
        let parse = |v: &str| u32::from_str_radix(v.trim().trim_start_matches("0x"), 16).ok();
        if let Some(version) = read_trimmed(&gpu.path.join("fw_version/dmcub_fw_version"))
            .ok()
            .and_then(|v| parse(&v))
        {
            return Some(version);
        }
        let info = self
            .sysfs
            .read(format!("/sys/kernel/debug/dri/{}/amdgpu_firmware_info", gpu.slot))
            .ok()?;
        info.lines()
            .filter(|l| l.starts_with("DMCUB"))
            .find_map(|l| l.split_whitespace().last().and_then(parse))
    }

    /// The process must be able to request suspend.
    ///
    /// # Errors
    ///
    /// Returns an error only if findings cannot be stored.
    pub async fn check_permissions(&mut self) -> Result<bool, StoreError> {
        let path = self.sysfs.path("/sys/power/state");
        match std::fs::OpenOptions::new().write(true).open(&path) {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                self.prereq(ROOT_ERROR, Symbol::Look).await?;
                Ok(false)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                self.prereq("Kernel doesn't support power management", Symbol::Fail)
                    .await?;
                Ok(false)
            }
            Err(e) => {
                let err = ProbeError::Io { path, source: e };
                self.unavailable("Permission check", &err).await
            }
        }
    }
}

/// Names of the input devices below an I2C client, found through its HID
/// children (`<client>/<hid>/input/input*/name`).
fn input_names(client: &Path) -> Vec<String> {
    let Ok(children) = std::fs::read_dir(client) else {
        return Vec::new();
    };
    let mut hids: Vec<_> = children.filter_map(|e| e.ok().map(|e| e.path())).collect();
    hids.sort();
    let mut names = Vec::new();
    for hid in hids {
        let Ok(inputs) = std::fs::read_dir(hid.join("input")) else {
            continue;
        };
        let mut inputs: Vec<_> = inputs.filter_map(|e| e.ok().map(|e| e.path())).collect();
        inputs.sort();
        names.extend(inputs.iter().filter_map(|i| read_trimmed(&i.join("name")).ok()));
    }
    names
}

/// Whether the GPU's IP discovery table lists display core 3.5.0.
fn has_dcn_3_5(gpu: &Path) -> bool {
    let dmu = gpu.join("ip_discovery/die/0/DMU/0");
    [("major", 3), ("minor", 5), ("revision", 0)]
        .iter()
        .all(|(key, expected)| {
            read_trimmed(&dmu.join(key))
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
                == Some(*expected)
        })
}

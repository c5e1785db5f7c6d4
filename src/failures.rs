//! Known root causes for failed or shallow suspend cycles.
//!
//! Every cause is a variant of [`Failure`] carrying whatever values its
//! message needs. Rendering is a single exhaustive match; there is no
//! behaviour beyond producing text. The two threshold predicates used after
//! each cycle ([`spurious_wakeup`] and [`low_residency`]) live here too so
//! their arithmetic sits next to the messages they produce.

use std::fmt;

use serde::Serialize;

/// Fraction of the requested duration a cycle must last to count as a
/// timer wake rather than a spurious one.
pub const WAKE_THRESHOLD: f64 = 0.9;

/// Cycles shorter than this many seconds are not judged on residency.
pub const MIN_RESIDENCY_CYCLE_SECS: f64 = 60.0;

/// Hardware sleep share above which a long cycle is considered healthy.
pub const RESIDENCY_THRESHOLD: f64 = 0.9;

/// A diagnosed root cause.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Failure {
    /// `rtc_cmos` uses HPET emulation instead of the ACPI alarm.
    RtcAlarmWrong,
    /// The ACPI interpreter reported firmware errors during the cycle.
    AcpiBiosError {
        /// Offending kernel log lines, verbatim.
        errors: Vec<String>,
    },
    /// The CPU model cannot reach hardware sleep over s2idle.
    UnsupportedModel,
    /// An NVMe disk lacks the `StorageD3Enable` property.
    AcpiNvmeStorageD3Enable {
        /// Disk description.
        disk: String,
        /// Number of SSDs in the system.
        num_ssds: usize,
    },
    /// The AHCI controller is not configured for DevSlp.
    DevSlpHostIssue,
    /// A SATA disk does not support DevSlp.
    DevSlpDiskIssue,
    /// Firmware setup is not configured for Modern Standby.
    SleepModeWrong,
    /// `mem_sleep_default=deep` is on the kernel command line.
    DeepSleep,
    /// The FADT low power idle bit is clear.
    FadtWrong,
    /// IRQ1 woke the system on a SoC with the known firmware bug.
    Irq1Workaround,
    /// The dmesg ring buffer no longer holds the boot header.
    KernelRingBufferWrapped,
    /// `amd_hsmp` is built into the kernel.
    AmdHsmpBug,
    /// WCN6855 firmware causes spurious wakeups.
    Wcn6855Bug,
    /// An I2C HID device is known to cause spurious wakeups.
    I2cHidBug {
        /// Input device name.
        name: String,
        /// Command that unbinds the device.
        remediation: String,
    },
    /// The system woke before the programmed alarm.
    SpuriousWakeup {
        /// Requested cycle length in seconds.
        requested: u32,
        /// Observed userspace time asleep in seconds.
        wake: f64,
    },
    /// A long cycle spent too little time in hardware sleep.
    LowHardwareSleepResidency {
        /// Observed userspace time asleep in seconds.
        duration: f64,
        /// Hardware sleep share of `duration`, from 0.0 to 1.0.
        ratio: f64,
    },
    /// PC6 or CC6 was disabled in the MSRs.
    MsrFailure,
    /// The kernel taint mask is non-zero.
    TaintedKernel,
    /// Pre-boot DMA protection is disabled while the IOMMU is on.
    DmarNotEnabled,
    /// A required ACPI device is missing for IOMMU operation.
    MissingIommuAcpi {
        /// ACPI hardware id.
        device: String,
    },
    /// The IOMMU policy was not bound to a required device.
    MissingIommuPolicy {
        /// ACPI hardware id.
        device: String,
    },
    /// The IOMMU logged page faults during the cycle.
    IommuPageFault {
        /// Faulting PCI devices.
        devices: Vec<String>,
    },
    /// SMT is disabled.
    SmtNotEnabled,
    /// The PCIe ASPM policy is overridden.
    AspmWrong,
    /// A GPIO interrupt is not serviced by any driver.
    UnservicedGpio,
    /// DMI data was never scanned.
    DmiNotSetup,
    /// The kernel supports fewer CPUs than the package has.
    LimitedCores {
        /// Logical cores reported by CPUID.
        actual: u32,
        /// Cores the kernel was built for.
        expected: u32,
    },
    /// ROG Ally MCU firmware is too old.
    RogAllyOldMcu {
        /// Minimum good version.
        vmin: u32,
        /// Installed version.
        actual: u32,
    },
    /// ROG Ally MCU power save is disabled.
    RogAllyMcuPowerSave,
    /// The amdgpu driver is not loaded.
    MissingAmdgpu,
    /// amdgpu reported missing firmware files.
    MissingAmdgpuFirmware {
        /// Kernel log lines naming the missing files.
        errors: Vec<String>,
    },
    /// The amdgpu `ppfeaturemask` parameter was changed.
    AmdgpuPpFeatureMask,
    /// DMCUB microcode is older than the suggested minimum.
    DmcubTooOld {
        /// Installed version.
        current: u32,
        /// Minimum suggested version.
        expected: u32,
    },
    /// The amd_pmc driver is not bound.
    MissingAmdPmc,
    /// The thunderbolt driver is not bound to a USB4 router.
    MissingThunderbolt,
    /// A USB3 controller is not using `xhci_hcd`.
    MissingXhciHcd,
    /// A PCI device has no driver bound.
    MissingDriver {
        /// PCI slot name.
        slot: String,
    },
}

impl Failure {
    /// Stable identifier for the failure kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RtcAlarmWrong => "rtc_alarm_wrong",
            Self::AcpiBiosError { .. } => "acpi_bios_error",
            Self::UnsupportedModel => "unsupported_model",
            Self::AcpiNvmeStorageD3Enable { .. } => "acpi_nvme_storage_d3_enable",
            Self::DevSlpHostIssue => "dev_slp_host_issue",
            Self::DevSlpDiskIssue => "dev_slp_disk_issue",
            Self::SleepModeWrong => "sleep_mode_wrong",
            Self::DeepSleep => "deep_sleep",
            Self::FadtWrong => "fadt_wrong",
            Self::Irq1Workaround => "irq1_workaround",
            Self::KernelRingBufferWrapped => "kernel_ring_buffer_wrapped",
            Self::AmdHsmpBug => "amd_hsmp_bug",
            Self::Wcn6855Bug => "wcn6855_bug",
            Self::I2cHidBug { .. } => "i2c_hid_bug",
            Self::SpuriousWakeup { .. } => "spurious_wakeup",
            Self::LowHardwareSleepResidency { .. } => "low_hardware_sleep_residency",
            Self::MsrFailure => "msr_failure",
            Self::TaintedKernel => "tainted_kernel",
            Self::DmarNotEnabled => "dmar_not_enabled",
            Self::MissingIommuAcpi { .. } => "missing_iommu_acpi",
            Self::MissingIommuPolicy { .. } => "missing_iommu_policy",
            Self::IommuPageFault { .. } => "iommu_page_fault",
            Self::SmtNotEnabled => "smt_not_enabled",
            Self::AspmWrong => "aspm_wrong",
            Self::UnservicedGpio => "unserviced_gpio",
            Self::DmiNotSetup => "dmi_not_setup",
            Self::LimitedCores { .. } => "limited_cores",
            Self::RogAllyOldMcu { .. } => "rog_ally_old_mcu",
            Self::RogAllyMcuPowerSave => "rog_ally_mcu_power_save",
            Self::MissingAmdgpu => "missing_amdgpu",
            Self::MissingAmdgpuFirmware { .. } => "missing_amdgpu_firmware",
            Self::AmdgpuPpFeatureMask => "amdgpu_pp_feature_mask",
            Self::DmcubTooOld { .. } => "dmcub_too_old",
            Self::MissingAmdPmc => "missing_amd_pmc",
            Self::MissingThunderbolt => "missing_thunderbolt",
            Self::MissingXhciHcd => "missing_xhci_hcd",
            Self::MissingDriver { .. } => "missing_driver",
        }
    }

    /// One line summary.
    pub fn description(&self) -> String {
        match self {
            Self::RtcAlarmWrong => "rtc_cmos is not configured to use ACPI alarm".to_owned(),
            Self::AcpiBiosError { .. } => "ACPI BIOS Errors detected".to_owned(),
            Self::UnsupportedModel => "Unsupported CPU model".to_owned(),
            Self::AcpiNvmeStorageD3Enable { disk, .. } => {
                format!("{disk} missing ACPI attributes")
            }
            Self::DevSlpHostIssue => "AHCI controller doesn't support DevSlp".to_owned(),
            Self::DevSlpDiskIssue => "SATA disk doesn't support DevSlp".to_owned(),
            Self::SleepModeWrong => {
                "The system hasn't been configured for Modern Standby in BIOS setup".to_owned()
            }
            Self::DeepSleep => {
                "The kernel command line is asserting the system to use deep sleep".to_owned()
            }
            Self::FadtWrong => {
                "The kernel didn't emit a message that low power idle was supported".to_owned()
            }
            Self::Irq1Workaround => "The wakeup showed an IRQ1 wakeup source, which might be a platform firmware bug".to_owned(),
            Self::KernelRingBufferWrapped => "Kernel ringbuffer has wrapped".to_owned(),
            Self::AmdHsmpBug => "amd-hsmp built in to kernel".to_owned(),
            Self::Wcn6855Bug => {
                "The firmware loaded for the WCN6855 causes spurious wakeups".to_owned()
            }
            Self::I2cHidBug { name, .. } => format!(
                "The {name} device has been reported to cause high power consumption and spurious wakeups"
            ),
            Self::SpuriousWakeup { requested, .. } => format!(
                "Userspace wasn't asleep at least {}",
                format_duration(f64::from(*requested))
            ),
            Self::LowHardwareSleepResidency { .. } => {
                "System had low hardware sleep residency".to_owned()
            }
            Self::MsrFailure => "PC6 or CC6 state disabled".to_owned(),
            Self::TaintedKernel => "Kernel is tainted".to_owned(),
            Self::DmarNotEnabled => "Pre-boot DMA protection disabled".to_owned(),
            Self::MissingIommuAcpi { device } => format!("Device {device} missing from ACPI tables"),
            Self::MissingIommuPolicy { device } => {
                format!("Device {device} does not have IOMMU policy applied")
            }
            Self::IommuPageFault { devices } => {
                format!("Page fault reported for {}", devices.join(", "))
            }
            Self::SmtNotEnabled => "SMT is not enabled".to_owned(),
            Self::AspmWrong => "ASPM is overridden".to_owned(),
            Self::UnservicedGpio => "GPIO interrupt is not serviced".to_owned(),
            Self::DmiNotSetup => "DMI data was not scanned".to_owned(),
            Self::LimitedCores { .. } => "CPU cores have been limited".to_owned(),
            Self::RogAllyOldMcu { .. } => "Rog Ally MCU firmware is too old".to_owned(),
            Self::RogAllyMcuPowerSave => "Rog Ally MCU power save is disabled".to_owned(),
            Self::MissingAmdgpu => "AMDGPU driver is missing".to_owned(),
            Self::MissingAmdgpuFirmware { .. } => "AMDGPU firmware is missing".to_owned(),
            Self::AmdgpuPpFeatureMask => "AMDGPU ppfeaturemask changed".to_owned(),
            Self::DmcubTooOld { .. } => "DMCUB microcode is too old".to_owned(),
            Self::MissingAmdPmc => "AMD-PMC driver is missing".to_owned(),
            Self::MissingThunderbolt => "thunderbolt driver is missing".to_owned(),
            Self::MissingXhciHcd => "xhci_hcd driver is missing".to_owned(),
            Self::MissingDriver { slot } => format!("{slot} driver is missing"),
        }
    }

    /// Longer prose explaining the cause and what to do about it.
    pub fn explanation(&self) -> String {
        match self {
            Self::RtcAlarmWrong => concat!(
                "Some problems can occur during wakeup cycles if the HPET RTC emulation is used ",
                "to wake systems. This can manifest in unexpected wakeups or high power consumption."
            )
            .to_owned(),
            Self::AcpiBiosError { errors } => {
                let mut text = concat!(
                    "When running a firmware component utilized for s2idle the ACPI interpreter ",
                    "in the Linux kernel encountered some problems. This usually means it's a bug ",
                    "in the system BIOS that should be fixed by the system manufacturer.\n",
                    "You may have problems with certain devices after resume or high power ",
                    "consumption when this error occurs.\n"
                )
                .to_owned();
                for error in errors {
                    text.push_str(error);
                    text.push('\n');
                }
                text
            }
            Self::UnsupportedModel => concat!(
                "This model does not support hardware s2idle. Attempting to run s2idle will use ",
                "a pure software suspend and will not yield tangible power savings."
            )
            .to_owned(),
            Self::AcpiNvmeStorageD3Enable { num_ssds, .. } => {
                let mut text = concat!(
                    "An NVME device was found, but it doesn't specify the StorageD3Enable ",
                    "attribute in the device specific data (_DSD). This is a BIOS bug, but it ",
                    "may be possible to work around in the kernel."
                )
                .to_owned();
                if *num_ssds > 1 {
                    text.push_str(concat!(
                        "\nIf you added an aftermarket SSD to your system, the system vendor might ",
                        "not have added this property to the BIOS for the second port which could ",
                        "cause this behavior."
                    ));
                }
                text
            }
            Self::DevSlpHostIssue => concat!(
                "The AHCI controller is not configured to support DevSlp. ",
                "This must be enabled in BIOS for s2idle in Linux."
            )
            .to_owned(),
            Self::DevSlpDiskIssue => concat!(
                "The SATA disk does not support DevSlp. ",
                "s2idle in Linux requires SATA disks that support this feature."
            )
            .to_owned(),
            Self::SleepModeWrong => concat!(
                "AMD systems must be configured for Modern Standby in BIOS setup for s2idle to ",
                "function properly in Linux. On some OEM systems this is referred to as 'Windows' ",
                "sleep mode. If the BIOS is configured for S3 and you manually select s2idle in ",
                "/sys/power/mem_sleep, the system will not enter the deepest hardware state."
            )
            .to_owned(),
            Self::DeepSleep => concat!(
                "Adding mem_sleep_default=deep doesn't work on AMD systems. ",
                "Please remove it from the kernel command line."
            )
            .to_owned(),
            Self::FadtWrong => concat!(
                "Low power idle is a bit documented in the FADT to indicate that low power idle ",
                "is supported. Only newer kernels support emitting this message, so if you run ",
                "on an older kernel you may get a false negative. When launched as root this ",
                "tool will try to directly introspect the ACPI tables to confirm this."
            )
            .to_owned(),
            Self::Irq1Workaround => concat!(
                "A number of Renoir, Lucienne, Cezanne, & Barcelo platforms have a platform ",
                "firmware bug where IRQ1 is triggered during s0i3 resume. You may have tripped up ",
                "on this bug as IRQ1 was active during resume. If you didn't press a keyboard key ",
                "to wakeup the system then this can be the cause of spurious wakeups.\n",
                "To fix it, first try to upgrade to the latest firmware from your manufacturer. ",
                "If you're already upgraded to the latest firmware you can use one of two ",
                "workarounds:\n",
                " 1. Manually disable wakeups from IRQ1 by running this command each boot:\n",
                "    echo 'disabled' | sudo tee /sys/bus/serio/devices/serio0/power/wakeup\n",
                " 2. Use the below linked patch in your kernel."
            )
            .to_owned(),
            Self::KernelRingBufferWrapped => concat!(
                "This tool relies upon analyzing the kernel log for markers. The kernel's log ",
                "provided by dmesg uses a ring buffer. When the ring buffer fills up it will wrap ",
                "around and overwrite old messages.\n",
                "In this case it's not possible to look for some of these markers.\n",
                "Passing the pre-requisites check won't be possible without rebooting the ",
                "machine. If you are sure your system meets pre-requisites, you can re-run using ",
                "the systemd logger or with --force."
            )
            .to_owned(),
            Self::AmdHsmpBug => concat!(
                "The kernel has been compiled with CONFIG_AMD_HSMP=y. This has been shown to ",
                "cause suspend failures on some systems.\n",
                "Either recompile the kernel without CONFIG_AMD_HSMP, or use ",
                "initcall_blacklist=hsmp_plt_init on your kernel command line to avoid ",
                "triggering problems."
            )
            .to_owned(),
            Self::Wcn6855Bug => concat!(
                "During s2idle on AMD systems PCIe devices are put into D3cold. When this bug ",
                "occurs, a GPIO connected to the WLAN card is active on the system making the ",
                "GPIO controller IRQ also active. The kernel sees that the ACPI event IRQ and ",
                "GPIO controller IRQ are both active and resumes the system.\n",
                "This issue is fixed by updated WCN6855 firmware which will avoid triggering the ",
                "GPIO. The version string containing the fix is ",
                "'WLAN.HSP.1.1-03125-QCAHSPSWPL_V1_V2_SILICONZ_LITE-3.6510.23'."
            )
            .to_owned(),
            Self::I2cHidBug { remediation, .. } => format!(
                "I2C devices work in an initiator/receiver relationship where the device is the \
                 receiver. In order for the receiver to indicate the initiator needs to read data \
                 they will assert an attention GPIO pin. When a device misbehaves it may assert \
                 this pin spuriously which can cause the SoC to wakeup prematurely.\n\
                 This issue can be worked around by unbinding the device from the kernel using \
                 this command:\n{remediation}\n\
                 To fix this issue permanently the kernel will need to avoid binding to this device."
            ),
            Self::SpuriousWakeup { requested, wake } => format!(
                "The system was programmed to sleep for {}, but woke up prematurely after {}. \
                 This typically happens when the system was woken up from a non-timer based \
                 source. If you didn't intentionally wake it up, then there may be a kernel or \
                 firmware bug.",
                format_duration(f64::from(*requested)),
                format_duration(*wake)
            ),
            Self::LowHardwareSleepResidency { duration, ratio } => format!(
                "The system was asleep for {}, but only spent {:.2}% of this time in a hardware \
                 sleep state. In sleep cycles that are at least 60 seconds long it's expected \
                 you spend above 90 percent of the cycle in hardware sleep.",
                format_duration(*duration),
                ratio * 100.0
            ),
            Self::MsrFailure => concat!(
                "The PC6 state of the package or the CC6 state of CPU cores was disabled. This ",
                "will prevent the system from getting to the deepest sleep state over suspend."
            )
            .to_owned(),
            Self::TaintedKernel => concat!(
                "A tainted kernel may exhibit unpredictable bugs that are difficult for this tool ",
                "to characterize. If this is intended behavior run the tool with --force."
            )
            .to_owned(),
            Self::DmarNotEnabled => concat!(
                "Pre-boot IOMMU DMA protection has been disabled. When the IOMMU is enabled this ",
                "platform requires pre-boot DMA protection for suspend to work."
            )
            .to_owned(),
            Self::MissingIommuAcpi { device } => format!(
                "The ACPI device {device} is required for suspend to work when the IOMMU is \
                 enabled. Please check your BIOS settings and if configured correctly, report a \
                 bug to your system vendor."
            ),
            Self::MissingIommuPolicy { device } => format!(
                "The ACPI device {device} is present but no IOMMU policy was set for it. This \
                 generally happens if the HID or UID don't match the ACPI IVRS table."
            ),
            Self::IommuPageFault { devices } => format!(
                "The IOMMU reports a page fault caused by {}. This can prevent suspend/resume \
                 from functioning properly. The page fault can be the device itself, a problem \
                 in the firmware or a problem in the kernel. Report a bug for further triage and \
                 investigation.",
                devices.join(", ")
            ),
            Self::SmtNotEnabled => {
                "Disabling SMT prevents cores from going into the correct state.".to_owned()
            }
            Self::AspmWrong => concat!(
                "Modifying ASPM may prevent PCIe devices from going into the correct state and ",
                "lead to system stability issues."
            )
            .to_owned(),
            Self::UnservicedGpio => concat!(
                "All GPIO controllers interrupts must be serviced to enter hardware sleep. Make ",
                "sure that all drivers necessary to service GPIOs are loaded. The most common ",
                "cause is that i2c-hid-acpi is not loaded but the machine contains an I2C touchpad."
            )
            .to_owned(),
            Self::DmiNotSetup => concat!(
                "If DMI data hasn't been scanned then quirks that are dependent upon DMI won't be ",
                "loaded. Most notably, this will prevent the rtc-cmos driver from setting up ",
                "properly by default. It may also prevent other drivers from working."
            )
            .to_owned(),
            Self::LimitedCores { actual, expected } => format!(
                "The CPU cores have been limited to {expected}, but the system actually has \
                 {actual}. Limiting the cores will prevent the system from going into a hardware \
                 sleep state. This is typically solved by increasing the kernel config \
                 CONFIG_NR_CPUS."
            ),
            Self::RogAllyOldMcu { vmin, actual } => format!(
                "The MCU is version {actual}, but needs to be at least {vmin} to avoid major \
                 issues with interactions with suspend."
            ),
            Self::RogAllyMcuPowerSave => concat!(
                "The MCU powersave feature is disabled which will cause problems with the ",
                "controller after suspend/resume."
            )
            .to_owned(),
            Self::MissingAmdgpu => concat!(
                "The amdgpu driver is used for hardware acceleration as well as coordination of ",
                "the power states for certain IP blocks on the SOC. Be sure that you have enabled ",
                "CONFIG_AMDGPU in your kernel."
            )
            .to_owned(),
            Self::MissingAmdgpuFirmware { errors } => {
                let mut text = concat!(
                    "The amdgpu driver loads firmware from /lib/firmware/amdgpu. In some cases ",
                    "missing firmware will prevent a successful suspend cycle. Upgrade to a newer ",
                    "snapshot at https://gitlab.com/kernel-firmware/linux-firmware\n"
                )
                .to_owned();
                for error in errors {
                    text.push_str(error);
                    text.push('\n');
                }
                text
            }
            Self::AmdgpuPpFeatureMask => concat!(
                "The ppfeaturemask for the amdgpu driver has been changed. Modifying this from ",
                "the defaults may cause the system to not enter hardware sleep."
            )
            .to_owned(),
            Self::DmcubTooOld { current, expected } => format!(
                "The DMCUB microcode version {current:#x} is older than the minimum suggested \
                 version {expected:#x}."
            ),
            Self::MissingAmdPmc => concat!(
                "The amd-pmc driver is required for the kernel to instruct the soc to enter the ",
                "hardware sleep state. Be sure that you have enabled CONFIG_AMD_PMC in your ",
                "kernel.\n",
                "If CONFIG_AMD_PMC is enabled but the amd-pmc driver isn't loading then you may ",
                "have found a bug and should report it."
            )
            .to_owned(),
            Self::MissingThunderbolt => concat!(
                "The thunderbolt driver is required for the USB4 routers included with the SOC ",
                "to enter the proper power states. Be sure that you have enabled CONFIG_USB4 in ",
                "your kernel."
            )
            .to_owned(),
            Self::MissingXhciHcd => concat!(
                "The xhci_hcd driver is required for the USB3 controllers included with the SOC ",
                "to enter the proper power states. Be sure that you have enabled CONFIG_XHCI_PCI ",
                "in your kernel."
            )
            .to_owned(),
            Self::MissingDriver { slot } => format!(
                "No driver has been bound to PCI device {slot}. Without a driver, the hardware \
                 may be able to enter a low power state, but there may be spurious wake up events."
            ),
        }
    }

    /// Reference for further reading, when one exists.
    pub fn url(&self) -> Option<&'static str> {
        match self {
            Self::RtcAlarmWrong => Some("https://github.com/systemd/systemd/issues/24279"),
            Self::AcpiNvmeStorageD3Enable { .. } => {
                Some("https://bugzilla.kernel.org/show_bug.cgi?id=216440")
            }
            Self::Irq1Workaround => Some("https://git.kernel.org/pub/scm/linux/kernel/git/torvalds/linux.git/commit/drivers/platform/x86/amd/pmc.c?id=8e60615e8932167057b363c11a7835da7f007106"),
            Self::AmdHsmpBug => Some("https://gitlab.freedesktop.org/drm/amd/-/issues/2414"),
            Self::Wcn6855Bug => Some("https://git.kernel.org/pub/scm/linux/kernel/git/firmware/linux-firmware.git/commit/?id=c7a57ef688f7d99d8338a5d8edddc8836ff0e6de"),
            Self::I2cHidBug { .. } => Some("https://gitlab.freedesktop.org/drm/amd/-/issues/2812"),
            Self::TaintedKernel => Some("https://gitlab.freedesktop.org/drm/amd/-/issues/3089"),
            Self::MissingIommuAcpi { .. } => {
                Some("https://gitlab.freedesktop.org/drm/amd/-/issues/3738#note_2667140")
            }
            Self::MissingAmdgpuFirmware { .. } => {
                Some("https://bugs.debian.org/cgi-bin/bugreport.cgi?bug=1053856")
            }
            Self::AmdgpuPpFeatureMask => {
                Some("https://gitlab.freedesktop.org/drm/amd/-/issues/2808#note_2379968")
            }
            _ => None,
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.description())?;
        write!(f, "{}", self.explanation().trim_end())?;
        if let Some(url) = self.url() {
            write!(f, "\nFor more information on this failure see: {url}")?;
        }
        Ok(())
    }
}

/// Check whether a cycle ended before the alarm could have fired.
///
/// Returns [`Failure::SpuriousWakeup`] when `elapsed` (userspace seconds
/// asleep) is below [`WAKE_THRESHOLD`] of `requested`.
pub fn spurious_wakeup(requested: u32, elapsed: f64) -> Option<Failure> {
    let minimum = f64::from(requested) * WAKE_THRESHOLD;
    (elapsed < minimum).then_some(Failure::SpuriousWakeup {
        requested,
        wake: elapsed,
    })
}

/// Check whether a cycle spent enough of its time in hardware sleep.
///
/// Cycles shorter than [`MIN_RESIDENCY_CYCLE_SECS`] are never flagged.
pub fn low_residency(duration: f64, hw: f64) -> Option<Failure> {
    if duration.is_nan() || duration < MIN_RESIDENCY_CYCLE_SECS {
        return None;
    }
    let ratio = hw / duration;
    (ratio <= RESIDENCY_THRESHOLD).then_some(Failure::LowHardwareSleepResidency { duration, ratio })
}

/// Render seconds as `H:MM:SS`, with microseconds when not whole.
pub fn format_duration(secs: f64) -> String {
    if !secs.is_finite() || secs < 0.0 {
        return format!("{secs}s");
    }
    // Finite and non-negative here; saturates for absurdly long spans.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let micros = (secs * 1_000_000.0).round() as u64;
    let whole = micros / 1_000_000;
    let frac = micros % 1_000_000;
    let (h, m, s) = (whole / 3600, (whole % 3600) / 60, whole % 60);
    if frac == 0 {
        format!("{h}:{m:02}:{s:02}")
    } else {
        format!("{h}:{m:02}:{s:02}.{frac:06}")
    }
}

//! CPU identification, MSR and CPUID access.

use semver::Version;

use super::{read_trimmed, ProbeError, Sysfs};

/// MSR holding the PC6 enable bit.
pub const MSR_PSTATE_PC6: u32 = 0xC001_0292;

/// MSR holding the per-core CC6 enable bits.
pub const MSR_CSTATE_CC6: u32 = 0xC001_0296;

/// CPPC capability register 1: lowest, lowest nonlinear, nominal and
/// highest performance.
pub const MSR_AMD_CPPC_CAP1: u32 = 0xC001_02B0;
/// CPPC enable register.
pub const MSR_AMD_CPPC_ENABLE: u32 = 0xC001_02B1;
/// CPPC capability register 2.
pub const MSR_AMD_CPPC_CAP2: u32 = 0xC001_02B2;
/// CPPC request register: max, min, desired and energy preference.
pub const MSR_AMD_CPPC_REQ: u32 = 0xC001_02B3;
/// CPPC status register.
pub const MSR_AMD_CPPC_STATUS: u32 = 0xC001_02B4;

const PC6_MASK: u64 = 1 << 32;
const CC6_MASK: u64 = (1 << 22) | (1 << 14) | (1 << 6);

/// Extended topology enumeration leaf.
pub const CPUID_EXT_TOPOLOGY: u32 = 0x8000_0026;

/// Identity of the boot CPU as `/proc/cpuinfo` reports it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CpuInfo {
    /// `vendor_id`, e.g. `AuthenticAMD`.
    pub vendor: String,
    /// `cpu family`.
    pub family: u32,
    /// `model`.
    pub model: u32,
    /// `model name`.
    pub model_name: String,
}

impl CpuInfo {
    /// Whether the vendor is AMD.
    pub fn is_amd(&self) -> bool {
        self.vendor == "AuthenticAMD"
    }
}

/// Parse the first processor block of `/proc/cpuinfo`.
pub fn parse_cpuinfo(text: &str) -> Option<CpuInfo> {
    let mut info = CpuInfo::default();
    let mut seen = 0u8;
    for line in text.lines() {
        if line.trim().is_empty() && seen > 0 {
            break;
        }
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "vendor_id" => info.vendor = value.to_owned(),
            "cpu family" => info.family = value.parse().ok()?,
            "model" => info.model = value.parse().ok()?,
            "model name" => info.model_name = value.to_owned(),
            _ => continue,
        }
        seen = seen.saturating_add(1);
    }
    (seen > 0).then_some(info)
}

/// Read a 64-bit MSR of CPU 0 through the `msr` driver.
///
/// # Errors
///
/// [`ProbeError::NotFound`] when the `msr` module is not loaded,
/// [`ProbeError::PermissionDenied`] when not privileged.
pub fn read_msr(sysfs: &Sysfs, reg: u32) -> Result<u64, ProbeError> {
    let bytes = sysfs.read_at("/dev/cpu/0/msr", u64::from(reg), 8)?;
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes);
    Ok(u64::from_le_bytes(raw))
}

/// Whether the MSR values keep PC6 and CC6 enabled.
pub fn pc6_cc6_enabled(pc6: u64, cc6: u64) -> bool {
    pc6 & PC6_MASK != 0 && cc6 & CC6_MASK != 0
}

/// Raw CPPC registers of CPU 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CppcRegisters {
    /// `MSR_AMD_CPPC_ENABLE`.
    pub enable: u64,
    /// `MSR_AMD_CPPC_STATUS`.
    pub status: u64,
    /// `MSR_AMD_CPPC_CAP1`.
    pub cap1: u64,
    /// `MSR_AMD_CPPC_CAP2`.
    pub cap2: u64,
    /// `MSR_AMD_CPPC_REQ`.
    pub request: u64,
}

impl CppcRegisters {
    /// Read the five CPPC registers.
    ///
    /// # Errors
    ///
    /// As [`read_msr`].
    pub fn read(sysfs: &Sysfs) -> Result<Self, ProbeError> {
        Ok(Self {
            enable: read_msr(sysfs, MSR_AMD_CPPC_ENABLE)?,
            status: read_msr(sysfs, MSR_AMD_CPPC_STATUS)?,
            cap1: read_msr(sysfs, MSR_AMD_CPPC_CAP1)?,
            cap2: read_msr(sysfs, MSR_AMD_CPPC_CAP2)?,
            request: read_msr(sysfs, MSR_AMD_CPPC_REQ)?,
        })
    }

    /// Capability fields as `[lowest, lowest nonlinear, nominal, highest]`.
    pub fn capabilities(&self) -> [u8; 4] {
        let b = self.cap1.to_le_bytes();
        [b[0], b[1], b[2], b[3]]
    }

    /// Request fields as `[max, min, desired, energy preference]`.
    pub fn request_fields(&self) -> [u8; 4] {
        let b = self.request.to_le_bytes();
        [b[0], b[1], b[2], b[3]]
    }
}

/// Execute CPUID on CPU 0 through the `cpuid` driver, returning
/// `[eax, ebx, ecx, edx]`.
///
/// # Errors
///
/// [`ProbeError::NotFound`] when the `cpuid` module is not loaded,
/// [`ProbeError::PermissionDenied`] when not privileged.
pub fn read_cpuid(sysfs: &Sysfs, leaf: u32, subleaf: u32) -> Result<[u32; 4], ProbeError> {
    let position = u64::from(subleaf).checked_shl(32).unwrap_or(0) | u64::from(leaf);
    let bytes = sysfs.read_at("/dev/cpu/0/cpuid", position, 16)?;
    let mut regs = [0u32; 4];
    for (reg, chunk) in regs.iter_mut().zip(bytes.chunks_exact(4)) {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(chunk);
        *reg = u32::from_le_bytes(raw);
    }
    Ok(regs)
}

/// Models known not to reach hardware sleep over s2idle.
pub fn unsupported_model(family: u32, model: u32) -> bool {
    match family {
        0x17 => (0x30..0x3F).contains(&model),
        0x19 => matches!(model, 0x08 | 0x18),
        _ => false,
    }
}

/// Models whose IOMMU needs pre-boot DMA protection for s2idle.
pub fn iommu_affected(family: u32, model: u32) -> bool {
    family == 0x1A
        && [0x20..0x2F, 0x60..0x6F, 0x70..0x7F]
            .iter()
            .any(|range| range.contains(&model))
}

/// Whether the SoC wakes spuriously from IRQ1 without a kernel workaround.
///
/// Family 0x19 model 0x50 was fixed in SMU firmware 64.66.0.
pub fn soc_needs_irq1_wa(family: u32, model: u32, smu_version: &str) -> bool {
    match (family, model) {
        (0x17, 0x60 | 0x68) => true,
        (0x19, 0x50) => Version::parse(smu_version.trim())
            .map(|v| v < Version::new(64, 66, 0))
            .unwrap_or(false),
        _ => false,
    }
}

/// SMU firmware version reported by the device `amd_pmc` is bound to.
pub fn amd_pmc_smu_version(sysfs: &Sysfs) -> Option<String> {
    sysfs
        .list_dir("/sys/bus/platform/drivers/amd_pmc")
        .into_iter()
        .find_map(|dev| read_trimmed(&dev.join("smu_fw_version")).ok())
}

/// Whether the running SoC needs the IRQ1 workaround, judged from
/// `/proc/cpuinfo` and the `amd_pmc` SMU version.
pub fn irq1_workaround_needed(sysfs: &Sysfs) -> bool {
    let Some(cpu) = sysfs.read("/proc/cpuinfo").ok().and_then(|t| parse_cpuinfo(&t)) else {
        return false;
    };
    let smu = amd_pmc_smu_version(sysfs).unwrap_or_default();
    cpu.is_amd() && soc_needs_irq1_wa(cpu.family, cpu.model, &smu)
}

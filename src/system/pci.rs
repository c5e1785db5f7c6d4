//! PCI device enumeration from `/sys/bus/pci/devices`.

use std::path::PathBuf;

use super::{file_name, link_name, read_trimmed, Sysfs};

/// PCI vendor id of AMD/ATI graphics.
pub const VENDOR_AMD_ATI: u16 = 0x1002;

/// VGA compatible display controller.
pub const CLASS_VGA: u32 = 0x03_0000;
/// Other display controller.
pub const CLASS_DISPLAY_OTHER: u32 = 0x03_8000;
/// Other network controller, where WLAN cards sit.
pub const CLASS_NETWORK_OTHER: u32 = 0x02_8000;
/// USB3 (xHCI) host controller.
pub const CLASS_USB_XHCI: u32 = 0x0C_0330;
/// USB4 host router.
pub const CLASS_USB4: u32 = 0x0C_0340;

/// One PCI function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PciDevice {
    /// Slot name, e.g. `0000:c4:00.0`.
    pub slot: String,
    /// 24-bit class code.
    pub class: u32,
    /// Vendor id.
    pub vendor: u16,
    /// Device id.
    pub device: u16,
    /// Bound driver, if any.
    pub driver: Option<String>,
    /// Device directory.
    pub path: PathBuf,
}

impl PciDevice {
    /// Whether this is an AMD display controller.
    pub fn is_amd_gpu(&self) -> bool {
        matches!(self.class, CLASS_VGA | CLASS_DISPLAY_OTHER) && self.vendor == VENDOR_AMD_ATI
    }
}

fn parse_hex(text: &str) -> Option<u32> {
    let digits = text.trim().trim_start_matches("0x");
    u32::from_str_radix(digits, 16).ok()
}

/// Every PCI function under the root, sorted by slot. Functions whose
/// class or ids cannot be read are skipped.
pub fn pci_devices(sysfs: &Sysfs) -> Vec<PciDevice> {
    sysfs
        .list_dir("/sys/bus/pci/devices")
        .into_iter()
        .filter_map(|path| {
            let id = |name: &str| read_trimmed(&path.join(name)).ok().and_then(|v| parse_hex(&v));
            let class = id("class")?;
            let vendor = u16::try_from(id("vendor")?).ok()?;
            let device = u16::try_from(id("device").unwrap_or(0)).ok()?;
            Some(PciDevice {
                slot: file_name(&path),
                class,
                vendor,
                device,
                driver: link_name(&path.join("driver")),
                path,
            })
        })
        .collect()
}

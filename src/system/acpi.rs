//! ACPICA method tracing and power management debug toggles.
//!
//! Both are kernel-global knobs that must be put back the way they were
//! found. [`AcpiTraceGuard`] and [`PmDebugGuard`] restore on drop.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use super::{file_name, ProbeError, Sysfs};

const PARAMETERS: &str = "/sys/module/acpi/parameters";
const TABLES: &str = "/sys/firmware/acpi/tables";
const PM_DEBUG_MESSAGES: &str = "/sys/power/pm_debug_messages";

/// ACPI method emitting BIOS debug output.
pub const BIOS_TRACE_METHOD: &str = "M460";

const TRACE_KEYS: [&str; 4] = [
    "trace_debug_layer",
    "trace_debug_level",
    "trace_method_name",
    "trace_state",
];

/// What to trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceMode {
    /// `Notify()` dispatch events.
    Notify,
    /// Debug output of the BIOS trace method.
    Bios,
}

/// Handle on the ACPICA tracer parameters.
///
/// Remembers the values found at construction so they can be restored.
#[derive(Debug, Clone)]
pub struct AcpiTracer {
    sysfs: Sysfs,
    original: BTreeMap<&'static str, String>,
    supported: bool,
}

impl AcpiTracer {
    /// Inspect the tracer parameters under `sysfs`.
    pub fn new(sysfs: Sysfs) -> Self {
        let mut original = BTreeMap::new();
        let mut supported = true;
        for key in TRACE_KEYS {
            match sysfs.read(format!("{PARAMETERS}/{key}")) {
                Ok(value) => {
                    if !value.is_empty() && value != "(null)" {
                        original.insert(key, value);
                    }
                }
                Err(_) => {
                    debug!(key, "ACPI tracing parameter unavailable");
                    supported = false;
                    break;
                }
            }
        }
        Self {
            sysfs,
            original,
            supported,
        }
    }

    /// Whether the kernel exposes every tracer parameter.
    pub fn supported(&self) -> bool {
        self.supported
    }

    /// Values found at construction.
    pub fn original(&self) -> &BTreeMap<&'static str, String> {
        &self.original
    }

    fn write_all<'a>(&self, values: impl IntoIterator<Item = (&'a str, String)>) -> Result<(), ProbeError> {
        for (key, value) in values {
            self.sysfs.write(format!("{PARAMETERS}/{key}"), &value)?;
        }
        Ok(())
    }

    /// Whether a DSDT or SSDT contains the BIOS trace method.
    pub fn bios_trace_available(&self) -> bool {
        self.sysfs.list_dir(TABLES).iter().any(|path| {
            let name = file_name(path);
            (name.starts_with("SSDT") || name.starts_with("DSDT"))
                && std::fs::read(path)
                    .map(|bytes| {
                        bytes
                            .windows(BIOS_TRACE_METHOD.len())
                            .any(|w| w == BIOS_TRACE_METHOD.as_bytes())
                    })
                    .unwrap_or(false)
        })
    }

    /// Trace `Notify()` events. Returns `false` when unsupported.
    ///
    /// # Errors
    ///
    /// Returns an error if a parameter cannot be written.
    pub fn trace_notify(&self) -> Result<bool, ProbeError> {
        if !self.supported {
            return Ok(false);
        }
        self.write_all([
            ("trace_debug_layer", (1u32 << 2).to_string()),
            ("trace_debug_level", (1u32 << 2).to_string()),
            ("trace_state", "enable".to_owned()),
        ])?;
        debug!("enabled ACPI tracing of Notify() events");
        Ok(true)
    }

    /// Trace the BIOS debug method. Returns `false` when unsupported or
    /// the firmware does not carry the method.
    ///
    /// # Errors
    ///
    /// Returns an error if a parameter cannot be written.
    pub fn trace_bios(&self) -> Result<bool, ProbeError> {
        if !self.supported {
            return Ok(false);
        }
        if !self.bios_trace_available() {
            debug!(method = BIOS_TRACE_METHOD, "ACPI tables lack BIOS trace method");
            return Ok(false);
        }
        self.write_all([
            ("trace_debug_layer", (1u32 << 7).to_string()),
            ("trace_debug_level", (1u32 << 4).to_string()),
            ("trace_method_name", format!("\\{BIOS_TRACE_METHOD}")),
            ("trace_state", "method".to_owned()),
        ])?;
        debug!("enabled ACPI tracing of BIOS debug output");
        Ok(true)
    }

    /// Stop tracing. Returns `false` when unsupported.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be written.
    pub fn disable(&self) -> Result<bool, ProbeError> {
        if !self.supported {
            return Ok(false);
        }
        self.write_all([("trace_state", "disable".to_owned())])?;
        Ok(true)
    }

    /// Write back the values found at construction.
    ///
    /// # Errors
    ///
    /// Returns an error if a parameter cannot be written.
    pub fn restore(&self) -> Result<bool, ProbeError> {
        if !self.supported {
            return Ok(false);
        }
        self.write_all(self.original.iter().map(|(k, v)| (*k, v.clone())))?;
        Ok(true)
    }

    /// Start tracing in `mode` and return a guard that restores the
    /// original parameters. `None` when the mode is unavailable.
    ///
    /// # Errors
    ///
    /// Returns an error if enabling fails.
    pub fn enable(&self, mode: TraceMode) -> Result<Option<AcpiTraceGuard>, ProbeError> {
        let enabled = match mode {
            TraceMode::Notify => self.trace_notify()?,
            TraceMode::Bios => self.trace_bios()?,
        };
        Ok(enabled.then(|| AcpiTraceGuard {
            tracer: self.clone(),
            armed: true,
        }))
    }
}

/// Restores ACPI tracer parameters when dropped.
#[derive(Debug)]
pub struct AcpiTraceGuard {
    tracer: AcpiTracer,
    armed: bool,
}

impl AcpiTraceGuard {
    /// Restore now and report the outcome.
    ///
    /// # Errors
    ///
    /// Returns an error if a parameter cannot be written.
    pub fn finish(mut self) -> Result<(), ProbeError> {
        self.armed = false;
        self.tracer.restore().map(|_| ())
    }

    /// Leave tracing enabled after the guard goes away.
    pub fn keep(mut self) {
        self.armed = false;
    }
}

impl Drop for AcpiTraceGuard {
    fn drop(&mut self) {
        if self.armed {
            if let Err(e) = self.tracer.restore() {
                warn!(error = %e, "failed to restore ACPI tracing parameters");
            }
        }
    }
}

/// Write `/sys/power/pm_debug_messages`.
///
/// # Errors
///
/// Returns an error if the file cannot be written.
pub fn set_pm_debug(sysfs: &Sysfs, enable: bool) -> Result<(), ProbeError> {
    sysfs.write(PM_DEBUG_MESSAGES, if enable { "1" } else { "0" })
}

/// Keeps `pm_debug_messages` enabled while alive.
#[derive(Debug)]
pub struct PmDebugGuard {
    sysfs: Sysfs,
    previous: Option<String>,
}

impl PmDebugGuard {
    /// Enable power management debug messages.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn enable(sysfs: &Sysfs) -> Result<Self, ProbeError> {
        let previous = sysfs.read(PM_DEBUG_MESSAGES).ok();
        set_pm_debug(sysfs, true)?;
        Ok(Self {
            sysfs: sysfs.clone(),
            previous,
        })
    }
}

impl Drop for PmDebugGuard {
    fn drop(&mut self) {
        let value = match self.previous.as_deref() {
            Some("1") => "1",
            _ => "0",
        };
        if let Err(e) = self.sysfs.write(PM_DEBUG_MESSAGES, value) {
            warn!(error = %e, "failed to restore pm_debug_messages");
        }
    }
}

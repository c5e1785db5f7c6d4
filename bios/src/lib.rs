//! amd-bios: BIOS AML tracing control and BIOS debug log decoding.
//!
//! `trace` toggles the ACPICA method tracer for the firmware's debug
//! method. `parse` replays a kernel log, decoding BIOS trace lines and
//! passing every other line through without its timestamp.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::sync::LazyLock;

use regex::Regex;

use amd_s2idle::kernel_log::{KernelLog, LogError};
use amd_s2idle::symbol::Symbol;
use amd_s2idle::system::AcpiTracer;
pub use amd_s2idle::system::kernel_at_least;
use amd_s2idle::trace::{decode_line, TraceLine};

/// Printed when the running kernel predates upstream BIOS debug support.
pub const BACKPORT_WARNING: &str = "Support for BIOS debug logging was merged in mainline 6.16, \
this tool may not work correctly unless support is manually backported";

/// Kernel release that carries BIOS debug logging.
pub const MINIMUM_KERNEL: (u64, u64) = (6, 16);

static TIMESTAMP: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^\[\s*\d+\.\d+\]").ok());

/// Errors from the BIOS tool.
#[derive(Debug, thiserror::Error)]
pub enum BiosError {
    /// The kernel lacks the ACPICA tracer.
    #[error("BIOS tracing not supported, please check your kernel for CONFIG_ACPI_DEBUG")]
    Unsupported,
    /// Writing a tracer parameter failed.
    #[error("failed to update ACPI tracing: {0}")]
    Probe(#[from] amd_s2idle::system::ProbeError),
    /// The kernel log could not be read.
    #[error(transparent)]
    Log(#[from] LogError),
}

/// One line of `parse` output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedLine {
    /// Status glyph.
    pub symbol: Symbol,
    /// Text to print.
    pub text: String,
}

/// Remove a leading `[ seconds.micros]` timestamp.
pub fn strip_timestamp(line: &str) -> String {
    match TIMESTAMP.as_ref() {
        Some(re) => re.replace(line, "").trim().to_owned(),
        None => line.trim().to_owned(),
    }
}

/// Enable or disable BIOS tracing and return the confirmation message.
///
/// # Errors
///
/// Returns [`BiosError::Unsupported`] when the tracer or the firmware
/// debug method is missing, or a write error.
pub fn set_tracing(tracer: &AcpiTracer, enable: bool) -> Result<String, BiosError> {
    let done = if enable {
        tracer.trace_bios()?
    } else {
        tracer.disable()?
    };
    if !done {
        return Err(BiosError::Unsupported);
    }
    let action = if enable { "enabled" } else { "disabled" };
    Ok(format!("Set BIOS tracing to {action}"))
}

/// Decode every line of `log`.
///
/// Decoded BIOS output is tagged [`Symbol::Bios`]. Bare trace points and
/// malformed trace lines are skipped.
///
/// # Errors
///
/// Returns an error if the log cannot be read.
pub fn parse_log(log: &mut dyn KernelLog) -> Result<Vec<ParsedLine>, BiosError> {
    let mut out = Vec::new();
    log.process_callback(&mut |line, priority| match decode_line(line) {
        Some(TraceLine::Decoded(text)) => out.push(ParsedLine {
            symbol: Symbol::Bios,
            text,
        }),
        Some(TraceLine::Notify(text)) => out.push(ParsedLine {
            symbol: Symbol::Debug,
            text,
        }),
        Some(TraceLine::Point | TraceLine::Malformed(_)) => {}
        None => out.push(ParsedLine {
            symbol: Symbol::for_priority(priority),
            text: strip_timestamp(line),
        }),
    })?;
    Ok(out)
}

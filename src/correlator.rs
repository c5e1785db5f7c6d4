//! Per-cycle kernel log classifier.
//!
//! A [`Correlator`] is fed every kernel log line of one suspend cycle via
//! [`Correlator::observe`]. It keeps counters, evidence lists and flags for
//! the marker families it recognizes, and afterwards turns them into report
//! findings and [`Failure`]s. Call [`Correlator::reset`] before each pass.

use std::sync::LazyLock;

use regex::Regex;

use crate::failures::Failure;
use crate::symbol::{Symbol, PRIORITY_DEBUG, PRIORITY_INFO};
use crate::trace::{decode_line, TraceLine};

/// Kernel message emitted when the IRQ1 workaround is applied.
pub const IRQ1_WORKAROUND_MARKER: &str =
    "Disabling IRQ1 wakeup source to avoid platform firmware bug";

static GPIO_ACTIVE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"GPIO.*is active").ok());

static DIGITS: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"\d+").ok());

/// A kernel log line retained for the debug table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugLine {
    /// Line text, after trace decoding.
    pub message: String,
    /// Syslog priority, when known.
    pub priority: Option<u8>,
}

/// Something the analysis wants written to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Finding {
    /// A short report line for `cycle_data`.
    CycleData {
        /// Message text.
        message: String,
        /// Status symbol.
        symbol: Symbol,
    },
    /// A verbose line for `debug`.
    Debug {
        /// Message text.
        message: String,
        /// Syslog priority.
        priority: u8,
    },
}

impl Finding {
    fn cycle(message: impl Into<String>, symbol: Symbol) -> Self {
        Self::CycleData {
            message: message.into(),
            symbol,
        }
    }

    fn debug(message: impl Into<String>) -> Self {
        Self::Debug {
            message: message.into(),
            priority: PRIORITY_INFO,
        }
    }
}

/// Stateful line classifier for one suspend cycle.
#[derive(Debug, Default, Clone)]
pub struct Correlator {
    cycle_count: u32,
    kernel_duration: f64,
    hw_sleep_duration: f64,
    upep: bool,
    upep_microsoft: bool,
    wakeup_irqs: Vec<u32>,
    idle_masks: Vec<u32>,
    acpi_errors: Vec<String>,
    active_gpios: Vec<String>,
    irq1_workaround: bool,
    notify_devices: Vec<String>,
    page_faults: Vec<String>,
    debug_lines: Vec<DebugLine>,
}

fn push_unique<T: PartialEq>(list: &mut Vec<T>, value: T) {
    if !list.contains(&value) {
        list.push(value);
    }
}

impl Correlator {
    /// Create an empty correlator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget everything observed so far.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Classify one kernel log line.
    ///
    /// BIOS trace lines are decoded first: decoded text replaces the line
    /// and is kept at debug priority, while bare trace points and
    /// malformed trace lines are dropped entirely.
    pub fn observe(&mut self, line: &str, priority: Option<u8>) {
        let (line, mut priority) = match decode_line(line) {
            Some(TraceLine::Decoded(text) | TraceLine::Notify(text)) => {
                (text, Some(PRIORITY_DEBUG))
            }
            Some(TraceLine::Point | TraceLine::Malformed(_)) => return,
            None => {
                self.classify(line);
                (line.to_owned(), priority)
            }
        };

        if line.contains("Dispatching Notify on") {
            if let Some(device) = line
                .split_once('[')
                .and_then(|(_, rest)| rest.split_once(']'))
                .map(|(device, _)| device)
            {
                push_unique(&mut self.notify_devices, device.to_owned());
            }
            priority = Some(PRIORITY_DEBUG);
        }

        self.debug_lines.push(DebugLine {
            message: line,
            priority,
        });
    }

    fn classify(&mut self, line: &str) {
        if line.contains("Timekeeping suspended for") {
            self.cycle_count = self.cycle_count.saturating_add(1);
            self.kernel_duration += line
                .split_whitespace()
                .filter_map(|t| t.parse::<f64>().ok())
                .filter(|v| v.is_finite())
                .sum::<f64>();
        } else if line.contains("Successfully transitioned to state") {
            self.upep = true;
            if line.contains("lps0 ms entry") {
                self.upep_microsoft = true;
            }
        } else if line.contains("_DSM function") {
            self.upep = true;
            if line.contains("_DSM function 7") {
                self.upep_microsoft = true;
            }
        } else if line.contains("Last suspend in deepest state for") {
            self.hw_sleep_duration += line
                .split_whitespace()
                .filter_map(|t| t.strip_suffix("us"))
                .filter_map(|t| t.parse::<f64>().ok())
                .filter(|v| v.is_finite())
                .map(|us| us / 1_000_000.0)
                .sum::<f64>();
        } else if line.contains("Triggering wakeup from IRQ") {
            if let Some(irq) = line
                .split_whitespace()
                .last()
                .and_then(|t| t.parse::<u32>().ok())
                .filter(|irq| *irq != 0)
            {
                push_unique(&mut self.wakeup_irqs, irq);
            }
        } else if line.contains("SMU idlemask s0i3") {
            if let Some(mask) = line.split_whitespace().last().and_then(parse_mask) {
                self.idle_masks.push(mask);
            }
        } else if line.contains("ACPI BIOS Error") || line.contains("ACPI Error") {
            self.acpi_errors.push(line.to_owned());
        } else if let Some(span) = GPIO_ACTIVE.as_ref().and_then(|re| re.find(line)) {
            if let Some(digits) = DIGITS.as_ref() {
                for m in digits.find_iter(span.as_str()) {
                    push_unique(&mut self.active_gpios, m.as_str().to_owned());
                }
            }
        } else if line.contains(IRQ1_WORKAROUND_MARKER) {
            self.irq1_workaround = true;
        } else if line.contains("Event logged [IO_PAGE_FAULT") {
            if let Some((device, _)) = line
                .split_once("device=")
                .and_then(|(_, rest)| rest.split_once(" domain"))
            {
                push_unique(&mut self.page_faults, device.to_owned());
            }
        }
    }

    /// Number of "Timekeeping suspended" lines seen.
    pub fn cycle_count(&self) -> u32 {
        self.cycle_count
    }

    /// Seconds the kernel reported being suspended.
    pub fn kernel_duration(&self) -> f64 {
        self.kernel_duration
    }

    /// Seconds the PMC reported in the deepest hardware state.
    pub fn hw_sleep_duration(&self) -> f64 {
        self.hw_sleep_duration
    }

    /// Whether an LPS0 transition was logged.
    pub fn upep(&self) -> bool {
        self.upep
    }

    /// Whether the LPS0 transition used the Microsoft uPEP GUID.
    pub fn upep_microsoft(&self) -> bool {
        self.upep_microsoft
    }

    /// IRQs that triggered a wakeup, in first-seen order.
    pub fn wakeup_irqs(&self) -> &[u32] {
        &self.wakeup_irqs
    }

    /// Raw SMU idle masks, in log order.
    pub fn idle_masks(&self) -> &[u32] {
        &self.idle_masks
    }

    /// ACPI interpreter error lines.
    pub fn acpi_errors(&self) -> &[String] {
        &self.acpi_errors
    }

    /// GPIO numbers reported active.
    pub fn active_gpios(&self) -> &[String] {
        &self.active_gpios
    }

    /// Whether the kernel applied the IRQ1 workaround.
    pub fn irq1_workaround(&self) -> bool {
        self.irq1_workaround
    }

    /// ACPI devices that received `Notify()` during the cycle.
    pub fn notify_devices(&self) -> &[String] {
        &self.notify_devices
    }

    /// PCI devices with IOMMU page faults.
    pub fn page_faults(&self) -> &[String] {
        &self.page_faults
    }

    /// Every retained line with its priority.
    pub fn debug_lines(&self) -> &[DebugLine] {
        &self.debug_lines
    }

    /// Bits that differ between any two idle masks.
    pub fn idle_bits_changed(&self) -> u32 {
        let mut changed = 0u32;
        for (i, &a) in self.idle_masks.iter().enumerate() {
            for &b in &self.idle_masks[i..] {
                changed |= (a & !b) | (b & !a);
            }
        }
        changed
    }

    fn irq1_woke(&self, needs_irq1_workaround: bool) -> bool {
        needs_irq1_workaround && self.wakeup_irqs.contains(&1)
    }

    /// Failures evidenced by the observed lines.
    pub fn failures(&self, needs_irq1_workaround: bool) -> Vec<Failure> {
        let mut failures = Vec::new();
        if self.irq1_woke(needs_irq1_workaround) && !self.irq1_workaround {
            failures.push(Failure::Irq1Workaround);
        }
        if !self.acpi_errors.is_empty() {
            failures.push(Failure::AcpiBiosError {
                errors: self.acpi_errors.clone(),
            });
        }
        if !self.page_faults.is_empty() {
            failures.push(Failure::IommuPageFault {
                devices: self.page_faults.clone(),
            });
        }
        failures
    }

    /// Report lines summarizing the pass.
    pub fn findings(&self, needs_irq1_workaround: bool) -> Vec<Finding> {
        let mut out = Vec::new();
        if self.cycle_count > 0 {
            out.push(Finding::cycle(
                format!("Hardware sleep cycle count: {}", self.cycle_count),
                Symbol::Sleep,
            ));
        }
        if self.irq1_woke(needs_irq1_workaround) {
            if self.irq1_workaround {
                out.push(Finding::cycle(
                    "Kernel workaround for IRQ1 issue utilized",
                    Symbol::Info,
                ));
            } else {
                out.push(Finding::cycle("IRQ1 found during wakeup", Symbol::Warn));
            }
        }
        let changed = self.idle_bits_changed();
        for bit in 0..u32::BITS {
            let mask = 1u32.checked_shl(bit).unwrap_or(0);
            if changed & mask != 0 {
                out.push(Finding::debug(format!(
                    "Idle mask bit {bit} (0x{mask:x}) changed during suspend"
                )));
            }
        }
        if self.upep {
            out.push(Finding::debug(if self.upep_microsoft {
                "Used Microsoft uPEP GUID in LPS0 _DSM"
            } else {
                "Used AMD uPEP GUID in LPS0 _DSM"
            }));
        }
        if !self.acpi_errors.is_empty() {
            out.push(Finding::cycle("ACPI BIOS errors found", Symbol::Fail));
        }
        if !self.page_faults.is_empty() {
            out.push(Finding::cycle("Page faults found", Symbol::Fail));
        }
        if !self.notify_devices.is_empty() {
            out.push(Finding::cycle(
                format!(
                    "Notify devices {:?} found during suspend",
                    self.notify_devices
                ),
                Symbol::Sleep,
            ));
        }
        out
    }
}

fn parse_mask(token: &str) -> Option<u32> {
    let digits = token
        .strip_prefix("0x")
        .or_else(|| token.strip_prefix("0X"))
        .unwrap_or(token);
    u32::from_str_radix(digits, 16).ok()
}

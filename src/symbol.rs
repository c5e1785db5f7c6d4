//! Status symbols attached to stored findings.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Marker shown next to a finding in reports.
///
/// Stored as its glyph in the `symbol` column of `prereq_data` and
/// `cycle_data`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Symbol {
    /// Check passed.
    Ok,
    /// Check failed.
    Fail,
    /// Warning, check degraded or skipped.
    Warn,
    /// Sleep related observation.
    Sleep,
    /// Neutral information.
    Info,
    /// Debug detail.
    Debug,
    /// Battery reading.
    Battery,
    /// Kernel or distribution detail.
    Linux,
    /// CPU detail.
    Cpu,
    /// Tool narration.
    Speak,
    /// Summary verdict.
    Verdict,
    /// Needs the user's attention.
    Look,
    /// Thermal observation.
    Thermal,
    /// Decoded firmware trace output.
    Bios,
}

impl Symbol {
    /// Glyph stored in the database and printed in reports.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "✅",
            Self::Fail => "❌",
            Self::Warn => "🚦",
            Self::Sleep => "💤",
            Self::Info => "○",
            Self::Debug => "🦟",
            Self::Battery => "🔋",
            Self::Linux => "🐧",
            Self::Cpu => "💻",
            Self::Speak => "🗣️",
            Self::Verdict => "💯",
            Self::Look => "👀",
            Self::Thermal => "🌡️",
            Self::Bios => "🖴",
        }
    }

    /// Parse a stored glyph back into a symbol.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "✅" => Some(Self::Ok),
            "❌" => Some(Self::Fail),
            "🚦" => Some(Self::Warn),
            "💤" => Some(Self::Sleep),
            "○" => Some(Self::Info),
            "🦟" => Some(Self::Debug),
            "🔋" => Some(Self::Battery),
            "🐧" => Some(Self::Linux),
            "💻" => Some(Self::Cpu),
            "🗣️" => Some(Self::Speak),
            "💯" => Some(Self::Verdict),
            "👀" => Some(Self::Look),
            "🌡️" => Some(Self::Thermal),
            "🖴" => Some(Self::Bios),
            _ => None,
        }
    }

    /// Symbol for a syslog priority as reported by the kernel log.
    ///
    /// 7 is debug, 4 is warning, 3 and below are errors. Anything else,
    /// including a missing priority, is plain information.
    pub fn for_priority(priority: Option<u8>) -> Self {
        match priority {
            Some(7) => Self::Debug,
            Some(4) => Self::Warn,
            Some(p) if p <= 3 => Self::Fail,
            _ => Self::Info,
        }
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Syslog priority used for plain debug records.
pub const PRIORITY_INFO: u8 = 6;

/// Syslog priority used for verbose trace records.
pub const PRIORITY_DEBUG: u8 = 7;

/// Syslog priority used for warnings.
pub const PRIORITY_WARNING: u8 = 4;

//! Uniform access to the kernel log.
//!
//! Three backends sit behind [`KernelLog`]: the systemd journal, a `dmesg`
//! ring buffer snapshot, and a static captured file. They differ in how
//! precisely they can seek by time; callers use them the same way.
//! [`open_kernel_log`] picks the first backend that works.

use std::path::PathBuf;

use chrono::{DateTime, Local};
use regex::Regex;
use tracing::debug;

pub mod dmesg;
pub mod file;
pub mod journal;

pub use dmesg::DmesgLog;
pub use file::FileLog;
pub use journal::JournalLog;

/// Which backend produced a log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogBackend {
    /// systemd journal, exact time seeking.
    Journal,
    /// Kernel ring buffer via `dmesg`, coarse time seeking.
    Dmesg,
    /// A captured file, no seeking.
    File,
}

impl LogBackend {
    /// Human readable backend name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Journal => "journal",
            Self::Dmesg => "dmesg",
            Self::File => "file",
        }
    }
}

/// Errors produced by kernel log backends.
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    /// A backend helper program could not be spawned.
    #[error("failed to run {program}: {source}")]
    Spawn {
        /// Program that was run.
        program: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// A backend helper program exited unsuccessfully.
    #[error("{program} exited with {status}: {stderr}")]
    Command {
        /// Program that was run.
        program: String,
        /// Exit status text.
        status: String,
        /// Captured stderr.
        stderr: String,
    },
    /// A captured log file could not be read.
    #[error("failed to read kernel log file {path}: {source}")]
    File {
        /// File that was read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The backend is present but cannot serve kernel messages here.
    #[error("{backend} backend unsupported: {reason}")]
    Unsupported {
        /// Backend name.
        backend: &'static str,
        /// Why it was rejected.
        reason: String,
    },
    /// Every candidate backend failed to open.
    #[error("no kernel log available ({})", attempts.join("; "))]
    Unavailable {
        /// One entry per backend that was tried.
        attempts: Vec<String>,
    },
}

/// Line consumer for [`KernelLog::process_callback`].
///
/// Receives the message text and, when the backend knows it, its syslog
/// priority.
pub type LineCallback<'a> = dyn FnMut(&str, Option<u8>) + 'a;

/// Read access to the kernel log of the current boot.
pub trait KernelLog: Send {
    /// Backend kind.
    fn backend(&self) -> LogBackend;

    /// Rewind to the start of the current boot's kernel messages.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend needs to re-read and cannot.
    fn seek(&mut self) -> Result<(), LogError>;

    /// Position at `time`, or at the current end when `time` is `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend needs to re-read and cannot.
    fn seek_tail(&mut self, time: Option<DateTime<Local>>) -> Result<(), LogError>;

    /// Deliver every line in view, in order, to `callback`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot read its source.
    fn process_callback(&mut self, callback: &mut LineCallback<'_>) -> Result<(), LogError>;

    /// First line in view containing every one of `needles`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot read its source.
    fn match_line(&mut self, needles: &[&str]) -> Result<Option<String>, LogError> {
        let mut found = None;
        self.process_callback(&mut |line, _| {
            if found.is_none() && needles.iter().all(|n| line.contains(n)) {
                found = Some(line.to_owned());
            }
        })?;
        Ok(found)
    }

    /// First line in view matching `pattern`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot read its source.
    fn match_pattern(&mut self, pattern: &Regex) -> Result<Option<String>, LogError> {
        let mut found = None;
        self.process_callback(&mut |line, _| {
            if found.is_none() && pattern.is_match(line) {
                found = Some(line.to_owned());
            }
        })?;
        Ok(found)
    }

    /// First line of the underlying buffer, for backends that have one.
    fn header(&self) -> Option<String> {
        None
    }
}

/// How to locate the kernel log.
#[derive(Debug, Clone)]
pub struct KernelLogSelection {
    /// Read this file instead of the live log.
    pub input_file: Option<PathBuf>,
    /// `journalctl` executable.
    pub journalctl: PathBuf,
    /// `dmesg` executable.
    pub dmesg: PathBuf,
}

impl Default for KernelLogSelection {
    fn default() -> Self {
        Self {
            input_file: None,
            journalctl: PathBuf::from("journalctl"),
            dmesg: PathBuf::from("dmesg"),
        }
    }
}

/// Open the best available kernel log.
///
/// An explicit input file is used exclusively. Otherwise the journal is
/// tried first and `dmesg` second. Each failed attempt is logged at debug
/// level and recorded in [`LogError::Unavailable`] if nothing works.
///
/// # Errors
///
/// Returns [`LogError::Unavailable`] when no backend could be opened.
pub fn open_kernel_log(selection: &KernelLogSelection) -> Result<Box<dyn KernelLog>, LogError> {
    let mut attempts = Vec::new();

    if let Some(path) = &selection.input_file {
        return match FileLog::open(path) {
            Ok(log) => Ok(Box::new(log)),
            Err(e) => {
                attempts.push(format!("file: {e}"));
                Err(LogError::Unavailable { attempts })
            }
        };
    }

    match JournalLog::open(&selection.journalctl) {
        Ok(log) => {
            debug!(backend = "journal", "kernel log provider selected");
            return Ok(Box::new(log));
        }
        Err(e) => {
            debug!(error = %e, "journal backend unavailable");
            attempts.push(format!("journal: {e}"));
        }
    }

    match DmesgLog::open(&selection.dmesg) {
        Ok(log) => {
            debug!(backend = "dmesg", "kernel log provider selected");
            Ok(Box::new(log))
        }
        Err(e) => {
            debug!(error = %e, "dmesg backend unavailable");
            attempts.push(format!("dmesg: {e}"));
            Err(LogError::Unavailable { attempts })
        }
    }
}

/// Run a helper program and return its stdout.
pub(crate) fn run_capture(program: &std::path::Path, args: &[String]) -> Result<String, LogError> {
    let output = std::process::Command::new(program)
        .args(args)
        .stdin(std::process::Stdio::null())
        .output()
        .map_err(|source| LogError::Spawn {
            program: program.display().to_string(),
            source,
        })?;
    if !output.status.success() {
        return Err(LogError::Command {
            program: program.display().to_string(),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

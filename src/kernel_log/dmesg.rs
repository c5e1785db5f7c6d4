//! Kernel ring buffer backend driven through `dmesg`.
//!
//! The ring buffer cannot be seeked, so every seek takes a fresh snapshot.
//! Newer util-linux builds accept `--since`; when available a time seek
//! asks for messages from ten seconds before the requested time because
//! dmesg timestamps drift from wall clock time.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, TimeDelta};
use tracing::debug;

use super::{run_capture, KernelLog, LineCallback, LogBackend, LogError};

/// Slack subtracted from a `--since` time to absorb clock rounding.
const SINCE_FUZZ_SECS: i64 = 10;

/// Snapshot of the kernel ring buffer.
#[derive(Debug, Clone)]
pub struct DmesgLog {
    program: PathBuf,
    since_support: bool,
    buffer: String,
    /// Lines of `buffer` hidden from the current view.
    skip: usize,
}

impl DmesgLog {
    /// Probe `program` for `--since` support and take an initial snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if `dmesg` cannot be run or the kernel refuses to
    /// hand out the ring buffer.
    pub fn open(program: &Path) -> Result<Self, LogError> {
        let help = run_capture(program, &["-h".to_owned()])?;
        let since_support = help.lines().any(|l| l.contains("--since"));
        debug!(since_support, "dmesg capabilities detected");

        let mut log = Self {
            program: program.to_path_buf(),
            since_support,
            buffer: String::new(),
            skip: 0,
        };
        log.refresh()?;
        Ok(log)
    }

    /// Whether the installed `dmesg` can filter by time.
    pub fn since_support(&self) -> bool {
        self.since_support
    }

    fn base_args() -> Vec<String> {
        vec!["-t".to_owned(), "-k".to_owned()]
    }

    fn refresh(&mut self) -> Result<(), LogError> {
        self.buffer = run_capture(&self.program, &Self::base_args())?;
        self.skip = 0;
        Ok(())
    }
}

/// Arguments that restrict a `dmesg` read to messages near `time`.
pub fn since_args(time: DateTime<Local>) -> Vec<String> {
    let fuzzed = time
        .checked_sub_signed(TimeDelta::seconds(SINCE_FUZZ_SECS))
        .unwrap_or(time);
    vec![
        "--time-format=iso".to_owned(),
        format!("--since={}", fuzzed.format("%Y-%m-%dT%H:%M:%S")),
    ]
}

impl KernelLog for DmesgLog {
    fn backend(&self) -> LogBackend {
        LogBackend::Dmesg
    }

    fn seek(&mut self) -> Result<(), LogError> {
        self.refresh()
    }

    fn seek_tail(&mut self, time: Option<DateTime<Local>>) -> Result<(), LogError> {
        match time {
            Some(t) => {
                let mut args = Self::base_args();
                if self.since_support {
                    args.extend(since_args(t));
                }
                self.buffer = run_capture(&self.program, &args)?;
                self.skip = 0;
            }
            None => {
                self.refresh()?;
                self.skip = self.buffer.lines().count();
            }
        }
        Ok(())
    }

    fn process_callback(&mut self, callback: &mut LineCallback<'_>) -> Result<(), LogError> {
        for line in self.buffer.lines().skip(self.skip) {
            callback(line, None);
        }
        Ok(())
    }

    fn header(&self) -> Option<String> {
        self.buffer.lines().next().map(str::to_owned)
    }
}

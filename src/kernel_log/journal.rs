//! systemd journal backend.
//!
//! Reads kernel transport messages of the current boot through
//! `journalctl -o json`. Position is kept as a journal cursor so repeated
//! reads continue where the previous one stopped.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde_json::Value;

use super::{run_capture, KernelLog, LineCallback, LogBackend, LogError};

/// One kernel message from the journal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalEntry {
    /// Message text.
    pub message: String,
    /// Syslog priority, when present.
    pub priority: Option<u8>,
    /// Journal cursor of this entry.
    pub cursor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Position {
    Head,
    Since(i64),
    AfterCursor(String),
}

/// Kernel log view over the systemd journal.
#[derive(Debug, Clone)]
pub struct JournalLog {
    program: PathBuf,
    position: Position,
}

impl JournalLog {
    /// Check that `program` can read kernel messages for this boot.
    ///
    /// # Errors
    ///
    /// Returns an error if `journalctl` cannot be run, or if it returns no
    /// kernel messages (typically missing permissions or a volatile
    /// journal that was never populated).
    pub fn open(program: &Path) -> Result<Self, LogError> {
        let mut args = base_args();
        args.extend(["-n".to_owned(), "1".to_owned()]);
        let sample = run_capture(program, &args)?;
        if parse_journal_output(&sample).is_empty() {
            return Err(LogError::Unsupported {
                backend: "journal",
                reason: "no kernel messages for the current boot".to_owned(),
            });
        }
        Ok(Self {
            program: program.to_path_buf(),
            position: Position::Head,
        })
    }

    fn read(&self) -> Result<Vec<JournalEntry>, LogError> {
        let mut args = base_args();
        match &self.position {
            Position::Head => {}
            Position::Since(epoch) => args.push(format!("--since=@{epoch}")),
            Position::AfterCursor(cursor) => args.push(format!("--after-cursor={cursor}")),
        }
        let text = run_capture(&self.program, &args)?;
        Ok(parse_journal_output(&text))
    }
}

fn base_args() -> Vec<String> {
    ["-k", "-b", "0", "-o", "json", "--no-pager"]
        .into_iter()
        .map(str::to_owned)
        .collect()
}

/// Parse `journalctl -o json` output, one object per line.
///
/// Lines that are not JSON objects with a `MESSAGE` are skipped. Messages
/// the journal stored as byte arrays are decoded lossily.
pub fn parse_journal_output(text: &str) -> Vec<JournalEntry> {
    text.lines()
        .filter_map(|line| serde_json::from_str::<Value>(line).ok())
        .filter_map(|value| {
            let message = match value.get("MESSAGE")? {
                Value::String(s) => s.clone(),
                Value::Array(bytes) => {
                    let raw: Vec<u8> = bytes
                        .iter()
                        .filter_map(|b| b.as_u64().and_then(|n| u8::try_from(n).ok()))
                        .collect();
                    String::from_utf8_lossy(&raw).into_owned()
                }
                _ => return None,
            };
            let priority = match value.get("PRIORITY") {
                Some(Value::String(s)) => s.parse().ok(),
                Some(Value::Number(n)) => n.as_u64().and_then(|n| u8::try_from(n).ok()),
                _ => None,
            };
            let cursor = value
                .get("__CURSOR")
                .and_then(Value::as_str)
                .map(str::to_owned);
            Some(JournalEntry {
                message,
                priority,
                cursor,
            })
        })
        .collect()
}

impl KernelLog for JournalLog {
    fn backend(&self) -> LogBackend {
        LogBackend::Journal
    }

    fn seek(&mut self) -> Result<(), LogError> {
        self.position = Position::Head;
        Ok(())
    }

    fn seek_tail(&mut self, time: Option<DateTime<Local>>) -> Result<(), LogError> {
        self.position = match time {
            Some(t) => Position::Since(t.timestamp()),
            None => {
                let mut args = base_args();
                args.extend(["-n".to_owned(), "1".to_owned()]);
                let text = run_capture(&self.program, &args)?;
                parse_journal_output(&text)
                    .pop()
                    .and_then(|e| e.cursor)
                    .map_or(Position::Head, Position::AfterCursor)
            }
        };
        Ok(())
    }

    fn process_callback(&mut self, callback: &mut LineCallback<'_>) -> Result<(), LogError> {
        let entries = self.read()?;
        for entry in &entries {
            callback(&entry.message, entry.priority);
        }
        if let Some(cursor) = entries.iter().rev().find_map(|e| e.cursor.clone()) {
            self.position = Position::AfterCursor(cursor);
        }
        Ok(())
    }

    fn match_line(&mut self, needles: &[&str]) -> Result<Option<String>, LogError> {
        Ok(self
            .read()?
            .into_iter()
            .find(|e| needles.iter().all(|n| e.message.contains(n)))
            .map(|e| e.message))
    }

    fn match_pattern(&mut self, pattern: &regex::Regex) -> Result<Option<String>, LogError> {
        Ok(self
            .read()?
            .into_iter()
            .find(|e| pattern.is_match(&e.message))
            .map(|e| e.message))
    }
}

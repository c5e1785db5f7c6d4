//! Static captured log file backend.

use std::path::Path;

use chrono::{DateTime, Local};

use super::{KernelLog, LineCallback, LogBackend, LogError};

/// A kernel log read once from disk.
///
/// Seeking is a no-op; every call sees the whole file.
#[derive(Debug, Clone)]
pub struct FileLog {
    buffer: String,
}

impl FileLog {
    /// Read `path` into memory.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::File`] if the file cannot be read.
    pub fn open(path: &Path) -> Result<Self, LogError> {
        let bytes = std::fs::read(path).map_err(|source| LogError::File {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::from_text(String::from_utf8_lossy(&bytes).into_owned()))
    }

    /// Wrap already captured text.
    pub fn from_text(buffer: String) -> Self {
        Self { buffer }
    }
}

impl KernelLog for FileLog {
    fn backend(&self) -> LogBackend {
        LogBackend::File
    }

    fn seek(&mut self) -> Result<(), LogError> {
        Ok(())
    }

    fn seek_tail(&mut self, _time: Option<DateTime<Local>>) -> Result<(), LogError> {
        Ok(())
    }

    fn process_callback(&mut self, callback: &mut LineCallback<'_>) -> Result<(), LogError> {
        for line in self.buffer.lines() {
            callback(line, None);
        }
        Ok(())
    }

    fn header(&self) -> Option<String> {
        self.buffer.lines().next().map(str::to_owned)
    }
}

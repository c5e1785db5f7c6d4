//! Access to the kernel's sysfs, procfs and device files.
//!
//! Every path is resolved under a configurable root so a fake tree in a
//! temporary directory can stand in for `/` in tests.

use std::io::ErrorKind;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

pub mod acpi;
pub mod cpu;
pub mod pci;
pub mod probe;
pub mod suspend;

pub use acpi::{AcpiTraceGuard, AcpiTracer, PmDebugGuard, TraceMode};
pub use cpu::{irq1_workaround_needed, soc_needs_irq1_wa, CppcRegisters, CpuInfo};
pub use pci::{pci_devices, PciDevice};
pub use probe::{Battery, SysfsProbe, SystemProbe, ThermalZone, TripPoint, WakeIrq};
pub use suspend::{program_wakealarm, LogindSuspend, SuspendError, SuspendTrigger, SysfsSuspend};

/// Errors reading or writing system files.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    /// The file does not exist, usually a missing driver or kernel feature.
    #[error("{} not found", path.display())]
    NotFound {
        /// Missing path.
        path: PathBuf,
    },
    /// The file exists but the process may not access it.
    #[error("permission denied accessing {}", path.display())]
    PermissionDenied {
        /// Protected path.
        path: PathBuf,
    },
    /// Any other I/O failure.
    #[error("failed to access {}: {source}", path.display())]
    Io {
        /// Path involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The file was read but its content made no sense.
    #[error("unexpected content in {}: {detail}", path.display())]
    Malformed {
        /// Path involved.
        path: PathBuf,
        /// What was wrong.
        detail: String,
    },
}

impl ProbeError {
    fn from_io(path: &Path, source: std::io::Error) -> Self {
        match source.kind() {
            ErrorKind::NotFound => Self::NotFound {
                path: path.to_path_buf(),
            },
            ErrorKind::PermissionDenied => Self::PermissionDenied {
                path: path.to_path_buf(),
            },
            _ => Self::Io {
                path: path.to_path_buf(),
                source,
            },
        }
    }

    /// Whether the error means the file is absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Whether the error means access was refused.
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, Self::PermissionDenied { .. })
    }
}

/// A filesystem root holding `sys`, `proc` and `dev`.
#[derive(Debug, Clone)]
pub struct Sysfs {
    root: PathBuf,
}

impl Default for Sysfs {
    fn default() -> Self {
        Self::new("/")
    }
}

impl Sysfs {
    /// Use `root` in place of `/`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The configured root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve an absolute system path under the root.
    pub fn path(&self, rel: impl AsRef<Path>) -> PathBuf {
        let rel = rel.as_ref();
        self.root.join(rel.strip_prefix("/").unwrap_or(rel))
    }

    /// Whether the path exists.
    pub fn exists(&self, rel: impl AsRef<Path>) -> bool {
        self.path(rel).exists()
    }

    /// Read a text file, trimmed of surrounding whitespace.
    ///
    /// # Errors
    ///
    /// Returns a [`ProbeError`] classified by the I/O error kind.
    pub fn read(&self, rel: impl AsRef<Path>) -> Result<String, ProbeError> {
        let path = self.path(rel);
        let bytes = std::fs::read(&path).map_err(|e| ProbeError::from_io(&path, e))?;
        Ok(String::from_utf8_lossy(&bytes).trim().to_owned())
    }

    /// Read a file as raw bytes.
    ///
    /// # Errors
    ///
    /// Returns a [`ProbeError`] classified by the I/O error kind.
    pub fn read_bytes(&self, rel: impl AsRef<Path>) -> Result<Vec<u8>, ProbeError> {
        let path = self.path(rel);
        std::fs::read(&path).map_err(|e| ProbeError::from_io(&path, e))
    }

    /// Read an integer from a text file.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::Malformed`] if the content is not an integer.
    pub fn read_int(&self, rel: impl AsRef<Path>) -> Result<i64, ProbeError> {
        let path = self.path(&rel);
        let text = self.read(rel)?;
        text.parse().map_err(|_| ProbeError::Malformed {
            path,
            detail: format!("expected an integer, found {text:?}"),
        })
    }

    /// Read `len` bytes at `offset` of a device file such as
    /// `/dev/cpu/0/msr`.
    ///
    /// # Errors
    ///
    /// Returns a [`ProbeError`] classified by the I/O error kind.
    pub fn read_at(&self, rel: impl AsRef<Path>, offset: u64, len: usize) -> Result<Vec<u8>, ProbeError> {
        let path = self.path(rel);
        let file = std::fs::File::open(&path).map_err(|e| ProbeError::from_io(&path, e))?;
        let mut buf = vec![0u8; len];
        file.read_exact_at(&mut buf, offset)
            .map_err(|e| ProbeError::from_io(&path, e))?;
        Ok(buf)
    }

    /// Write `value` to a file in one `write` call.
    ///
    /// # Errors
    ///
    /// Returns a [`ProbeError`] classified by the I/O error kind.
    pub fn write(&self, rel: impl AsRef<Path>, value: &str) -> Result<(), ProbeError> {
        let path = self.path(rel);
        std::fs::write(&path, value).map_err(|e| ProbeError::from_io(&path, e))
    }

    /// Entries of a directory, sorted by name. A missing directory is empty.
    pub fn list_dir(&self, rel: impl AsRef<Path>) -> Vec<PathBuf> {
        let Ok(entries) = std::fs::read_dir(self.path(rel)) else {
            return Vec::new();
        };
        let mut paths: Vec<PathBuf> = entries.filter_map(|e| e.ok().map(|e| e.path())).collect();
        paths.sort();
        paths
    }
}

/// Whether `release` (e.g. `6.15.2-arch1`) is at least `major.minor`.
///
/// Unparsable releases are assumed new enough.
pub fn kernel_at_least(release: &str, major: u64, minor: u64) -> bool {
    let mut parts = release
        .split(|c: char| !c.is_ascii_digit())
        .filter(|p| !p.is_empty())
        .map(str::parse::<u64>);
    match (parts.next(), parts.next()) {
        (Some(Ok(have_major)), Some(Ok(have_minor))) => {
            have_major > major || (have_major == major && have_minor >= minor)
        }
        _ => true,
    }
}

/// Target name of a symlink such as a device's `driver` link.
pub(crate) fn link_name(path: &Path) -> Option<String> {
    std::fs::read_link(path).ok().map(|target| file_name(&target))
}

/// File name of `path` as a string, empty when it has none.
pub(crate) fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Read a file by absolute path, trimmed.
pub(crate) fn read_trimmed(path: &Path) -> Result<String, ProbeError> {
    let bytes = std::fs::read(path).map_err(|e| ProbeError::from_io(path, e))?;
    Ok(String::from_utf8_lossy(&bytes).trim().to_owned())
}

//! Suspend triggers and the RTC wake alarm.
//!
//! A trigger blocks until the system has resumed. Two are provided: a
//! direct write of `mem` to `/sys/power/state`, and a request to
//! systemd-logind over D-Bus (through `busctl`).

use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{ProbeError, Sysfs};

const NVIDIA_SUSPEND: &str = "/proc/driver/nvidia/suspend";
const POWER_STATE: &str = "/sys/power/state";
const WAKEUP_COUNT: &str = "/sys/power/wakeup_count";

const LOGIN1_DEST: &str = "org.freedesktop.login1";
const LOGIN1_PATH: &str = "/org/freedesktop/login1";
const LOGIN1_MANAGER: &str = "org.freedesktop.login1.Manager";

/// Why a suspend attempt failed.
#[derive(Debug, thiserror::Error)]
pub enum SuspendError {
    /// The kernel refused the suspend request.
    #[error("Failed to set suspend state ({old} -> {new}): {source}")]
    StateWrite {
        /// Wakeup count before the attempt.
        old: u64,
        /// Wakeup count after the attempt.
        new: u64,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The NVIDIA driver rejected a suspend or resume notification.
    #[error("Failed to set {value} in NVIDIA driver: {source}")]
    Nvidia {
        /// Value written.
        value: &'static str,
        /// Underlying error.
        #[source]
        source: ProbeError,
    },
    /// logind does not allow suspending.
    #[error("Unable to suspend: logind reports CanSuspend={0}")]
    NotPermitted(String),
    /// Talking to logind failed.
    #[error("Unable to communicate with logind: {0}")]
    Logind(String),
    /// The blocking task running the trigger panicked.
    #[error("suspend task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Something that can put the system to sleep.
#[async_trait]
pub trait SuspendTrigger: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Suspend and return once the system has resumed.
    ///
    /// # Errors
    ///
    /// Returns a [`SuspendError`] if the suspend request fails.
    async fn suspend(&self) -> Result<(), SuspendError>;

    /// Called once after the last cycle.
    ///
    /// # Errors
    ///
    /// Returns a [`SuspendError`] if cleanup fails.
    async fn finish(&self) -> Result<(), SuspendError> {
        Ok(())
    }
}

/// Suspend by writing `mem` to `/sys/power/state`.
#[derive(Debug, Clone, Default)]
pub struct SysfsSuspend {
    sysfs: Sysfs,
}

impl SysfsSuspend {
    /// Trigger against the tree under `sysfs`.
    pub fn new(sysfs: Sysfs) -> Self {
        Self { sysfs }
    }
}

fn wakeup_count(sysfs: &Sysfs) -> u64 {
    sysfs
        .read(WAKEUP_COUNT)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

fn toggle_nvidia(sysfs: &Sysfs, value: &'static str) -> Result<(), SuspendError> {
    if !sysfs.exists(NVIDIA_SUSPEND) {
        return Ok(());
    }
    sysfs
        .write(NVIDIA_SUSPEND, value)
        .map_err(|source| SuspendError::Nvidia { value, source })?;
    debug!(value, "notified NVIDIA driver");
    Ok(())
}

fn write_power_state(path: &Path) -> std::io::Result<()> {
    let mut file = std::fs::OpenOptions::new().write(true).open(path)?;
    file.write_all(b"mem")?;
    file.sync_all()
}

fn suspend_blocking(sysfs: &Sysfs) -> Result<(), SuspendError> {
    toggle_nvidia(sysfs, "suspend")?;
    let old = wakeup_count(sysfs);
    if let Err(source) = write_power_state(&sysfs.path(POWER_STATE)) {
        let new = wakeup_count(sysfs);
        return Err(SuspendError::StateWrite { old, new, source });
    }
    toggle_nvidia(sysfs, "resume")
}

#[async_trait]
impl SuspendTrigger for SysfsSuspend {
    fn name(&self) -> &'static str {
        "sysfs"
    }

    async fn suspend(&self) -> Result<(), SuspendError> {
        let sysfs = self.sysfs.clone();
        tokio::task::spawn_blocking(move || suspend_blocking(&sysfs)).await?
    }
}

/// Suspend through systemd-logind.
#[derive(Debug, Clone)]
pub struct LogindSuspend {
    busctl: PathBuf,
    poll: Duration,
}

impl Default for LogindSuspend {
    fn default() -> Self {
        Self::new("busctl")
    }
}

impl LogindSuspend {
    /// Use the given `busctl` executable.
    pub fn new(busctl: impl Into<PathBuf>) -> Self {
        Self {
            busctl: busctl.into(),
            poll: Duration::from_secs(1),
        }
    }

    async fn busctl(&self, args: Vec<String>) -> Result<String, SuspendError> {
        let program = self.busctl.clone();
        let output = tokio::task::spawn_blocking(move || {
            std::process::Command::new(&program)
                .arg("--system")
                .args(&args)
                .stdin(std::process::Stdio::null())
                .output()
        })
        .await?
        .map_err(|e| SuspendError::Logind(format!("failed to run busctl: {e}")))?;

        if !output.status.success() {
            return Err(SuspendError::Logind(
                String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_owned())
    }

    async fn call(&self, method: &str, extra: &[&str]) -> Result<String, SuspendError> {
        let mut args: Vec<String> = ["call", LOGIN1_DEST, LOGIN1_PATH, LOGIN1_MANAGER, method]
            .into_iter()
            .map(str::to_owned)
            .collect();
        args.extend(extra.iter().map(|s| (*s).to_owned()));
        self.busctl(args).await
    }

    async fn preparing_for_sleep(&self) -> Result<bool, SuspendError> {
        let args = ["get-property", LOGIN1_DEST, LOGIN1_PATH, LOGIN1_MANAGER, "PreparingForSleep"]
            .into_iter()
            .map(str::to_owned)
            .collect();
        let reply = self.busctl(args).await?;
        Ok(parse_busctl_bool(&reply))
    }
}

/// Value of a `busctl` reply such as `s "yes"`.
pub fn parse_busctl_string(reply: &str) -> String {
    reply
        .split_once(' ')
        .map_or(reply, |(_, v)| v)
        .trim()
        .trim_matches('"')
        .to_owned()
}

/// Value of a `busctl` reply such as `b true`.
pub fn parse_busctl_bool(reply: &str) -> bool {
    reply.split_whitespace().last() == Some("true")
}

#[async_trait]
impl SuspendTrigger for LogindSuspend {
    fn name(&self) -> &'static str {
        "logind"
    }

    async fn suspend(&self) -> Result<(), SuspendError> {
        let can = parse_busctl_string(&self.call("CanSuspend", &[]).await?);
        if can != "yes" {
            return Err(SuspendError::NotPermitted(can));
        }
        self.call("Suspend", &["b", "true"]).await?;
        while self.preparing_for_sleep().await? {
            tokio::time::sleep(self.poll).await;
        }
        Ok(())
    }

    async fn finish(&self) -> Result<(), SuspendError> {
        self.call("UnlockSessions", &[]).await.map(|_| ())
    }
}

/// Arm the RTC to wake the system `seconds` from now.
///
/// Returns `false` when no RTC exposes a wake alarm.
///
/// # Errors
///
/// Returns an error if the alarm cannot be written.
pub fn program_wakealarm(sysfs: &Sysfs, seconds: u32) -> Result<bool, ProbeError> {
    let Some(rtc) = sysfs
        .list_dir("/sys/class/rtc")
        .into_iter()
        .map(|dir| dir.join("wakealarm"))
        .filter(|p| p.exists())
        .last()
    else {
        warn!("No RTC device found, please manually wake system");
        return Ok(false);
    };
    let write = |value: &str| {
        std::fs::write(&rtc, value).map_err(|source| ProbeError::Io {
            path: rtc.clone(),
            source,
        })
    };
    write("0")?;
    write(&format!("+{seconds}\n"))?;
    info!(seconds, rtc = %rtc.display(), "wake alarm programmed");
    Ok(true)
}

//! Configuration loading and validation.
//!
//! Loads settings from `/etc/amd-s2idle.toml` (or `$AMD_S2IDLE_CONFIG`).
//! Environment variables override file values; file values override defaults.
//! A missing file is not an error.
//!
//! Precedence: env vars > config file > defaults.

use std::path::PathBuf;

use anyhow::{ensure, Context, Result};
use serde::Deserialize;

use crate::store::{DEFAULT_DB_PATH, FALLBACK_DB_DIR};

/// Config file used when `$AMD_S2IDLE_CONFIG` is unset.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/amd-s2idle.toml";

// ── Top-level config ────────────────────────────────────────────

/// Top-level configuration loaded from TOML.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Filesystem locations.
    pub paths: PathsConfig,
    /// Default cycle parameters for `test`.
    pub cycles: CyclesConfig,
    /// Kernel log sources.
    pub log: LogConfig,
    /// System access.
    pub system: SystemConfig,
}

impl Config {
    /// Load configuration with precedence: env vars > TOML file > defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed,
    /// or the result fails validation.
    pub fn load() -> Result<Self> {
        let path = config_path_with(|key| std::env::var(key).ok());
        let mut config = Self::load_from(&path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load from one TOML file only, with no env overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                tracing::debug!(path = %path.display(), "loading config from file");
                Self::from_toml(&contents)
                    .with_context(|| format!("invalid config file {}", path.display()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "failed to read config file {}: {e}",
                path.display()
            )),
        }
    }

    /// Apply environment variable overrides.
    ///
    /// Takes a resolver function so tests need not touch the process
    /// environment.
    pub fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(v) = env("AMD_S2IDLE_DB") {
            self.paths.db = PathBuf::from(v);
        }
        if let Some(v) = env("AMD_S2IDLE_LOG_DIR") {
            self.paths.log_dir = Some(PathBuf::from(v));
        }
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first invalid value.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            !self.paths.db.as_os_str().is_empty(),
            "paths.db must not be empty"
        );
        ensure!(self.cycles.count > 0, "cycles.count must be at least 1");
        ensure!(self.cycles.duration > 0, "cycles.duration must be at least 1 second");
        if self.cycles.random {
            ensure!(
                self.cycles.duration > crate::orchestrator::MIN_RANDOM_DURATION,
                "cycles.duration must exceed {} seconds in random mode",
                crate::orchestrator::MIN_RANDOM_DURATION
            );
        }
        Ok(())
    }

    /// Parse a TOML string into config.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is malformed.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str).context("failed to parse config TOML")
    }
}

/// Resolve the config file path using a custom env resolver.
pub fn config_path_with(env: impl Fn(&str) -> Option<String>) -> PathBuf {
    env("AMD_S2IDLE_CONFIG").map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from)
}

// ── Paths ───────────────────────────────────────────────────────

/// Filesystem locations.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PathsConfig {
    /// SQLite database.
    #[serde(default = "default_db")]
    pub db: PathBuf,
    /// Directory used when `db` cannot be opened.
    #[serde(default = "default_fallback_dir")]
    pub fallback_dir: PathBuf,
    /// Directory for JSON run logs. Unset disables file logging.
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            db: default_db(),
            fallback_dir: default_fallback_dir(),
            log_dir: None,
        }
    }
}

fn default_db() -> PathBuf {
    PathBuf::from(DEFAULT_DB_PATH)
}

fn default_fallback_dir() -> PathBuf {
    PathBuf::from(FALLBACK_DB_DIR)
}

// ── Cycles ──────────────────────────────────────────────────────

/// Default cycle parameters.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CyclesConfig {
    /// Number of cycles.
    #[serde(default = "default_count")]
    pub count: u32,
    /// Seconds per cycle.
    #[serde(default = "default_duration")]
    pub duration: u32,
    /// Seconds between cycles.
    #[serde(default = "default_wait")]
    pub wait: u32,
    /// Randomize duration and wait.
    #[serde(default)]
    pub random: bool,
}

impl Default for CyclesConfig {
    fn default() -> Self {
        Self {
            count: default_count(),
            duration: default_duration(),
            wait: default_wait(),
            random: false,
        }
    }
}

fn default_count() -> u32 {
    1
}

fn default_duration() -> u32 {
    10
}

fn default_wait() -> u32 {
    4
}

// ── Kernel log ──────────────────────────────────────────────────

/// Kernel log sources.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LogConfig {
    /// Captured log to read instead of the live system.
    #[serde(default)]
    pub input_file: Option<PathBuf>,
    /// `dmesg` executable.
    #[serde(default = "default_dmesg")]
    pub dmesg_program: PathBuf,
    /// `journalctl` executable.
    #[serde(default = "default_journalctl")]
    pub journalctl_program: PathBuf,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            input_file: None,
            dmesg_program: default_dmesg(),
            journalctl_program: default_journalctl(),
        }
    }
}

fn default_dmesg() -> PathBuf {
    PathBuf::from("dmesg")
}

fn default_journalctl() -> PathBuf {
    PathBuf::from("journalctl")
}

// ── System ──────────────────────────────────────────────────────

/// How to request suspend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuspendMethod {
    /// Ask systemd-logind.
    #[default]
    Logind,
    /// Write `/sys/power/state` directly.
    Sysfs,
}

/// System access.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SystemConfig {
    /// Root under which sysfs and procfs paths are resolved.
    #[serde(default = "default_sysfs_root")]
    pub sysfs_root: PathBuf,
    /// Suspend trigger.
    #[serde(default)]
    pub suspend_method: SuspendMethod,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            sysfs_root: default_sysfs_root(),
            suspend_method: SuspendMethod::default(),
        }
    }
}

fn default_sysfs_root() -> PathBuf {
    PathBuf::from("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_empty_toml_uses_defaults() {
        let config = Config::from_toml("").expect("should parse empty");
        assert_eq!(config, Config::default());
        assert_eq!(config.paths.db, PathBuf::from(DEFAULT_DB_PATH));
        assert_eq!(config.system.suspend_method, SuspendMethod::Logind);
    }

    #[test]
    fn test_partial_section_keeps_field_defaults() {
        let config = Config::from_toml("[cycles]\ncount = 5\n").expect("should parse");
        assert_eq!(config.cycles.count, 5);
        assert_eq!(config.cycles.duration, 10);
        assert_eq!(config.cycles.wait, 4);
    }

    #[test]
    fn test_env_overrides_config_values() {
        let toml_str = r#"
[paths]
db = "/from/toml/data.db"
fallback_dir = "/from/toml"
"#;
        let mut config = Config::from_toml(toml_str).expect("should parse");
        let env = |key: &str| -> Option<String> {
            match key {
                "AMD_S2IDLE_DB" => Some("/from/env/data.db".to_string()),
                _ => None,
            }
        };
        config.apply_overrides(env);

        assert_eq!(config.paths.db, PathBuf::from("/from/env/data.db"));
        assert_eq!(config.paths.fallback_dir, PathBuf::from("/from/toml"));
        assert!(config.paths.log_dir.is_none());
    }

    #[test]
    fn test_config_path_prefers_env() {
        let path = config_path_with(|k| (k == "AMD_S2IDLE_CONFIG").then(|| "/tmp/x.toml".into()));
        assert_eq!(path, PathBuf::from("/tmp/x.toml"));
        assert_eq!(config_path_with(|_| None), PathBuf::from(DEFAULT_CONFIG_PATH));
    }

    #[test]
    fn test_validate_rejects_short_random_duration() {
        let config = Config::from_toml("[cycles]\nrandom = true\nduration = 4\n").expect("parse");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_suspend_method_rejected() {
        assert!(Config::from_toml("[system]\nsuspend_method = \"acpi\"\n").is_err());
    }
}

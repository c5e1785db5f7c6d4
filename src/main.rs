//! amd-s2idle CLI entry point.
//!
//! Provides `test`, `report`, `hook` and `version` subcommands for running
//! suspend cycles, reading stored results, integrating with systemd sleep
//! hooks and printing the version.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::path::PathBuf;

use anyhow::{bail, Context};
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn};

use amd_s2idle::config::{Config, SuspendMethod};
use amd_s2idle::kernel_log::{open_kernel_log, KernelLog, KernelLogSelection};
use amd_s2idle::logging;
use amd_s2idle::orchestrator::{Orchestrator, RunSettings, SuspendFailed};
use amd_s2idle::prereq::PrerequisiteValidator;
use amd_s2idle::report::{day_range, Report, ReportFormat};
use amd_s2idle::store::{CycleKey, Store};
use amd_s2idle::system::{
    irq1_workaround_needed, LogindSuspend, SuspendTrigger, SysfsProbe, SysfsSuspend, Sysfs,
};

/// Suspend-to-idle diagnostics for AMD Linux platforms.
#[derive(Parser)]
#[command(name = "amd-s2idle", version, about)]
struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Report output formats.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum Format {
    /// Plain text.
    Txt,
    /// JSON.
    Json,
}

/// systemd sleep hook phases.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum HookPhase {
    /// Before suspend.
    Pre,
    /// After resume.
    Post,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Check prerequisites and run suspend cycles.
    Test {
        /// Number of cycles.
        #[arg(long)]
        count: Option<u32>,
        /// Seconds per cycle (maximum in random mode).
        #[arg(long)]
        duration: Option<u32>,
        /// Seconds between cycles (maximum in random mode).
        #[arg(long)]
        wait: Option<u32>,
        /// Randomize duration and wait per cycle.
        #[arg(long)]
        random: bool,
        /// Run cycles even when prerequisites fail.
        #[arg(long)]
        force: bool,
        /// Include debug lines in the printed results.
        #[arg(long)]
        tool_debug: bool,
        /// Trace BIOS debug output during suspend.
        #[arg(long)]
        bios_debug: bool,
        /// Read kernel messages from this file instead of the live log.
        #[arg(long)]
        logs: Option<PathBuf>,
        /// Verbose logging.
        #[arg(long)]
        debug: bool,
    },
    /// Report on stored cycles.
    Report {
        /// First day to include (YYYY-MM-DD).
        #[arg(long)]
        since: Option<NaiveDate>,
        /// Last day to include (YYYY-MM-DD).
        #[arg(long)]
        until: Option<NaiveDate>,
        /// Output format.
        #[arg(long, value_enum, default_value = "txt")]
        format: Format,
        /// Include debug lines.
        #[arg(long)]
        debug: bool,
    },
    /// systemd sleep hook.
    Hook {
        /// Hook phase.
        #[arg(value_enum)]
        phase: HookPhase,
    },
    /// Print the version.
    Version,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Version => {
            println!("amd-s2idle {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Command::Report {
            since,
            until,
            format,
            debug,
        } => handle_report(since, until, format, debug).await,
        Command::Hook { phase } => handle_hook(phase).await,
        Command::Test {
            count,
            duration,
            wait,
            random,
            force,
            tool_debug,
            bios_debug,
            logs,
            debug,
        } => {
            let config = Config::load().context("failed to load configuration")?;
            let _logging_guard = match &config.paths.log_dir {
                Some(dir) => Some(logging::init_production(dir, debug)?),
                None => {
                    logging::init_cli(debug);
                    None
                }
            };
            let settings = RunSettings {
                count: count.unwrap_or(config.cycles.count),
                duration: duration.unwrap_or(config.cycles.duration),
                wait: wait.unwrap_or(config.cycles.wait),
                random: random || config.cycles.random,
                bios_debug,
            };
            handle_test(config, settings, force, tool_debug, logs).await
        }
    }
}

async fn open_store(config: &Config) -> anyhow::Result<Store> {
    Store::open_with_fallback(&config.paths.db, &config.paths.fallback_dir)
        .await
        .with_context(|| format!("failed to open database {}", config.paths.db.display()))
}

fn open_log(config: &Config, input_file: Option<PathBuf>) -> Option<Box<dyn KernelLog>> {
    let selection = KernelLogSelection {
        input_file: input_file.or_else(|| config.log.input_file.clone()),
        journalctl: config.log.journalctl_program.clone(),
        dmesg: config.log.dmesg_program.clone(),
    };
    match open_kernel_log(&selection) {
        Ok(log) => {
            info!(backend = log.backend().as_str(), "kernel log opened");
            Some(log)
        }
        Err(e) => {
            warn!(error = %e, "kernel log unavailable, log based checks are skipped");
            None
        }
    }
}

fn trigger_for(config: &Config, sysfs: &Sysfs) -> Box<dyn SuspendTrigger> {
    match config.system.suspend_method {
        SuspendMethod::Logind => Box::new(LogindSuspend::default()),
        SuspendMethod::Sysfs => Box::new(SysfsSuspend::new(sysfs.clone())),
    }
}

async fn print_report(
    store: &mut Store,
    since: CycleKey,
    until: CycleKey,
    format: ReportFormat,
    debug: bool,
) -> anyhow::Result<()> {
    let report = Report::gather(store, since, until, debug)
        .await
        .context("failed to read report data")?;
    println!("{}", format.renderer().render(&report)?);
    Ok(())
}

/// Check prerequisites, then run the requested cycles.
async fn handle_test(
    config: Config,
    settings: RunSettings,
    force: bool,
    tool_debug: bool,
    logs: Option<PathBuf>,
) -> anyhow::Result<()> {
    settings.validate()?;
    let sysfs = Sysfs::new(&config.system.sysfs_root);
    let mut store = open_store(&config).await?;
    let mut log = open_log(&config, logs);

    let prereq = PrerequisiteValidator::new(sysfs.clone(), &mut store, log.as_deref_mut())
        .run()
        .await
        .context("failed to record prerequisite checks")?;
    for failure in &prereq.failures {
        println!("{failure}\n");
    }
    if !prereq.passed && !force {
        print_report(&mut store, prereq.key, prereq.key, ReportFormat::Txt, tool_debug).await?;
        bail!("system does not meet s2idle prerequisites, use --force to run anyway");
    }

    let mut orchestrator = Orchestrator::new(
        store,
        Box::new(SysfsProbe::new(sysfs.clone())),
        trigger_for(&config, &sysfs),
        sysfs,
    )
    .with_irq1_workaround(prereq.needs_irq1_workaround());
    if let Some(log) = log {
        orchestrator = orchestrator.with_kernel_log(log);
    }

    let result = orchestrator.run(&settings).await;
    let mut store = orchestrator.into_store();
    let outcome = match result {
        Ok(outcome) => outcome,
        Err(e) => {
            if let Some(failed) = e.downcast_ref::<SuspendFailed>() {
                let (since, until) = failed.key_range();
                let printed =
                    print_report(&mut store, since, until, ReportFormat::Txt, tool_debug).await;
                if let Err(report_err) = printed {
                    warn!(error = %report_err, "unable to report the failed run");
                }
                for failure in failed.outcome.failures() {
                    println!("{failure}\n");
                }
            }
            return Err(e);
        }
    };

    if let (Some(first), Some(last)) = (outcome.cycles.first(), outcome.cycles.last()) {
        print_report(&mut store, first.key, last.key, ReportFormat::Txt, tool_debug).await?;
    }
    for failure in outcome.failures() {
        println!("{failure}\n");
    }
    if outcome.interrupted {
        info!("run interrupted");
    }
    store.close().await?;
    Ok(())
}

/// Render stored results.
async fn handle_report(
    since: Option<NaiveDate>,
    until: Option<NaiveDate>,
    format: Format,
    debug: bool,
) -> anyhow::Result<()> {
    logging::init_cli(debug);
    let config = Config::load().context("failed to load configuration")?;
    let mut store = open_store(&config).await?;
    let (since, until) = day_range(since, until);
    let format = match format {
        Format::Txt => ReportFormat::Txt,
        Format::Json => ReportFormat::Json,
    };
    print_report(&mut store, since, until, format, debug).await?;
    store.close().await?;
    Ok(())
}

/// Run one half of a hook driven cycle.
async fn handle_hook(phase: HookPhase) -> anyhow::Result<()> {
    logging::init_cli(false);
    let config = Config::load().context("failed to load configuration")?;
    let sysfs = Sysfs::new(&config.system.sysfs_root);
    let store = open_store(&config).await?;
    let needs_irq1 = irq1_workaround_needed(&sysfs);
    let mut orchestrator = Orchestrator::new(
        store,
        Box::new(SysfsProbe::new(sysfs.clone())),
        trigger_for(&config, &sysfs),
        sysfs,
    )
    .with_irq1_workaround(needs_irq1);
    if let Some(log) = open_log(&config, None) {
        orchestrator = orchestrator.with_kernel_log(log);
    }
    match phase {
        HookPhase::Pre => orchestrator.pre_hook(config.cycles.duration, false).await?,
        HookPhase::Post => {
            let cycle = orchestrator.post_hook().await?;
            info!(cycle = %cycle.key, failures = cycle.failures.len(), "hook cycle analyzed");
        }
    }
    orchestrator.into_store().close().await?;
    Ok(())
}

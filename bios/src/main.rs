//! amd-bios CLI entry point.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::debug;

use amd_bios::{kernel_at_least, parse_log, set_tracing, BACKPORT_WARNING, MINIMUM_KERNEL};
use amd_s2idle::kernel_log::{open_kernel_log, KernelLogSelection};
use amd_s2idle::logging;
use amd_s2idle::symbol::Symbol;
use amd_s2idle::system::{AcpiTracer, Sysfs};

/// Parse a combined kernel/BIOS log.
#[derive(Parser)]
#[command(name = "amd-bios", version, about)]
struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Parse log for kernel and BIOS messages.
    Parse {
        /// Optional input file to parse.
        #[arg(long)]
        input: Option<PathBuf>,
        /// Enable tool debug logging.
        #[arg(long)]
        tool_debug: bool,
    },
    /// Enable or disable tracing.
    Trace {
        /// Enable BIOS AML tracing.
        #[arg(long, conflicts_with = "disable", required_unless_present = "disable")]
        enable: bool,
        /// Disable BIOS AML tracing.
        #[arg(long)]
        disable: bool,
        /// Enable tool debug logging.
        #[arg(long)]
        tool_debug: bool,
    },
    /// Show version information.
    Version,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Version => {
            println!("amd-bios {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Command::Trace {
            enable, tool_debug, ..
        } => {
            logging::init_cli(tool_debug);
            let sysfs = Sysfs::default();
            let release = sysfs.read("/proc/sys/kernel/osrelease").unwrap_or_default();
            let (major, minor) = MINIMUM_KERNEL;
            if !kernel_at_least(&release, major, minor) {
                println!("{} {BACKPORT_WARNING}", Symbol::Warn);
            }
            let message = set_tracing(&AcpiTracer::new(sysfs), enable)?;
            println!("{} {message}", Symbol::Ok);
            Ok(())
        }
        Command::Parse { input, tool_debug } => {
            logging::init_cli(tool_debug);
            let selection = KernelLogSelection {
                input_file: input,
                ..KernelLogSelection::default()
            };
            let mut log = open_kernel_log(&selection).context("unable to open kernel log")?;
            debug!(backend = log.backend().as_str(), "parsing kernel log");
            for line in parse_log(log.as_mut())? {
                println!("{} {}", line.symbol, line.text);
            }
            Ok(())
        }
    }
}

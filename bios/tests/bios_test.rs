//! Tests for BIOS trace control and log decoding.

use std::path::Path;

use amd_bios::{kernel_at_least, parse_log, set_tracing, strip_timestamp, BiosError};
use amd_s2idle::kernel_log::{FileLog, KernelLog};
use amd_s2idle::symbol::Symbol;
use amd_s2idle::system::{AcpiTracer, Sysfs};

const POST_CODE_LINE: &str = r#"[   10.123456] extrace-0138 ex_trace_args         :  "  POST CODE: %X  ACPI TIMER: %X  TIME: %d.%d ms\n", b0003f33, 83528798, 0, 77, 0, 0"#;

fn write(root: &Path, rel: &str, value: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
    std::fs::write(path, value).expect("write");
}

fn tracer_tree(root: &Path, with_method: bool) {
    for key in ["trace_debug_layer", "trace_debug_level", "trace_method_name", "trace_state"] {
        write(root, &format!("sys/module/acpi/parameters/{key}"), "0\n");
    }
    let table = if with_method { "DSDT....M460...." } else { "DSDT............" };
    write(root, "sys/firmware/acpi/tables/DSDT", table);
}

#[test]
fn strips_kernel_timestamps() {
    assert_eq!(strip_timestamp("[   12.345678] ACPI: bus type PCI"), "ACPI: bus type PCI");
    assert_eq!(strip_timestamp("no timestamp here"), "no timestamp here");
}

#[test]
fn kernel_version_comparison() {
    assert!(kernel_at_least("6.16.0-rc1", 6, 16));
    assert!(kernel_at_least("7.0.1", 6, 16));
    assert!(!kernel_at_least("6.15.9-arch1-1", 6, 16));
    assert!(!kernel_at_least("5.19.0", 6, 16));
    assert!(kernel_at_least("", 6, 16));
}

#[test]
fn parse_decodes_bios_lines_and_passes_others() {
    let text = format!(
        "[    0.000000] Linux version 6.16.0\n\
         [   10.100000] extrace-0138 ex_trace_point        : Method Begin [0x0000000012345678:\\M460] execution.\n\
         {POST_CODE_LINE}\n\
         [   10.200000] extrace-0138 ex_trace_args         :  \"%d %d\\n\", 1\n\
         [   10.300000] PM: suspend exit\n"
    );
    let mut log = FileLog::from_text(text);
    let lines = parse_log(&mut log as &mut dyn KernelLog).expect("parse");
    let texts: Vec<&str> = lines.iter().map(|l| l.text.as_str()).collect();
    assert_eq!(
        texts,
        [
            "Linux version 6.16.0",
            "POST CODE: B0003F33  ACPI TIMER: 83528798  TIME: 0.77 ms",
            "PM: suspend exit",
        ]
    );
    assert_eq!(lines[1].symbol, Symbol::Bios);
}

#[test]
fn enabling_bios_trace_writes_parameters() {
    let dir = tempfile::tempdir().expect("tempdir");
    tracer_tree(dir.path(), true);
    let tracer = AcpiTracer::new(Sysfs::new(dir.path()));

    let message = set_tracing(&tracer, true).expect("enable");
    assert_eq!(message, "Set BIOS tracing to enabled");
    let state = std::fs::read_to_string(dir.path().join("sys/module/acpi/parameters/trace_state"))
        .expect("read state");
    assert_eq!(state, "method");
    let method =
        std::fs::read_to_string(dir.path().join("sys/module/acpi/parameters/trace_method_name"))
            .expect("read method");
    assert_eq!(method, "\\M460");

    let message = set_tracing(&tracer, false).expect("disable");
    assert_eq!(message, "Set BIOS tracing to disabled");
}

#[test]
fn missing_debug_method_is_unsupported() {
    let dir = tempfile::tempdir().expect("tempdir");
    tracer_tree(dir.path(), false);
    let tracer = AcpiTracer::new(Sysfs::new(dir.path()));
    assert!(matches!(set_tracing(&tracer, true), Err(BiosError::Unsupported)));
}

#[test]
fn missing_tracer_is_unsupported() {
    let dir = tempfile::tempdir().expect("tempdir");
    let tracer = AcpiTracer::new(Sysfs::new(dir.path()));
    assert!(matches!(set_tracing(&tracer, false), Err(BiosError::Unsupported)));
}

#[test]
fn version_subcommand_prints_version() {
    let output = assert_cmd::Command::cargo_bin("amd-bios")
        .expect("binary")
        .arg("version")
        .output()
        .expect("run");
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains(env!("CARGO_PKG_VERSION")));
}

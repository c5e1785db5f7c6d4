//! Tests for the kernel log backends and backend selection.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use amd_s2idle::kernel_log::dmesg::since_args;
use amd_s2idle::kernel_log::journal::parse_journal_output;
use amd_s2idle::kernel_log::{
    open_kernel_log, DmesgLog, FileLog, JournalLog, KernelLog, KernelLogSelection, LogBackend,
    LogError,
};
use chrono::{Local, TimeZone};
use regex::Regex;
use tempfile::TempDir;

const SAMPLE: &str = "Linux version 6.16.0 (builder@host)\n\
PM: suspend entry (s2idle)\n\
PM: Triggering wakeup from IRQ 9\n\
PM: suspend exit\n";

fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write script");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).expect("chmod");
    path
}

fn collect(log: &mut dyn KernelLog) -> Vec<(String, Option<u8>)> {
    let mut lines = Vec::new();
    log.process_callback(&mut |line, priority| lines.push((line.to_owned(), priority)))
        .expect("process");
    lines
}

#[test]
fn file_log_matches_lines_and_patterns() {
    let mut log = FileLog::from_text(SAMPLE.to_owned());
    assert_eq!(log.backend(), LogBackend::File);
    assert_eq!(log.header().as_deref(), Some("Linux version 6.16.0 (builder@host)"));
    assert_eq!(
        log.match_line(&["Triggering", "IRQ"]).expect("match"),
        Some("PM: Triggering wakeup from IRQ 9".to_owned())
    );
    assert_eq!(log.match_line(&["Triggering", "GPIO"]).expect("match"), None);

    let pattern = Regex::new(r"suspend (entry|exit)").expect("regex");
    assert_eq!(
        log.match_pattern(&pattern).expect("match"),
        Some("PM: suspend entry (s2idle)".to_owned())
    );
}

#[test]
fn file_log_ignores_seeks() {
    let mut log = FileLog::from_text(SAMPLE.to_owned());
    log.seek_tail(None).expect("seek");
    assert_eq!(collect(&mut log).len(), 4);
    log.seek().expect("seek");
    assert_eq!(collect(&mut log)[0].1, None);
}

#[test]
fn journal_output_parsing() {
    let text = r#"{"MESSAGE":"PM: suspend entry (s2idle)","PRIORITY":"6","__CURSOR":"s=1"}
not json
{"MESSAGE":[80,77,58,32,104,105],"PRIORITY":7}
{"PRIORITY":"3"}
"#;
    let entries = parse_journal_output(text);
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].message, "PM: suspend entry (s2idle)");
    assert_eq!(entries[0].priority, Some(6));
    assert_eq!(entries[0].cursor.as_deref(), Some("s=1"));
    assert_eq!(entries[1].message, "PM: hi");
    assert_eq!(entries[1].priority, Some(7));
    assert_eq!(entries[1].cursor, None);
}

#[test]
fn dmesg_since_arguments_are_fuzzed() {
    let time = Local
        .with_ymd_and_hms(2025, 3, 1, 12, 0, 30)
        .single()
        .expect("time");
    assert_eq!(
        since_args(time),
        ["--time-format=iso", "--since=2025-03-01T12:00:20"]
    );
}

#[test]
fn missing_input_file_is_unavailable() {
    let dir = TempDir::new().expect("tempdir");
    let selection = KernelLogSelection {
        input_file: Some(dir.path().join("missing.txt")),
        ..KernelLogSelection::default()
    };
    match open_kernel_log(&selection) {
        Err(LogError::Unavailable { attempts }) => {
            assert_eq!(attempts.len(), 1);
            assert!(attempts[0].starts_with("file: "));
        }
        Err(other) => panic!("unexpected error {other}"),
        Ok(_) => panic!("missing file should not open"),
    }
}

#[test]
fn input_file_is_used_exclusively() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("dmesg.txt");
    std::fs::write(&path, SAMPLE).expect("write");
    let selection = KernelLogSelection {
        input_file: Some(path),
        journalctl: dir.path().join("no-journalctl"),
        dmesg: dir.path().join("no-dmesg"),
    };
    let log = open_kernel_log(&selection).expect("open");
    assert_eq!(log.backend(), LogBackend::File);
}

#[test]
fn no_backend_lists_every_attempt() {
    let dir = TempDir::new().expect("tempdir");
    let selection = KernelLogSelection {
        input_file: None,
        journalctl: dir.path().join("no-journalctl"),
        dmesg: dir.path().join("no-dmesg"),
    };
    match open_kernel_log(&selection) {
        Err(LogError::Unavailable { attempts }) => {
            assert_eq!(attempts.len(), 2);
            assert!(attempts[0].starts_with("journal: "));
            assert!(attempts[1].starts_with("dmesg: "));
        }
        Err(other) => panic!("unexpected error {other}"),
        Ok(_) => panic!("no backend should open"),
    }
}

#[test]
fn journal_backend_reads_entries_with_priority() {
    let dir = TempDir::new().expect("tempdir");
    let program = script(
        dir.path(),
        "journalctl",
        r#"echo '{"MESSAGE":"PM: suspend entry (s2idle)","PRIORITY":"6","__CURSOR":"c1"}'
echo '{"MESSAGE":"ACPI Error: AE_NOT_FOUND","PRIORITY":"3","__CURSOR":"c2"}'"#,
    );
    let mut log = JournalLog::open(&program).expect("open");
    assert_eq!(log.backend(), LogBackend::Journal);
    let lines = collect(&mut log);
    assert_eq!(
        lines,
        [
            ("PM: suspend entry (s2idle)".to_owned(), Some(6)),
            ("ACPI Error: AE_NOT_FOUND".to_owned(), Some(3)),
        ]
    );
    assert_eq!(
        log.match_line(&["ACPI"]).expect("match"),
        Some("ACPI Error: AE_NOT_FOUND".to_owned())
    );
}

#[test]
fn empty_journal_is_unsupported() {
    let dir = TempDir::new().expect("tempdir");
    let program = script(dir.path(), "journalctl", "exit 0");
    assert!(matches!(
        JournalLog::open(&program),
        Err(LogError::Unsupported {
            backend: "journal",
            ..
        })
    ));
}

#[test]
fn dmesg_backend_tail_hides_existing_lines() {
    let dir = TempDir::new().expect("tempdir");
    let program = script(
        dir.path(),
        "dmesg",
        r#"case "$1" in
  -h) echo " --since <time>  display the lines since the specified time" ;;
  *) printf 'PM: suspend entry (s2idle)\nPM: suspend exit\n' ;;
esac"#,
    );
    let mut log = DmesgLog::open(&program).expect("open");
    assert!(log.since_support());
    assert_eq!(log.header().as_deref(), Some("PM: suspend entry (s2idle)"));
    assert_eq!(collect(&mut log).len(), 2);

    log.seek_tail(None).expect("tail");
    assert!(collect(&mut log).is_empty());

    log.seek_tail(Some(Local::now())).expect("since");
    assert_eq!(collect(&mut log).len(), 2);
}

#[test]
fn failing_dmesg_reports_command_error() {
    let dir = TempDir::new().expect("tempdir");
    let program = script(dir.path(), "dmesg", "echo denied >&2\nexit 1");
    match DmesgLog::open(&program) {
        Err(LogError::Command { stderr, .. }) => assert_eq!(stderr, "denied"),
        other => panic!("unexpected {other:?}"),
    }
}

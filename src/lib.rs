//! amd-s2idle: suspend-to-idle diagnostics for AMD Linux platforms.
//!
//! Checks firmware and kernel prerequisites, drives real suspend cycles,
//! and explains why a cycle missed deep hardware sleep or woke early.
//! Results are kept in a local SQLite store for later reporting.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod logging;

pub mod failures;
pub mod symbol;
pub mod trace;

pub mod correlator;
pub mod kernel_log;
pub mod store;

pub mod system;

pub mod orchestrator;
pub mod prereq;
pub mod report;

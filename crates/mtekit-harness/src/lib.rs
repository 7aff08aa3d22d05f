//! Scenario harness for mtekit.
//!
//! This crate provides:
//! - Scenarios: drive the tagging contracts on the shadow backend under any
//!   configuration, no MTE hardware needed
//! - Probe: report what the host CPU and this build support
//! - Structured logs: JSONL evidence plus a SHA-256 artifact index

#![deny(unsafe_code)]

pub mod probe;
// Region operations are unsafe fns even on the shadow backend.
#[allow(unsafe_code)]
pub mod scenarios;
pub mod structured_log;

pub use probe::{ProbeReport, probe};
pub use scenarios::{ScenarioOptions, ScenarioReport, ScenarioResult, run_all};

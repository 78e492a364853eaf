// Allow unwrap/expect in tests for clear failure messages
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

//! # diode-harness-test
//!
//! Scenario layer on top of [`diode_harness_core`].
//!
//! - [`Step`] enumerates every scenario action
//! - [`Scenario`] is a named list of steps, built with `given`/`when`/`then`
//! - [`ScenarioRunner`] executes a scenario in a fresh context and always
//!   tears it down
//! - [`catalog`] holds the built-in scenarios
//! - [`sweep`] measures maximum delivered throughput
//! - [`fake`] provides stand-in stage executables for testing the harness
//!   itself
//!
//! ## Example
//!
//! ```rust,ignore
//! use diode_harness_test::{ScenarioRunner, catalog};
//! use diode_harness_core::HarnessConfig;
//!
//! let runner = ScenarioRunner::new(HarnessConfig::new("./target/release"));
//! let report = runner.run(&catalog::find("baseline-1mb").unwrap()).await?;
//! assert!(report.passed());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod catalog;
pub mod fake;
pub mod runner;
pub mod scenario;
pub mod sweep;

pub use diode_harness_core::{HarnessError, Result};
pub use fake::FakeDiode;
pub use runner::{Outcome, ScenarioFailure, ScenarioReport, ScenarioRunner, StepReport};
pub use scenario::{Scenario, Step};
pub use sweep::{SweepConfig, SweepReport, run_sweep};

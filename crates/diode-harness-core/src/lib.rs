// Allow unwrap/expect in tests for clear failure messages
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

//! # diode-harness-core
//!
//! Process orchestration and transfer verification for diode integration
//! tests.
//!
//! - [`ScenarioContext`] owns one scenario's directories, files and processes
//! - [`orchestrator`] starts, stops and restarts pipeline stages in
//!   dependency order
//! - [`FaultConfig`] configures the external network impairment relay
//! - [`workload`] generates and sends test files
//! - [`verify`] polls for received files and checks their content
//!
//! ## Example
//!
//! ```rust,ignore
//! use diode_harness_core::{HarnessConfig, ScenarioContext, ByteSize, orchestrator, workload, verify};
//! use std::time::Duration;
//!
//! let mut ctx = ScenarioContext::new(HarnessConfig::new("./target/release"))?;
//! orchestrator::start_pipeline(&mut ctx).await?;
//! workload::generate_file(&mut ctx, "a.bin", ByteSize::mb(1)).await?;
//! workload::send_file(&mut ctx, "a.bin").await?;
//! verify::receive_file(&mut ctx, "a.bin", Duration::from_secs(5)).await?;
//! ctx.teardown().await;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod context;
pub mod error;
pub mod fault;
pub mod logconfig;
pub mod orchestrator;
pub mod process;
pub mod size;
pub mod types;
pub mod verify;
pub mod workload;

pub use config::{AddressPlan, HarnessConfig, SENDER_BINARY, Timings, WorkloadConfig};
pub use context::{PerfKnobs, ScenarioContext};
pub use error::{HarnessError, Result};
pub use fault::FaultConfig;
pub use logconfig::{LogLevel, StageLogConfig};
pub use process::{ProcessHandle, StageCommand};
pub use size::ByteSize;
pub use types::{FailureReason, ScenarioId, Signal, Stage, StageStatus};
pub use verify::{FileRecord, Fingerprint, TransferVerifier};

//! Diode Harness: fault-injection integration testing for file-transfer diodes.
//!
//! Starts the diode pipeline as separate processes, pushes generated files
//! through it under network and storage impairments, and verifies that
//! every file arrives byte-for-byte intact.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use diode_harness::prelude::*;
//!
//! # async fn demo() -> Result<(), ScenarioFailure> {
//! let scenario = Scenario::new("outage")
//!     .given(Step::InterruptNetwork {
//!         down_after: ByteSize::mib(1),
//!         up_after: ByteSize::mib(3),
//!     })
//!     .given(Step::StartDiode)
//!     .when(Step::SendFile { name: "a.bin".into(), size: ByteSize::mib(4) })
//!     .then(Step::ReceiveFile { name: "a.bin".into(), within: std::time::Duration::from_secs(10) });
//!
//! let report = ScenarioRunner::new(HarnessConfig::new("./target/release"))
//!     .run(&scenario)
//!     .await?;
//! assert!(report.passed());
//! # Ok(())
//! # }
//! ```

pub use diode_harness_core as core;
pub use diode_harness_test as scenario;
pub use diode_harness_throttle as throttle;

/// Prelude module for common imports.
pub mod prelude {
    pub use diode_harness_core::{
        ByteSize, FaultConfig, HarnessConfig, HarnessError, ScenarioContext, Stage, StageStatus,
    };
    pub use diode_harness_test::{
        Outcome, Scenario, ScenarioFailure, ScenarioReport, ScenarioRunner, Step, SweepConfig,
        run_sweep,
    };
    pub use diode_harness_throttle::RateLimiter;
}

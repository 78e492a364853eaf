//! Error types for diode-harness-core.
//!
//! Every failure a scenario can observe is an explicit variant. Nothing in
//! the harness retries: errors surface to the scenario driver unchanged.

use std::time::Duration;

use crate::types::Stage;
use crate::verify::Fingerprint;

/// Result type alias for harness operations.
pub type Result<T> = std::result::Result<T, HarnessError>;

/// Comprehensive error type for harness operations.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    /// A stage exited before its readiness probe.
    #[error("{stage} failed to start (exit code: {}): {output}", fmt_code(.exit_code))]
    StartupFailure {
        /// The stage that died.
        stage: Stage,
        /// Exit code, `None` when killed by a signal.
        exit_code: Option<i32>,
        /// Captured stdout/stderr tail.
        output: String,
    },

    /// A file never reached its expected size before the deadline.
    #[error("file {file} not received after {elapsed:?}")]
    TransferTimeout {
        /// File name.
        file: String,
        /// Time spent polling.
        elapsed: Duration,
    },

    /// A file arrived with the expected size but different content.
    #[error("file {file} corrupted: expected {expected}, got {actual}")]
    VerificationMismatch {
        /// File name.
        file: String,
        /// Fingerprint recorded before sending.
        expected: Fingerprint,
        /// Fingerprint of the received file.
        actual: Fingerprint,
    },

    /// The file sender exited with a failure.
    #[error("sending {files:?} failed (exit code: {}): {output}", fmt_code(.exit_code))]
    SendFailure {
        /// Files passed to the sender.
        files: Vec<String>,
        /// Exit code, `None` when killed by a signal.
        exit_code: Option<i32>,
        /// Captured sender output.
        output: String,
    },

    /// The file sender did not finish in time.
    #[error("sending {files:?} timed out after {elapsed:?}")]
    SendTimeout {
        /// Files passed to the sender.
        files: Vec<String>,
        /// Time waited.
        elapsed: Duration,
    },

    /// A stage binary could not be executed at all.
    #[error("failed to spawn {stage}: {source}")]
    Spawn {
        /// The stage being spawned.
        stage: Stage,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// Operation needs a stage that is not tracked by the context.
    #[error("stage not running: {0}")]
    StageNotRunning(Stage),

    /// File name not registered in the scenario context.
    #[error("unknown file: {0}")]
    UnknownFile(String),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Scenario-level assertion failed.
    #[error("assertion failed: {0}")]
    Assertion(String),

    /// Best-effort cleanup step failed. Logged, never propagated.
    #[error("teardown error: {0}")]
    Teardown(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[allow(clippy::ref_option)]
fn fmt_code(code: &Option<i32>) -> String {
    code.map_or_else(|| "signal".to_string(), |c| c.to_string())
}

impl HarnessError {
    /// Creates a configuration error.
    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Creates an assertion error.
    #[must_use]
    pub fn assertion(msg: impl Into<String>) -> Self {
        Self::Assertion(msg.into())
    }

    /// Creates a teardown error.
    #[must_use]
    pub fn teardown(msg: impl Into<String>) -> Self {
        Self::Teardown(msg.into())
    }

    /// Returns true if the pipeline itself could not be brought up.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::StartupFailure { .. } | Self::Spawn { .. } | Self::Config(_)
        )
    }

    /// Returns true if this is a scenario assertion (timeout, corruption).
    #[must_use]
    pub const fn is_assertion(&self) -> bool {
        matches!(
            self,
            Self::TransferTimeout { .. } | Self::VerificationMismatch { .. } | Self::Assertion(_)
        )
    }
}

//! Core types shared by the orchestrator, the context and the scenarios.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Unique identifier for one scenario run.
///
/// Used to tag log output and to name scratch directories so that two
/// scenarios running back to back never share state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScenarioId(uuid::Uuid);

impl ScenarioId {
    /// Creates a new random scenario ID.
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Short prefix suitable for directory names.
    #[must_use]
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for ScenarioId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A long-running process of the pipeline under test.
///
/// The file sender is not listed: it is a one-shot client spawned per
/// transfer, see [`crate::workload`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    /// Read-only rate-limited mirror of the send directory.
    StorageProxy,
    /// UDP impairment relay between the two bridges.
    FaultInjector,
    /// TCP listener writing received files to disk.
    FileReceiver,
    /// UDP → TCP bridge on the receiving side.
    ReceiveBridge,
    /// TCP → UDP bridge on the sending side.
    SendBridge,
}

impl Stage {
    /// Every stage in dependency order: listeners before connectors.
    pub const STARTUP_ORDER: [Self; 5] = [
        Self::StorageProxy,
        Self::FaultInjector,
        Self::FileReceiver,
        Self::ReceiveBridge,
        Self::SendBridge,
    ];

    /// Executable name looked up in the binary directory.
    #[must_use]
    pub const fn binary_name(&self) -> &'static str {
        match self {
            Self::StorageProxy => "throttled-fs",
            Self::FaultInjector => "network-behavior",
            Self::FileReceiver => "diode-receive-file",
            Self::ReceiveBridge => "diode-receive",
            Self::SendBridge => "diode-send",
        }
    }

    /// Returns true if the stage accepts a `--log-config` file.
    #[must_use]
    pub const fn supports_log_config(&self) -> bool {
        matches!(
            self,
            Self::FileReceiver | Self::ReceiveBridge | Self::SendBridge
        )
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.binary_name())
    }
}

/// Observed state of a tracked stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageStatus {
    /// No process tracked for this stage.
    NotStarted,
    /// Process is alive.
    Running,
    /// Process exited with code 0.
    Stopped,
    /// Process exited abnormally.
    Failed(FailureReason),
}

impl StageStatus {
    /// Returns true if the process has exited.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::Failed(_))
    }

    /// Exit code, if the process exited normally.
    #[must_use]
    pub const fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Stopped => Some(0),
            Self::Failed(FailureReason::ExitCode(code)) => Some(*code),
            _ => None,
        }
    }
}

/// Reason for a stage failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureReason {
    /// Terminated by signal.
    Signal(i32),
    /// Exited with non-zero code.
    ExitCode(i32),
}

/// Unix signals the harness sends to stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Signal {
    /// Terminate (graceful shutdown).
    Term,
    /// Kill (immediate termination).
    Kill,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scenario_id_unique() {
        assert_ne!(ScenarioId::new(), ScenarioId::new());
    }

    #[test]
    fn test_scenario_id_short() {
        let id = ScenarioId::new();
        assert_eq!(id.short().len(), 8);
        assert!(id.to_string().replace('-', "").starts_with(&id.short()));
    }

    #[test]
    fn test_listeners_before_connectors() {
        let pos = |stage| Stage::STARTUP_ORDER.iter().position(|s| *s == stage).unwrap();
        assert_eq!(pos(Stage::StorageProxy), 0);
        assert!(pos(Stage::FileReceiver) < pos(Stage::ReceiveBridge));
        assert!(pos(Stage::ReceiveBridge) < pos(Stage::SendBridge));
        assert!(pos(Stage::FaultInjector) < pos(Stage::ReceiveBridge));
    }

    #[test]
    fn test_stage_display_is_binary() {
        assert_eq!(Stage::SendBridge.to_string(), "diode-send");
        assert_eq!(Stage::FaultInjector.to_string(), "network-behavior");
    }

    #[test]
    fn test_log_config_support() {
        assert!(Stage::SendBridge.supports_log_config());
        assert!(!Stage::FaultInjector.supports_log_config());
        assert!(!Stage::StorageProxy.supports_log_config());
    }

    #[test]
    fn test_stage_status() {
        assert!(StageStatus::Stopped.is_terminal());
        assert!(StageStatus::Failed(FailureReason::Signal(9)).is_terminal());
        assert!(!StageStatus::Running.is_terminal());
        assert!(!StageStatus::NotStarted.is_terminal());
        assert_eq!(StageStatus::Failed(FailureReason::ExitCode(3)).exit_code(), Some(3));
        assert_eq!(StageStatus::Failed(FailureReason::Signal(9)).exit_code(), None);
    }
}

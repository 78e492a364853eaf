//! Per-stage log configuration files.
//!
//! Stages read a small YAML document naming one file appender and one root
//! level. The harness writes one per supporting stage when a scenario starts.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::Stage;

/// Severity level written into a stage log configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Errors only.
    Error,
    /// Warnings and errors.
    Warn,
    /// Informational.
    Info,
    /// Debug output.
    Debug,
    /// Everything.
    #[default]
    Trace,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        })
    }
}

/// Log configuration artifact for one stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageLogConfig {
    /// Where the stage writes its log.
    pub log_path: PathBuf,
    /// Root severity level.
    pub level: LogLevel,
}

impl StageLogConfig {
    /// Log configuration for `stage`, logging into `log_dir`.
    #[must_use]
    pub fn for_stage(stage: Stage, log_dir: &Path, level: LogLevel) -> Self {
        Self {
            log_path: log_dir.join(format!("{}.log", stage_slug(stage))),
            level,
        }
    }

    /// Renders the YAML document.
    #[must_use]
    pub fn render(&self) -> String {
        format!(
            "appenders:\n  file:\n    kind: file\n    path: {}\n\nroot:\n  level: {}\n  appenders:\n    - file\n",
            self.log_path.display(),
            self.level
        )
    }

    /// Writes the document for `stage` into `dir` and returns its path.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    pub fn write(&self, stage: Stage, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(format!("log_config_{}.yml", stage_slug(stage)));
        std::fs::write(&path, self.render())?;
        tracing::debug!(stage = %stage, path = %path.display(), "wrote log config");
        Ok(path)
    }
}

fn stage_slug(stage: Stage) -> String {
    stage.binary_name().replace('-', "_")
}

//! Scenario execution with unconditional teardown.

use std::time::{Duration, Instant};

use diode_harness_core::{HarnessConfig, HarnessError, ScenarioContext};
use serde::Serialize;
use tracing::Instrument;

use crate::scenario::Scenario;

/// Timing of one executed step.
#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    /// Human-readable step description.
    pub step: String,
    /// Wall-clock time spent in the step.
    pub elapsed: Duration,
}

/// How a scenario ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "kebab-case")]
pub enum Outcome {
    /// Every step succeeded.
    Passed,
    /// The pipeline could not be brought up.
    Aborted {
        /// Index of the failing step, `None` if the context itself failed.
        step: Option<usize>,
        /// Error message.
        error: String,
    },
    /// A step failed.
    Failed {
        /// Index of the failing step.
        step: usize,
        /// Error message.
        error: String,
    },
}

/// Result of one scenario run.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    /// Scenario name.
    pub name: String,
    /// Steps that ran, in order, including the failing one.
    pub steps: Vec<StepReport>,
    /// Outcome.
    pub outcome: Outcome,
    /// Total time including teardown.
    pub elapsed: Duration,
}

impl ScenarioReport {
    /// Returns true if every step succeeded.
    #[must_use]
    pub fn passed(&self) -> bool {
        self.outcome == Outcome::Passed
    }
}

/// A failed scenario: the report plus the error that stopped it.
#[derive(Debug, thiserror::Error)]
#[error("scenario {} failed: {error}", report.name)]
pub struct ScenarioFailure {
    /// Report up to and including the failing step.
    pub report: ScenarioReport,
    /// The error, unchanged.
    #[source]
    pub error: HarnessError,
}

/// Runs scenarios, each in a fresh context.
#[derive(Debug, Clone)]
pub struct ScenarioRunner {
    config: HarnessConfig,
}

impl ScenarioRunner {
    /// Creates a runner.
    #[must_use]
    pub const fn new(config: HarnessConfig) -> Self {
        Self { config }
    }

    /// Harness configuration used for every scenario.
    #[must_use]
    pub const fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Runs `scenario`: executes steps in order, stops at the first error,
    /// and always tears the context down before returning.
    ///
    /// # Errors
    /// Returns a [`ScenarioFailure`] carrying the first error.
    pub async fn run(&self, scenario: &Scenario) -> Result<ScenarioReport, ScenarioFailure> {
        let span = tracing::info_span!("scenario", name = %scenario.name);
        self.execute(scenario).instrument(span).await
    }

    async fn execute(&self, scenario: &Scenario) -> Result<ScenarioReport, ScenarioFailure> {
        let start = Instant::now();
        let mut report = ScenarioReport {
            name: scenario.name.clone(),
            steps: Vec::with_capacity(scenario.steps.len()),
            outcome: Outcome::Passed,
            elapsed: Duration::ZERO,
        };

        let mut ctx = match ScenarioContext::new(self.config.clone()) {
            Ok(ctx) => ctx,
            Err(error) => {
                report.outcome = Outcome::Aborted {
                    step: None,
                    error: error.to_string(),
                };
                report.elapsed = start.elapsed();
                return Err(ScenarioFailure { report, error });
            }
        };
        tracing::info!(scenario = %ctx.id(), steps = scenario.steps.len(), "scenario started");

        let mut failure = None;
        for (index, step) in scenario.steps.iter().enumerate() {
            let step_start = Instant::now();
            tracing::info!(step = index, "{step}");
            let result = step.run(&mut ctx).await;
            report.steps.push(StepReport {
                step: step.to_string(),
                elapsed: step_start.elapsed(),
            });
            if let Err(error) = result {
                tracing::error!(step = index, error = %error, "step failed");
                report.outcome = if error.is_fatal() {
                    Outcome::Aborted {
                        step: Some(index),
                        error: error.to_string(),
                    }
                } else {
                    Outcome::Failed {
                        step: index,
                        error: error.to_string(),
                    }
                };
                failure = Some(error);
                break;
            }
        }

        ctx.teardown().await;
        report.elapsed = start.elapsed();

        match failure {
            None => {
                tracing::info!(elapsed = ?report.elapsed, "scenario passed");
                Ok(report)
            }
            Some(error) => Err(ScenarioFailure { report, error }),
        }
    }

    /// Runs every scenario in order and collects the reports.
    pub async fn run_all(&self, scenarios: &[Scenario]) -> Vec<ScenarioReport> {
        let mut reports = Vec::with_capacity(scenarios.len());
        for scenario in scenarios {
            match self.run(scenario).await {
                Ok(report) => reports.push(report),
                Err(failure) => {
                    tracing::warn!(scenario = %scenario.name, error = %failure.error, "scenario failed");
                    reports.push(failure.report);
                }
            }
        }
        reports
    }
}

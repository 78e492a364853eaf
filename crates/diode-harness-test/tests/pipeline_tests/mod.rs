//! End-to-end harness tests against fake stage executables.

// Allow test-specific patterns that are denied in production code
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

mod live;
mod restart;
mod startup;
mod teardown;
mod transfer;

use diode_harness_core::ScenarioContext;
use diode_harness_test::FakeDiode;
use tempfile::TempDir;

/// Fakes, scratch root and a fresh context using both.
pub struct Rig {
    pub fake: FakeDiode,
    pub root: TempDir,
}

impl Rig {
    pub fn new() -> Self {
        Self {
            fake: FakeDiode::new().unwrap(),
            root: tempfile::tempdir().unwrap(),
        }
    }

    pub fn context(&self) -> ScenarioContext {
        ScenarioContext::new(self.fake.config(self.root.path())).unwrap()
    }
}

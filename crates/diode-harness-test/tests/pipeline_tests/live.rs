//! Built-in scenarios against real diode executables.
//!
//! Set `DIODE_BIN_DIR` to the directory holding them and run with
//! `--ignored`. The throttled scenario also needs FUSE.

use std::path::PathBuf;

use diode_harness_core::HarnessConfig;
use diode_harness_test::{ScenarioRunner, catalog};

fn runner() -> ScenarioRunner {
    let bin_dir = std::env::var_os("DIODE_BIN_DIR")
        .map(PathBuf::from)
        .expect("DIODE_BIN_DIR must point at the diode executables");
    ScenarioRunner::new(HarnessConfig::new(bin_dir))
}

async fn run(name: &str) {
    let scenario = catalog::find(name).unwrap();
    if let Err(failure) = runner().run(&scenario).await {
        panic!("{failure}");
    }
}

#[tokio::test]
#[ignore = "requires diode executables"]
async fn p050_baseline() {
    run("baseline-1mb").await;
}

#[tokio::test]
#[ignore = "requires diode executables"]
async fn p051_multiple_files() {
    run("multiple-files").await;
}

#[tokio::test]
#[ignore = "requires diode executables"]
async fn p052_block_multiple() {
    run("block-multiple").await;
}

#[tokio::test]
#[ignore = "requires diode executables"]
async fn p053_packet_loss() {
    run("packet-loss-5pct").await;
}

#[tokio::test]
#[ignore = "requires diode executables"]
async fn p054_network_outage() {
    run("network-outage").await;
}

#[tokio::test]
#[ignore = "requires diode executables"]
async fn p055_receive_restart() {
    run("receive-restart-50mb").await;
}

#[tokio::test]
#[ignore = "requires diode executables"]
async fn p056_send_restart() {
    run("send-restart").await;
}

#[tokio::test]
#[ignore = "requires diode executables and FUSE"]
async fn p057_throttled() {
    run("throttled-1mbps").await;
}

//! Built-in scenarios.

use std::time::Duration;

use diode_harness_core::{ByteSize, Stage};

use crate::scenario::{Scenario, Step};

fn send(name: &str, size: ByteSize) -> Step {
    Step::SendFile {
        name: name.to_string(),
        size,
    }
}

fn receive(name: &str, secs: u64) -> Step {
    Step::ReceiveFile {
        name: name.to_string(),
        within: Duration::from_secs(secs),
    }
}

/// Every built-in scenario, in a stable order.
#[must_use]
pub fn builtin() -> Vec<Scenario> {
    vec![
        Scenario::new("baseline-1mb")
            .given(Step::StartDiode)
            .when(send("test.bin", ByteSize::mb(1)))
            .then(receive("test.bin", 5)),
        Scenario::new("multiple-files")
            .given(Step::StartDiode)
            .when(Step::SendFiles {
                count: 10,
                size: ByteSize::mb(1),
            })
            .then(Step::ReceiveAllFiles {
                within: Duration::from_secs(10),
            }),
        // 30 encoding blocks exactly.
        Scenario::new("block-multiple")
            .given(Step::SetBlockSize(100_000))
            .given(Step::StartDiode)
            .when(send("blocks.bin", ByteSize::bytes(3_000_000)))
            .then(receive("blocks.bin", 10)),
        Scenario::new("packet-loss-5pct")
            .given(Step::DropPackets { percent: 5 })
            .given(Step::StartDiode)
            .when(send("lossy.bin", ByteSize::mb(10)))
            .then(receive("lossy.bin", 30)),
        // The first file crosses the outage window, the second is sent
        // after the link is back.
        Scenario::new("network-outage")
            .given(Step::InterruptNetwork {
                down_after: ByteSize::mib(1),
                up_after: ByteSize::mib(3),
            })
            .given(Step::StartDiode)
            .when(send("during.bin", ByteSize::mib(4)))
            .when(send("after.bin", ByteSize::mb(1)))
            .then(receive("after.bin", 10)),
        Scenario::new("receive-restart-50mb")
            .given(Step::StartDiode)
            .when(Step::RestartDuringSend {
                stage: Stage::ReceiveBridge,
                name: "big.bin".into(),
                size: ByteSize::mb(50),
                after: Duration::from_secs(3),
            })
            .then(Step::ReceiveFileOrTimeout {
                name: "big.bin".into(),
                within: Duration::from_secs(60),
            }),
        Scenario::new("send-restart")
            .given(Step::StartDiode)
            .when(Step::RestartDuringSend {
                stage: Stage::SendBridge,
                name: "interrupted.bin".into(),
                size: ByteSize::mb(50),
                after: Duration::from_secs(3),
            })
            .when(send("after.bin", ByteSize::mb(1)))
            .then(receive("after.bin", 10)),
        // 8 Mb/s is 1 MB/s through the storage proxy.
        Scenario::new("throttled-1mbps")
            .given(Step::StartThrottledDiode { mbps: 8 })
            .when(Step::SendFileAtLeast {
                name: "slow.bin".into(),
                size: ByteSize::mb(5),
                min: Duration::from_secs(5),
            })
            .then(receive("slow.bin", 10)),
    ]
}

/// Looks up a built-in scenario by name.
#[must_use]
pub fn find(name: &str) -> Option<Scenario> {
    builtin().into_iter().find(|s| s.name == name)
}

//! Stopping and restarting individual stages.

use std::time::Duration;

use diode_harness_core::{
    ByteSize, FailureReason, FaultConfig, HarnessError, Stage, StageStatus, orchestrator, verify,
};
use diode_harness_test::{Outcome, Scenario, ScenarioRunner, Step};

use super::Rig;

#[tokio::test]
async fn p020_restart_reuses_identical_command() {
    let rig = Rig::new();
    let mut ctx = rig.context();
    orchestrator::start_pipeline(&mut ctx).await.unwrap();
    let first_pid = ctx.handle(Stage::ReceiveBridge).unwrap().pid();

    orchestrator::restart_stage(&mut ctx, Stage::ReceiveBridge)
        .await
        .unwrap();

    let lines = rig.fake.invocations("diode-receive");
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0], lines[1]);
    assert_ne!(ctx.handle(Stage::ReceiveBridge).unwrap().pid(), first_pid);
    assert_eq!(
        orchestrator::stage_status(&mut ctx, Stage::ReceiveBridge).unwrap(),
        StageStatus::Running
    );
    // Start order is unaffected by a restart.
    assert_eq!(ctx.started().len(), 3);

    ctx.teardown().await;
}

#[tokio::test]
async fn p021_restart_behind_injector_keeps_its_port() {
    let rig = Rig::new();
    let mut ctx = rig.context();
    ctx.faults = FaultConfig::loss(1);
    orchestrator::start_pipeline(&mut ctx).await.unwrap();

    orchestrator::restart_stage(&mut ctx, Stage::ReceiveBridge)
        .await
        .unwrap();

    for line in rig.fake.invocations("diode-receive") {
        assert!(line.contains("--bind-udp 0.0.0.0:6000"));
    }

    ctx.teardown().await;
}

#[tokio::test]
async fn p022_stopped_stage_reports_sigterm() {
    let rig = Rig::new();
    let mut ctx = rig.context();
    orchestrator::start_pipeline(&mut ctx).await.unwrap();

    let status = orchestrator::stop_stage(&mut ctx, Stage::SendBridge)
        .await
        .unwrap();
    assert_eq!(status, StageStatus::Failed(FailureReason::Signal(15)));
    assert_eq!(
        orchestrator::stage_status(&mut ctx, Stage::SendBridge).unwrap(),
        status
    );

    orchestrator::start_stage(&mut ctx, Stage::SendBridge)
        .await
        .unwrap();
    assert_eq!(rig.fake.invocations("diode-send").len(), 2);

    ctx.teardown().await;
}

#[tokio::test]
async fn p023_restart_of_unstarted_stage_is_rejected() {
    let rig = Rig::new();
    let mut ctx = rig.context();

    let err = orchestrator::restart_stage(&mut ctx, Stage::FaultInjector)
        .await
        .unwrap_err();
    assert!(matches!(err, HarnessError::StageNotRunning(Stage::FaultInjector)));
    assert!(rig.fake.start_order().is_empty());

    ctx.teardown().await;
}

#[tokio::test]
async fn p024_restart_during_send() {
    let rig = Rig::new();
    let scenario = Scenario::new("restart-during-send")
        .given(Step::StartDiode)
        .when(Step::RestartDuringSend {
            stage: Stage::SendBridge,
            name: "big.bin".into(),
            size: ByteSize::kb(512),
            after: Duration::from_millis(20),
        })
        .then(Step::ReceiveFile {
            name: "big.bin".into(),
            within: Duration::from_secs(5),
        });

    let report = ScenarioRunner::new(rig.fake.config(rig.root.path()))
        .run(&scenario)
        .await
        .unwrap();
    assert!(report.passed());
    assert_eq!(rig.fake.invocations("diode-send").len(), 2);
    assert_eq!(rig.fake.invocations("diode-send-file").len(), 1);
}

#[tokio::test]
async fn p025_file_sent_after_restart_arrives() {
    let rig = Rig::new();
    let mut ctx = rig.context();
    orchestrator::start_pipeline(&mut ctx).await.unwrap();
    orchestrator::restart_stage(&mut ctx, Stage::FileReceiver)
        .await
        .unwrap();

    Step::SendFile {
        name: "after.bin".into(),
        size: ByteSize::kb(32),
    }
    .run(&mut ctx)
    .await
    .unwrap();
    verify::receive_file(&mut ctx, "after.bin", Duration::from_secs(5))
        .await
        .unwrap();

    ctx.teardown().await;
}

fn receive_restart(within: Duration) -> Scenario {
    Scenario::new("receive-restart")
        .given(Step::StartDiode)
        .when(Step::RestartDuringSend {
            stage: Stage::ReceiveBridge,
            name: "big.bin".into(),
            size: ByteSize::kb(256),
            after: Duration::from_millis(20),
        })
        .then(Step::ReceiveFileOrTimeout {
            name: "big.bin".into(),
            within,
        })
}

#[tokio::test]
async fn p026_receive_restart_truncated_copy_fails() {
    let rig = Rig::new();
    rig.fake.truncate_transfers().unwrap();

    let failure = ScenarioRunner::new(rig.fake.config(rig.root.path()))
        .run(&receive_restart(Duration::from_millis(300)))
        .await
        .unwrap_err();

    assert!(failure.error.is_assertion());
    assert!(failure.error.to_string().contains("partial file big.bin"));
    assert!(matches!(failure.report.outcome, Outcome::Failed { step: 2, .. }));
}

#[tokio::test]
async fn p027_receive_restart_without_delivery_is_clean() {
    let rig = Rig::new();
    rig.fake.drop_transfers().unwrap();

    let report = ScenarioRunner::new(rig.fake.config(rig.root.path()))
        .run(&receive_restart(Duration::from_millis(300)))
        .await
        .unwrap();

    assert!(report.passed());
    assert_eq!(rig.fake.invocations("diode-receive").len(), 2);
}

#[tokio::test]
async fn p028_receive_restart_with_delivery_passes() {
    let rig = Rig::new();

    let report = ScenarioRunner::new(rig.fake.config(rig.root.path()))
        .run(&receive_restart(Duration::from_secs(5)))
        .await
        .unwrap();

    assert!(report.passed());
}

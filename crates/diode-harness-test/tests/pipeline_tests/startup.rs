//! Startup ordering, readiness probing and stage command lines.

use std::time::Duration;

use diode_harness_core::{
    ByteSize, FaultConfig, HarnessError, ScenarioContext, Stage, StageStatus, orchestrator,
};

use super::Rig;

#[tokio::test]
async fn p001_stages_start_in_dependency_order() {
    let rig = Rig::new();
    let mut ctx = rig.context();

    orchestrator::start_pipeline(&mut ctx).await.unwrap();

    assert_eq!(
        rig.fake.start_order(),
        vec!["diode-receive-file", "diode-receive", "diode-send"]
    );
    assert_eq!(
        ctx.started(),
        &[Stage::FileReceiver, Stage::ReceiveBridge, Stage::SendBridge]
    );
    for stage in [Stage::FileReceiver, Stage::ReceiveBridge, Stage::SendBridge] {
        assert_eq!(
            orchestrator::stage_status(&mut ctx, stage).unwrap(),
            StageStatus::Running
        );
    }
    assert_eq!(
        orchestrator::stage_status(&mut ctx, Stage::FaultInjector).unwrap(),
        StageStatus::NotStarted
    );

    ctx.teardown().await;
}

#[tokio::test]
async fn p002_injector_starts_first_when_impaired() {
    let rig = Rig::new();
    let mut ctx = rig.context();
    ctx.faults = FaultConfig::loss(5);
    ctx.faults
        .merge(&FaultConfig::interrupt(ByteSize::mib(1), ByteSize::mib(3)));

    orchestrator::start_pipeline(&mut ctx).await.unwrap();

    let order = rig.fake.start_order();
    assert_eq!(order[0], "network-behavior");
    assert_eq!(order.len(), 4);

    let injector = &rig.fake.invocations("network-behavior")[0];
    assert!(injector.contains("--bind-udp 0.0.0.0:5000"));
    assert!(injector.contains("--to-udp 127.0.0.1:6000"));
    assert!(injector.contains("--loss-rate 5"));
    assert!(injector.contains("--network-down-after 1048576"));
    assert!(injector.contains("--network-up-after 3145728"));

    let receive = &rig.fake.invocations("diode-receive")[0];
    assert!(receive.contains("--bind-udp 0.0.0.0:6000"));

    ctx.teardown().await;
}

#[tokio::test]
async fn p003_throttled_pipeline_mounts_proxy_first() {
    let rig = Rig::new();
    let mut ctx = rig.context();

    orchestrator::start_throttled_pipeline(&mut ctx, 1_000_000)
        .await
        .unwrap();

    assert_eq!(rig.fake.start_order()[0], "throttled-fs");
    let proxy = &rig.fake.invocations("throttled-fs")[0];
    let mount = ctx.rate_limited_dir().unwrap().to_path_buf();
    assert!(proxy.starts_with(&mount.display().to_string()));
    assert!(proxy.contains(&ctx.send_dir().display().to_string()));
    assert!(proxy.ends_with("1000000"));
    assert_eq!(ctx.source_dir(), mount);

    ctx.teardown().await;
}

#[tokio::test]
async fn p004_startup_failure_carries_stage_exit_code_and_output() {
    let rig = Rig::new();
    rig.fake
        .fail_on_start(Stage::ReceiveBridge, 3, "bind: address already in use")
        .unwrap();
    let mut config = rig.fake.config(rig.root.path());
    config.timings.receive_bridge_settle = Duration::from_millis(500);
    let mut ctx = ScenarioContext::new(config).unwrap();

    let err = orchestrator::start_pipeline(&mut ctx).await.unwrap_err();
    match &err {
        HarnessError::StartupFailure {
            stage,
            exit_code,
            output,
        } => {
            assert_eq!(*stage, Stage::ReceiveBridge);
            assert_eq!(*exit_code, Some(3));
            assert!(output.contains("address already in use"));
        }
        other => panic!("expected StartupFailure, got {other}"),
    }
    assert!(err.is_fatal());
    assert!(!rig.fake.start_order().contains(&"diode-send".to_string()));

    ctx.teardown().await;
}

#[tokio::test]
async fn p005_invalid_faults_start_nothing() {
    let rig = Rig::new();
    let mut ctx = rig.context();
    ctx.faults = FaultConfig::loss(150);

    let err = orchestrator::start_pipeline(&mut ctx).await.unwrap_err();
    assert!(matches!(err, HarnessError::Config(_)));
    assert!(rig.fake.start_order().is_empty());

    ctx.teardown().await;
}

#[tokio::test]
async fn p006_stage_flags_follow_context() {
    let rig = Rig::new();
    let mut ctx = rig.context();
    ctx.perf.mtu = Some(1500);
    ctx.perf.block_size = Some(150_000);
    ctx.perf.sender_threads = 2;

    orchestrator::start_pipeline(&mut ctx).await.unwrap();

    let send = &rig.fake.invocations("diode-send")[0];
    assert!(send.contains("--bind-tcp 127.0.0.1:5000"));
    assert!(send.contains("--to-udp 127.0.0.1:5000"));
    assert!(send.contains("--nb-threads 2"));
    assert!(send.contains("--udp-mtu 1500 --repair-block-size 3000"));
    assert!(send.contains("--encoding-block-size 150000"));
    assert!(send.contains("--log-config"));
    assert!(!send.contains("--max-bandwidth"));

    let receive = &rig.fake.invocations("diode-receive")[0];
    assert!(receive.contains("--to-tcp 127.0.0.1:7000"));
    assert!(receive.contains("--session-expiration-delay 1"));
    assert!(receive.contains("--bind-udp 0.0.0.0:5000"));

    let file_receiver = &rig.fake.invocations("diode-receive-file")[0];
    assert!(file_receiver.starts_with("--bind-tcp 127.0.0.1:7000"));
    assert!(file_receiver.contains(&ctx.receive_dir().display().to_string()));

    ctx.teardown().await;
}

#[tokio::test]
async fn p007_double_start_rejected() {
    let rig = Rig::new();
    let mut ctx = rig.context();
    orchestrator::start_pipeline(&mut ctx).await.unwrap();

    let err = orchestrator::start_stage(&mut ctx, Stage::SendBridge)
        .await
        .unwrap_err();
    assert!(matches!(err, HarnessError::Config(_)));
    assert_eq!(rig.fake.invocations("diode-send").len(), 1);

    ctx.teardown().await;
}

fn niceness(pid: u32) -> i32 {
    let stat = std::fs::read_to_string(format!("/proc/{pid}/stat")).unwrap();
    let (_, fields) = stat.rsplit_once(") ").unwrap();
    // Field 19 of stat; fields after the command name start at 3.
    fields.split_whitespace().nth(16).unwrap().parse().unwrap()
}

#[tokio::test]
async fn p008_bridges_are_reniced() {
    let rig = Rig::new();
    let mut ctx = rig.context();
    ctx.perf.bridge_nice = Some(5);

    orchestrator::start_pipeline(&mut ctx).await.unwrap();

    let pid = |ctx: &ScenarioContext, stage| ctx.handle(stage).unwrap().pid().unwrap();
    assert_eq!(niceness(pid(&ctx, Stage::SendBridge)), 5);
    assert_eq!(niceness(pid(&ctx, Stage::ReceiveBridge)), 5);
    assert_eq!(niceness(pid(&ctx, Stage::FileReceiver)), niceness(std::process::id()));

    ctx.teardown().await;
}

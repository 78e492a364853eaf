//! Teardown: processes gone, scratch space removed, every time.

use std::path::Path;
use std::time::Duration;

use diode_harness_core::{ByteSize, Stage, orchestrator, workload};
use diode_harness_test::{Scenario, ScenarioRunner, Step};

use super::Rig;

fn alive(pid: u32) -> bool {
    // Reaped children disappear from /proc; zombies report state Z.
    std::fs::read_to_string(format!("/proc/{pid}/stat"))
        .map(|stat| !stat.contains(") Z "))
        .unwrap_or(false)
}

fn is_empty(dir: &Path) -> bool {
    std::fs::read_dir(dir).unwrap().next().is_none()
}

#[tokio::test]
async fn p030_teardown_kills_stages_and_removes_dirs() {
    let rig = Rig::new();
    let mut ctx = rig.context();
    orchestrator::start_pipeline(&mut ctx).await.unwrap();

    let pids: Vec<u32> = [Stage::FileReceiver, Stage::ReceiveBridge, Stage::SendBridge]
        .into_iter()
        .filter_map(|stage| ctx.handle(stage).and_then(|h| h.pid()))
        .collect();
    assert_eq!(pids.len(), 3);
    assert!(pids.iter().all(|&pid| alive(pid)));
    let dirs = [
        ctx.send_dir().to_path_buf(),
        ctx.receive_dir().to_path_buf(),
        ctx.log_dir().to_path_buf(),
    ];

    ctx.teardown().await;

    assert!(ctx.is_torn_down());
    assert!(pids.iter().all(|&pid| !alive(pid)));
    assert!(dirs.iter().all(|dir| !dir.exists()));
    assert!(is_empty(rig.root.path()));
}

#[tokio::test]
async fn p031_teardown_is_idempotent() {
    let rig = Rig::new();
    let mut ctx = rig.context();
    orchestrator::start_pipeline(&mut ctx).await.unwrap();

    ctx.teardown().await;
    ctx.teardown().await;

    assert!(ctx.is_torn_down());
    assert!(is_empty(rig.root.path()));
}

#[tokio::test]
async fn p032_teardown_tolerates_exited_stages() {
    let rig = Rig::new();
    rig.fake
        .script("diode-send", "sleep 0.2\nexit 0\n")
        .unwrap();
    let mut ctx = rig.context();
    orchestrator::start_pipeline(&mut ctx).await.unwrap();

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(
        orchestrator::stage_status(&mut ctx, Stage::SendBridge)
            .unwrap()
            .is_terminal()
    );

    ctx.teardown().await;
    assert!(is_empty(rig.root.path()));
}

#[tokio::test]
async fn p033_background_senders_are_killed() {
    let rig = Rig::new();
    rig.fake.hang_sender().unwrap();
    let mut ctx = rig.context();
    orchestrator::start_pipeline(&mut ctx).await.unwrap();

    workload::generate_file(&mut ctx, "stuck.bin", ByteSize::kb(4))
        .await
        .unwrap();
    workload::send_file_in_background(&mut ctx, "stuck.bin").unwrap();
    let pid = ctx.senders_mut()[0].pid().unwrap();

    ctx.teardown().await;
    assert!(!alive(pid));
}

#[tokio::test]
async fn p034_throttled_teardown_removes_mountpoint() {
    let rig = Rig::new();
    let mut ctx = rig.context();
    orchestrator::start_throttled_pipeline(&mut ctx, 1_000_000)
        .await
        .unwrap();
    let mount = ctx.rate_limited_dir().unwrap().to_path_buf();

    ctx.teardown().await;

    assert!(std::fs::symlink_metadata(&mount).is_err());
    assert!(is_empty(rig.root.path()));
}

#[tokio::test]
async fn p035_drop_without_teardown_removes_dirs() {
    let rig = Rig::new();
    let mut ctx = rig.context();
    orchestrator::start_pipeline(&mut ctx).await.unwrap();
    let send_dir = ctx.send_dir().to_path_buf();

    drop(ctx);

    assert!(!send_dir.exists());
}

#[tokio::test]
async fn p036_runner_tears_down_after_failure() {
    let rig = Rig::new();
    rig.fake.drop_transfers().unwrap();
    let scenario = Scenario::new("lost")
        .given(Step::StartDiode)
        .when(Step::SendFile {
            name: "lost.bin".into(),
            size: ByteSize::kb(8),
        })
        .then(Step::ReceiveFile {
            name: "lost.bin".into(),
            within: Duration::from_millis(100),
        });

    let failure = ScenarioRunner::new(rig.fake.config(rig.root.path()))
        .run(&scenario)
        .await
        .unwrap_err();

    assert!(!failure.report.passed());
    assert!(is_empty(rig.root.path()));
}

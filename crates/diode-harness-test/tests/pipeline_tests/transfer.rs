//! Sending, polling and content verification.

use std::time::Duration;

use diode_harness_core::{ByteSize, HarnessError, ScenarioContext, orchestrator, verify, workload};
use diode_harness_test::{Scenario, ScenarioRunner, Step};

use super::Rig;

const DEADLINE: Duration = Duration::from_secs(5);

#[tokio::test]
async fn p010_file_round_trip() {
    let rig = Rig::new();
    let mut ctx = rig.context();
    orchestrator::start_pipeline(&mut ctx).await.unwrap();

    workload::generate_file(&mut ctx, "a.bin", ByteSize::mb(1))
        .await
        .unwrap();
    workload::send_file(&mut ctx, "a.bin").await.unwrap();
    verify::receive_file(&mut ctx, "a.bin", DEADLINE)
        .await
        .unwrap();

    assert!(!ctx.receive_dir().join("a.bin").exists());
    assert!(ctx.files().is_empty());

    ctx.teardown().await;
}

#[tokio::test]
async fn p011_multiple_files_in_one_send() {
    let rig = Rig::new();
    let scenario = Scenario::new("multiple")
        .given(Step::StartDiode)
        .when(Step::SendFiles {
            count: 3,
            size: ByteSize::kb(100),
        })
        .then(Step::ReceiveAllFiles { within: DEADLINE });

    let report = ScenarioRunner::new(rig.fake.config(rig.root.path()))
        .run(&scenario)
        .await
        .unwrap();
    assert!(report.passed());
    assert_eq!(report.steps.len(), 3);

    let sends = rig.fake.invocations("diode-send-file");
    assert_eq!(sends.len(), 1);
    for i in 0..3 {
        assert!(sends[0].contains(&format!("test_file_{i}")));
    }
}

#[tokio::test]
async fn p012_corruption_is_a_mismatch_not_a_timeout() {
    let rig = Rig::new();
    rig.fake.corrupt_transfers().unwrap();
    let mut ctx = rig.context();
    orchestrator::start_pipeline(&mut ctx).await.unwrap();

    workload::generate_file(&mut ctx, "a.bin", ByteSize::kb(64))
        .await
        .unwrap();
    workload::send_file(&mut ctx, "a.bin").await.unwrap();
    let err = verify::receive_file(&mut ctx, "a.bin", DEADLINE)
        .await
        .unwrap_err();

    match err {
        HarnessError::VerificationMismatch {
            file,
            expected,
            actual,
        } => {
            assert_eq!(file, "a.bin");
            assert_ne!(expected, actual);
        }
        other => panic!("expected VerificationMismatch, got {other}"),
    }

    ctx.teardown().await;
}

#[tokio::test]
async fn p013_lost_file_times_out() {
    let rig = Rig::new();
    rig.fake.drop_transfers().unwrap();
    let mut ctx = rig.context();
    orchestrator::start_pipeline(&mut ctx).await.unwrap();

    workload::generate_file(&mut ctx, "a.bin", ByteSize::kb(10))
        .await
        .unwrap();
    workload::send_file(&mut ctx, "a.bin").await.unwrap();
    let err = verify::receive_file(&mut ctx, "a.bin", Duration::from_millis(200))
        .await
        .unwrap_err();

    assert!(matches!(err, HarnessError::TransferTimeout { .. }));
    assert!(err.is_assertion());
    // Still registered: only a verified file leaves the registry.
    assert!(ctx.file("a.bin").is_ok());

    ctx.teardown().await;
}

#[tokio::test]
async fn p014_sender_failure_carries_output() {
    let rig = Rig::new();
    rig.fake.fail_sender(2, "connection refused").unwrap();
    let mut ctx = rig.context();
    orchestrator::start_pipeline(&mut ctx).await.unwrap();

    workload::generate_file(&mut ctx, "a.bin", ByteSize::kb(1))
        .await
        .unwrap();
    let err = workload::send_file(&mut ctx, "a.bin").await.unwrap_err();
    match err {
        HarnessError::SendFailure {
            files,
            exit_code,
            output,
        } => {
            assert_eq!(files, vec!["a.bin"]);
            assert_eq!(exit_code, Some(2));
            assert!(output.contains("connection refused"));
        }
        other => panic!("expected SendFailure, got {other}"),
    }

    ctx.teardown().await;
}

#[tokio::test]
async fn p015_hung_sender_times_out() {
    let rig = Rig::new();
    rig.fake.hang_sender().unwrap();
    let mut config = rig.fake.config(rig.root.path());
    config.timings.sender_timeout = Duration::from_millis(200);
    let mut ctx = ScenarioContext::new(config).unwrap();
    orchestrator::start_pipeline(&mut ctx).await.unwrap();

    workload::generate_file(&mut ctx, "a.bin", ByteSize::kb(1))
        .await
        .unwrap();
    let err = workload::send_file(&mut ctx, "a.bin").await.unwrap_err();
    match err {
        HarnessError::SendTimeout { elapsed, .. } => {
            assert!(elapsed >= Duration::from_millis(200));
        }
        other => panic!("expected SendTimeout, got {other}"),
    }

    ctx.teardown().await;
}

#[tokio::test]
async fn p016_throttled_sends_read_through_the_proxy() {
    let rig = Rig::new();
    let scenario = Scenario::new("throttled")
        .given(Step::StartThrottledDiode { mbps: 8 })
        .when(Step::SendFile {
            name: "slow.bin".into(),
            size: ByteSize::kb(256),
        })
        .then(Step::ReceiveFile {
            name: "slow.bin".into(),
            within: DEADLINE,
        });

    let report = ScenarioRunner::new(rig.fake.config(rig.root.path()))
        .run(&scenario)
        .await
        .unwrap();
    assert!(report.passed());

    assert!(rig.fake.invocations("throttled-fs")[0].ends_with(" 1000000"));
    let send_bridge = &rig.fake.invocations("diode-send")[0];
    assert!(send_bridge.contains("--max-bandwidth 8000000"));
    let sender = &rig.fake.invocations("diode-send-file")[0];
    assert!(sender.contains("rate-limited"));
}

#[tokio::test]
async fn p017_block_multiple_size_arrives_whole() {
    let rig = Rig::new();
    let scenario = Scenario::new("blocks")
        .given(Step::SetBlockSize(100_000))
        .given(Step::StartDiode)
        .when(Step::SendFile {
            name: "blocks.bin".into(),
            size: ByteSize::bytes(300_000),
        })
        .then(Step::ReceiveFile {
            name: "blocks.bin".into(),
            within: DEADLINE,
        });

    let report = ScenarioRunner::new(rig.fake.config(rig.root.path()))
        .run(&scenario)
        .await
        .unwrap();
    assert!(report.passed());
}

#[tokio::test]
async fn p018_send_at_least_fails_when_too_fast() {
    let rig = Rig::new();
    let scenario = Scenario::new("too-fast")
        .given(Step::StartDiode)
        .when(Step::SendFileAtLeast {
            name: "fast.bin".into(),
            size: ByteSize::kb(1),
            min: Duration::from_secs(30),
        });

    let failure = ScenarioRunner::new(rig.fake.config(rig.root.path()))
        .run(&scenario)
        .await
        .unwrap_err();
    assert!(matches!(failure.error, HarnessError::Assertion(_)));
}

//! Maximum-throughput sweep.
//!
//! Starts a throttled pipeline and pushes files through it one at a time
//! until one is lost or the requested count is reached.

use std::time::{Duration, Instant};

use diode_harness_core::{ByteSize, HarnessConfig, Result, ScenarioContext, verify, workload};
use serde::Serialize;

use crate::scenario::Step;

/// Sweep parameters.
#[derive(Debug, Clone)]
pub struct SweepConfig {
    /// Number of files to send.
    pub file_count: usize,
    /// Size of each file.
    pub file_size: ByteSize,
    /// Throughput cap in Mb/s.
    pub bandwidth_mbps: u64,
    /// UDP MTU.
    pub mtu: u32,
    /// Encoding block size.
    pub block_size: u32,
    /// Send bridge worker threads.
    pub sender_threads: u32,
    /// Per-file delivery deadline.
    pub receive_deadline: Duration,
    /// Niceness for both bridges, if any.
    pub bridge_nice: Option<i32>,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            file_count: 1000,
            file_size: ByteSize::mb(1),
            bandwidth_mbps: 1000,
            mtu: 9000,
            block_size: 300_000,
            sender_threads: 4,
            receive_deadline: Duration::from_secs(20),
            bridge_nice: None,
        }
    }
}

/// Sweep result.
#[derive(Debug, Clone, Serialize)]
pub struct SweepReport {
    /// Files requested.
    pub requested: usize,
    /// Files delivered intact.
    pub delivered: usize,
    /// First file that failed to arrive, if any.
    pub lost: Option<String>,
    /// Wall-clock time from pipeline start to the last delivery.
    pub elapsed: Duration,
    /// Bytes delivered intact.
    pub delivered_bytes: u64,
}

impl SweepReport {
    /// Achieved goodput in Mb/s.
    #[must_use]
    pub fn goodput_mbps(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        self.delivered_bytes as f64 * 8.0 / secs / 1_000_000.0
    }
}

/// Runs the sweep. The context is always torn down.
///
/// # Errors
/// Returns an error if the pipeline cannot start or a file cannot be
/// generated or sent. A file that does not arrive ends the sweep without
/// an error.
pub async fn run_sweep(config: HarnessConfig, sweep: &SweepConfig) -> Result<SweepReport> {
    let mut ctx = ScenarioContext::new(config)?;
    let result = drive(&mut ctx, sweep).await;
    ctx.teardown().await;
    result
}

async fn drive(ctx: &mut ScenarioContext, sweep: &SweepConfig) -> Result<SweepReport> {
    let mut setup = vec![
        Step::SetMtu(sweep.mtu),
        Step::SetBlockSize(sweep.block_size),
        Step::SetSenderThreads(sweep.sender_threads),
    ];
    if let Some(nice) = sweep.bridge_nice {
        setup.push(Step::SetBridgeNice(nice));
    }
    setup.push(Step::StartThrottledDiode {
        mbps: sweep.bandwidth_mbps,
    });
    for step in &setup {
        step.run(ctx).await?;
    }

    let start = Instant::now();
    let mut report = SweepReport {
        requested: sweep.file_count,
        delivered: 0,
        lost: None,
        elapsed: Duration::ZERO,
        delivered_bytes: 0,
    };

    for i in 0..sweep.file_count {
        let name = format!("test{i}.bin");
        workload::generate_file(ctx, &name, sweep.file_size).await?;
        workload::send_file(ctx, &name).await?;
        match verify::receive_file(ctx, &name, sweep.receive_deadline).await {
            Ok(_) => {
                report.delivered += 1;
                report.delivered_bytes += sweep.file_size.as_u64();
                tracing::info!(file = %name, delivered = report.delivered, requested = sweep.file_count, "file delivered");
            }
            Err(e) => {
                tracing::warn!(file = %name, error = %e, delivered = report.delivered, "file lost, stopping sweep");
                report.lost = Some(name);
                break;
            }
        }
        workload::remove_source(ctx, &name).await?;
    }

    report.elapsed = start.elapsed();
    Ok(report)
}

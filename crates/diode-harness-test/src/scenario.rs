//! Scenario steps.
//!
//! Every action a scenario can take is one [`Step`] variant, and
//! [`Step::run`] is the single place that maps a variant onto harness calls.

use std::fmt;
use std::time::Duration;

use diode_harness_core::{
    ByteSize, FaultConfig, HarnessError, Result, ScenarioContext, Stage, orchestrator, verify,
    workload,
};

/// Converts a link speed in Mb/s to bits per second.
#[must_use]
pub const fn mbps_to_bps(mbps: u64) -> u64 {
    mbps * 1_000_000
}

/// Converts a link speed in Mb/s to bytes per second.
#[must_use]
pub const fn mbps_to_bytes_per_sec(mbps: u64) -> u64 {
    mbps * 1_000_000 / 8
}

/// One scenario action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Link goes down after `down_after` bytes and back up after `up_after`.
    InterruptNetwork {
        /// Forwarded bytes before the outage.
        down_after: ByteSize,
        /// Forwarded bytes before recovery.
        up_after: ByteSize,
    },
    /// Uniform random packet loss.
    DropPackets {
        /// Loss percentage.
        percent: u8,
    },
    /// Bandwidth cap on the link between the bridges.
    LimitNetworkBandwidth {
        /// Cap in Mb/s.
        mbps: u64,
    },
    /// UDP MTU for both bridges.
    SetMtu(u32),
    /// Encoding block size for both bridges.
    SetBlockSize(u32),
    /// Send bridge worker threads.
    SetSenderThreads(u32),
    /// Niceness of both bridges, applied right after each one starts.
    SetBridgeNice(i32),
    /// Start the pipeline.
    StartDiode,
    /// Start the pipeline behind the storage proxy, capping both the proxy
    /// read rate and the send bridge at `mbps`.
    StartThrottledDiode {
        /// Throughput in Mb/s.
        mbps: u64,
    },
    /// Generate a file and send it.
    SendFile {
        /// File name.
        name: String,
        /// File size.
        size: ByteSize,
    },
    /// Generate `count` files and send them in one sender invocation.
    SendFiles {
        /// Number of files.
        count: usize,
        /// Size of each file.
        size: ByteSize,
    },
    /// Generate and send a file, asserting the send took at least `min`.
    SendFileAtLeast {
        /// File name.
        name: String,
        /// File size.
        size: ByteSize,
        /// Minimum acceptable send duration.
        min: Duration,
    },
    /// Stop a stage, cool down, start it again.
    RestartStage(Stage),
    /// Start sending a file in the background, wait `after`, restart `stage`.
    RestartDuringSend {
        /// Stage to restart.
        stage: Stage,
        /// File name.
        name: String,
        /// File size.
        size: ByteSize,
        /// Delay between starting the send and the restart.
        after: Duration,
    },
    /// Verify one file arrives within `within`.
    ReceiveFile {
        /// File name.
        name: String,
        /// Deadline.
        within: Duration,
    },
    /// Verify every pending file arrives, each within `within`.
    ReceiveAllFiles {
        /// Per-file deadline.
        within: Duration,
    },
    /// Accept either intact delivery of `name` within `within`, or no
    /// delivery at all with nothing partial left in the receive directory.
    ReceiveFileOrTimeout {
        /// File name.
        name: String,
        /// Deadline.
        within: Duration,
    },
    /// No pending file has a truncated or oversized copy in the receive
    /// directory.
    AssertNoPartialFiles,
}

impl Step {
    /// Executes the step against `ctx`.
    ///
    /// # Errors
    /// Propagates the first harness error unchanged.
    pub async fn run(&self, ctx: &mut ScenarioContext) -> Result<()> {
        match self {
            Self::InterruptNetwork {
                down_after,
                up_after,
            } => {
                ctx.faults
                    .merge(&FaultConfig::interrupt(*down_after, *up_after));
            }
            Self::DropPackets { percent } => {
                ctx.faults.merge(&FaultConfig::loss(*percent));
            }
            Self::LimitNetworkBandwidth { mbps } => {
                ctx.faults.merge(&FaultConfig::bandwidth(mbps_to_bps(*mbps)));
            }
            Self::SetMtu(mtu) => ctx.perf.mtu = Some(*mtu),
            Self::SetBlockSize(size) => ctx.perf.block_size = Some(*size),
            Self::SetSenderThreads(threads) => {
                if *threads == 0 {
                    return Err(HarnessError::config("sender threads must be at least 1"));
                }
                ctx.perf.sender_threads = *threads;
            }
            Self::SetBridgeNice(nice) => ctx.perf.bridge_nice = Some(*nice),
            Self::StartDiode => orchestrator::start_pipeline(ctx).await?,
            Self::StartThrottledDiode { mbps } => {
                ctx.perf.send_bandwidth_bps = Some(mbps_to_bps(*mbps));
                orchestrator::start_throttled_pipeline(ctx, mbps_to_bytes_per_sec(*mbps)).await?;
            }
            Self::SendFile { name, size } => {
                workload::generate_file(ctx, name, *size).await?;
                workload::send_file(ctx, name).await?;
            }
            Self::SendFiles { count, size } => {
                let mut names = Vec::with_capacity(*count);
                for i in 0..*count {
                    let name = format!("test_file_{i}");
                    workload::generate_file(ctx, &name, *size).await?;
                    names.push(name);
                }
                workload::send_files(ctx, &names).await?;
            }
            Self::SendFileAtLeast { name, size, min } => {
                workload::generate_file(ctx, name, *size).await?;
                let took = workload::send_file(ctx, name).await?;
                if took < *min {
                    return Err(HarnessError::assertion(format!(
                        "sending {name} took {took:?}, expected at least {min:?}"
                    )));
                }
            }
            Self::RestartStage(stage) => orchestrator::restart_stage(ctx, *stage).await?,
            Self::RestartDuringSend {
                stage,
                name,
                size,
                after,
            } => {
                workload::generate_file(ctx, name, *size).await?;
                workload::send_file_in_background(ctx, name)?;
                tokio::time::sleep(*after).await;
                orchestrator::restart_stage(ctx, *stage).await?;
            }
            Self::ReceiveFile { name, within } => {
                verify::receive_file(ctx, name, *within).await?;
            }
            Self::ReceiveAllFiles { within } => {
                verify::receive_all_files(ctx, *within).await?;
            }
            Self::ReceiveFileOrTimeout { name, within } => {
                verify::receive_file_or_timeout(ctx, name, *within).await?;
            }
            Self::AssertNoPartialFiles => verify::assert_no_partial_files(ctx).await?,
        }
        Ok(())
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InterruptNetwork {
                down_after,
                up_after,
            } => write!(f, "network interrupt of {up_after} after {down_after}"),
            Self::DropPackets { percent } => write!(f, "network drop of {percent}%"),
            Self::LimitNetworkBandwidth { mbps } => {
                write!(f, "network bandwidth limited to {mbps} Mb/s")
            }
            Self::SetMtu(mtu) => write!(f, "MTU {mtu}"),
            Self::SetBlockSize(size) => write!(f, "encoding block size {size}"),
            Self::SetSenderThreads(n) => write!(f, "{n} sender threads"),
            Self::SetBridgeNice(nice) => write!(f, "bridges run at niceness {nice}"),
            Self::StartDiode => f.write_str("diode is started"),
            Self::StartThrottledDiode { mbps } => {
                write!(f, "diode is started with max throughput of {mbps} Mb/s")
            }
            Self::SendFile { name, size } => write!(f, "send file {name} of size {size}"),
            Self::SendFiles { count, size } => write!(f, "send {count} files of size {size}"),
            Self::SendFileAtLeast { name, size, min } => write!(
                f,
                "send file {name} of size {size} in at least {}",
                humantime::format_duration(*min)
            ),
            Self::RestartStage(stage) => write!(f, "{stage} is restarted"),
            Self::RestartDuringSend {
                stage, name, size, ..
            } => write!(f, "{stage} restarts while sending {name} of size {size}"),
            Self::ReceiveFile { name, within } => write!(
                f,
                "receive file {name} in {}",
                humantime::format_duration(*within)
            ),
            Self::ReceiveAllFiles { within } => write!(
                f,
                "receive all files in {}",
                humantime::format_duration(*within)
            ),
            Self::ReceiveFileOrTimeout { name, within } => write!(
                f,
                "receive file {name} in {} or nothing at all",
                humantime::format_duration(*within)
            ),
            Self::AssertNoPartialFiles => f.write_str("no partial file is left behind"),
        }
    }
}

/// A named, ordered list of steps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scenario {
    /// Short identifier.
    pub name: String,
    /// Steps in execution order.
    pub steps: Vec<Step>,
}

impl Scenario {
    /// Creates an empty scenario.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    /// Appends a precondition step.
    #[must_use]
    pub fn given(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    /// Appends an action step.
    #[must_use]
    pub fn when(self, step: Step) -> Self {
        self.given(step)
    }

    /// Appends an outcome step.
    #[must_use]
    pub fn then(self, step: Step) -> Self {
        self.given(step)
    }
}

//! Command-line entry point for the diode harness.
//!
//! ```bash
//! diode-harness --bin-dir ./target/release list
//! diode-harness --bin-dir ./target/release run baseline-1mb network-outage
//! diode-harness --bin-dir ./target/release max-throughput --file-count 100 --bandwidth 500
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use diode_harness_core::{ByteSize, HarnessConfig, LogLevel};
use diode_harness_test::{Outcome, ScenarioRunner, SweepConfig, catalog, run_sweep};
use tracing_subscriber::EnvFilter;

/// Fault-injection integration harness for file-transfer diodes.
#[derive(Parser, Debug)]
#[command(name = "diode-harness", about = "Drive and verify a diode pipeline under faults")]
struct Cli {
    /// TOML configuration file. Flags below override its values.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding the diode executables.
    #[arg(long, global = true)]
    bin_dir: Option<PathBuf>,

    /// Parent directory for per-scenario scratch space.
    #[arg(long, global = true)]
    work_root: Option<PathBuf>,

    /// Log level written into stage log configurations.
    #[arg(long, global = true, value_enum)]
    stage_log_level: Option<StageLogLevel>,

    /// Discard stage output instead of capturing it.
    #[arg(long, global = true, default_value_t = false)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List built-in scenarios.
    List,

    /// Run built-in scenarios (all of them when no name is given).
    Run {
        /// Scenario names.
        names: Vec<String>,

        /// Print reports as JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Send files one at a time through a throttled pipeline until one is lost.
    MaxThroughput {
        /// Number of files to send.
        #[arg(long, default_value_t = 1000)]
        file_count: usize,

        /// Size of each file in MB.
        #[arg(long, default_value_t = 1)]
        file_size: u64,

        /// Throughput cap in Mb/s.
        #[arg(long, default_value_t = 1000)]
        bandwidth: u64,

        /// UDP MTU.
        #[arg(long, default_value_t = 9000)]
        mtu: u32,

        /// Encoding block size.
        #[arg(long, default_value_t = 300_000)]
        block_size: u32,

        /// Send bridge worker threads.
        #[arg(long, default_value_t = 4)]
        threads: u32,

        /// Per-file delivery deadline.
        #[arg(long, default_value = "20s", value_parser = humantime::parse_duration)]
        deadline: Duration,

        /// Niceness for both bridges; negative values need root.
        #[arg(long, allow_hyphen_values = true)]
        bridge_nice: Option<i32>,

        /// Print the report as JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum StageLogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<StageLogLevel> for LogLevel {
    fn from(level: StageLogLevel) -> Self {
        match level {
            StageLogLevel::Error => Self::Error,
            StageLogLevel::Warn => Self::Warn,
            StageLogLevel::Info => Self::Info,
            StageLogLevel::Debug => Self::Debug,
            StageLogLevel::Trace => Self::Trace,
        }
    }
}

fn build_config(cli: &Cli) -> anyhow::Result<HarnessConfig> {
    let mut config = match &cli.config {
        Some(path) => HarnessConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => HarnessConfig::default(),
    };
    if let Some(bin_dir) = &cli.bin_dir {
        config.bin_dir.clone_from(bin_dir);
    }
    if let Some(work_root) = &cli.work_root {
        config.work_root.clone_from(work_root);
    }
    if let Some(level) = cli.stage_log_level {
        config.log_level = level.into();
    }
    if cli.quiet {
        config.quiet = true;
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = build_config(&cli)?;

    match cli.command {
        Command::List => {
            for scenario in catalog::builtin() {
                println!("{}", scenario.name);
                for step in &scenario.steps {
                    println!("    {step}");
                }
            }
        }
        Command::Run { names, json } => {
            let scenarios = if names.is_empty() {
                catalog::builtin()
            } else {
                names
                    .iter()
                    .map(|name| {
                        catalog::find(name).with_context(|| format!("unknown scenario: {name}"))
                    })
                    .collect::<anyhow::Result<Vec<_>>>()?
            };

            let reports = ScenarioRunner::new(config).run_all(&scenarios).await;
            if json {
                println!("{}", serde_json::to_string_pretty(&reports)?);
            } else {
                for report in &reports {
                    let elapsed = humantime::format_duration(Duration::from_millis(
                        report.elapsed.as_millis() as u64,
                    ));
                    match &report.outcome {
                        Outcome::Passed => println!("PASS  {} ({elapsed})", report.name),
                        Outcome::Failed { error, .. } | Outcome::Aborted { error, .. } => {
                            println!("FAIL  {} ({elapsed}): {error}", report.name);
                        }
                    }
                }
            }

            let failed = reports.iter().filter(|r| !r.passed()).count();
            if failed > 0 {
                bail!("{failed} of {} scenarios failed", reports.len());
            }
        }
        Command::MaxThroughput {
            file_count,
            file_size,
            bandwidth,
            mtu,
            block_size,
            threads,
            deadline,
            bridge_nice,
            json,
        } => {
            let sweep = SweepConfig {
                file_count,
                file_size: ByteSize::mb(file_size),
                bandwidth_mbps: bandwidth,
                mtu,
                block_size,
                sender_threads: threads,
                receive_deadline: deadline,
                bridge_nice,
            };
            let mut config = config;
            config.quiet = true;

            let report = run_sweep(config, &sweep).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!(
                    "delivered {} / {} files in {} ({:.1} Mb/s)",
                    report.delivered,
                    report.requested,
                    humantime::format_duration(report.elapsed),
                    report.goodput_mbps()
                );
                if let Some(lost) = &report.lost {
                    println!("lost {lost}");
                }
            }
        }
    }
    Ok(())
}

//! Mounts a read-only, rate-limited mirror of a directory.
//!
//! ```bash
//! throttled-fs <mountpoint> <source-root> <bytes-per-second>
//! ```
//!
//! Runs until SIGINT or SIGTERM, then unmounts.

use std::path::PathBuf;

use clap::Parser;
use diode_harness_throttle::ThrottledFs;
use tokio::signal::unix::{SignalKind, signal};
use tracing_subscriber::EnvFilter;

/// Rate-limited read-only FUSE mirror.
#[derive(Parser, Debug)]
#[command(name = "throttled-fs", about = "Read-only FUSE mirror with paced reads")]
struct Cli {
    /// Where to mount the mirror.
    mountpoint: PathBuf,

    /// Directory to mirror.
    source: PathBuf,

    /// Read rate in bytes per second.
    rate: u64,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let fs = ThrottledFs::new(&cli.source, cli.rate)?;
    let session = fs.mount(&cli.mountpoint)?;

    let mut term = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => tracing::info!("received SIGINT"),
        _ = term.recv() => tracing::info!("received SIGTERM"),
    }

    drop(session);
    tracing::info!(mountpoint = %cli.mountpoint.display(), "unmounted");
    Ok(())
}

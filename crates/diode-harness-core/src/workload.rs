//! Test file generation and sending.

use std::io::Write;
use std::time::{Duration, Instant};

use rand::RngCore;

use crate::config::SENDER_BINARY;
use crate::context::ScenarioContext;
use crate::error::{HarnessError, Result};
use crate::process::{ProcessHandle, StageCommand};
use crate::size::ByteSize;
use crate::verify::{FileRecord, Fingerprint};

/// Block size used when writing random content.
const WRITE_BLOCK: usize = 1 << 20;

/// Writes `size` random bytes to `name` in the send directory, fingerprints
/// the content as it is written, and registers the file.
///
/// # Errors
/// Returns an error if the file cannot be written.
pub async fn generate_file(ctx: &mut ScenarioContext, name: &str, size: ByteSize) -> Result<FileRecord> {
    let path = ctx.send_dir().join(name);
    let target = path.clone();
    let total = size.as_u64();

    let fingerprint = tokio::task::spawn_blocking(move || -> std::io::Result<Fingerprint> {
        let mut file = std::io::BufWriter::new(std::fs::File::create(&target)?);
        let mut hasher = blake3::Hasher::new();
        let mut rng = rand::thread_rng();
        let mut block = vec![0u8; WRITE_BLOCK];
        let mut remaining = total;
        while remaining > 0 {
            let n = usize::try_from(remaining).map_or(WRITE_BLOCK, |r| r.min(WRITE_BLOCK));
            rng.fill_bytes(&mut block[..n]);
            file.write_all(&block[..n])?;
            hasher.update(&block[..n]);
            remaining -= n as u64;
        }
        file.flush()?;
        Ok(Fingerprint::from_hasher(&hasher))
    })
    .await
    .map_err(std::io::Error::other)??;

    let record = FileRecord {
        name: name.to_string(),
        size: total,
        fingerprint,
        source: path,
    };
    tracing::debug!(scenario = %ctx.id(), file = name, size = %size, fingerprint = %fingerprint, "generated file");
    ctx.register_file(record.clone());
    Ok(record)
}

/// Command line sending `names` through the send bridge.
///
/// # Errors
/// [`HarnessError::UnknownFile`] if a name was never generated.
pub fn sender_command(ctx: &ScenarioContext, names: &[String]) -> Result<StageCommand> {
    let config = ctx.config();
    let mut cmd = StageCommand::new(config.sender_binary())
        .flag("--buffer-size", config.workload.sender_buffer_size)
        .flag("--to-tcp", config.addresses.send_bridge_tcp);
    let source = ctx.source_dir();
    for name in names {
        ctx.file(name)?;
        cmd = cmd.arg(source.join(name).display().to_string());
    }
    Ok(cmd)
}

/// Sends `names` in the foreground and returns the wall-clock duration.
///
/// # Errors
/// [`HarnessError::SendFailure`] on a nonzero exit,
/// [`HarnessError::SendTimeout`] if the sender outlives its deadline.
pub async fn send_files(ctx: &mut ScenarioContext, names: &[String]) -> Result<Duration> {
    let command = sender_command(ctx, names)?;
    let timeout = ctx.config().timings.sender_timeout;
    let capture = !ctx.config().quiet;

    let start = Instant::now();
    let mut sender = ProcessHandle::spawn(SENDER_BINARY, command, capture)?;
    let Some(status) = sender.wait_timeout(timeout).await? else {
        let elapsed = start.elapsed();
        if let Err(e) = sender.kill().await {
            tracing::warn!(scenario = %ctx.id(), pid = ?sender.pid(), error = %e, "failed to kill timed-out sender");
        }
        tracing::warn!(scenario = %ctx.id(), files = ?names, elapsed = ?elapsed, "sender timed out");
        return Err(HarnessError::SendTimeout {
            files: names.to_vec(),
            elapsed,
        });
    };
    let elapsed = start.elapsed();

    if status.exit_code() != Some(0) {
        let output = sender.collect_output().await;
        tracing::warn!(scenario = %ctx.id(), files = ?names, status = ?status, "sender failed");
        return Err(HarnessError::SendFailure {
            files: names.to_vec(),
            exit_code: status.exit_code(),
            output,
        });
    }

    tracing::info!(scenario = %ctx.id(), files = ?names, elapsed = ?elapsed, "files sent");
    Ok(elapsed)
}

/// Sends one file in the foreground.
///
/// # Errors
/// See [`send_files`].
pub async fn send_file(ctx: &mut ScenarioContext, name: &str) -> Result<Duration> {
    send_files(ctx, &[name.to_string()]).await
}

/// Starts sending `name` without waiting. The sender is killed at teardown
/// if still running.
///
/// # Errors
/// Returns an error if the sender cannot be spawned.
pub fn send_file_in_background(ctx: &mut ScenarioContext, name: &str) -> Result<()> {
    let command = sender_command(ctx, &[name.to_string()])?;
    let sender = ProcessHandle::spawn(SENDER_BINARY, command, !ctx.config().quiet)?;
    tracing::info!(scenario = %ctx.id(), file = name, pid = ?sender.pid(), "sending in background");
    ctx.add_sender(sender);
    Ok(())
}

/// Deletes a generated source file. The file's record is left untouched.
///
/// # Errors
/// Returns an error if the file cannot be removed.
pub async fn remove_source(ctx: &mut ScenarioContext, name: &str) -> Result<()> {
    let path = ctx.send_dir().join(name);
    tokio::fs::remove_file(&path).await?;
    tracing::debug!(file = name, "removed source");
    Ok(())
}

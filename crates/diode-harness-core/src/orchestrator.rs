//! Pipeline process orchestration.
//!
//! Stages start one at a time in dependency order so every listener exists
//! before anything connects to it. After each start the orchestrator waits
//! the stage's settle interval and probes its exit status; a stage that has
//! already exited is a fatal [`HarnessError::StartupFailure`].

use std::path::Path;
use std::process::Stdio;

use crate::context::ScenarioContext;
use crate::error::{HarnessError, Result};
use crate::process::{ProcessHandle, StageCommand};
use crate::types::{Signal, Stage, StageStatus};

/// Builds the command line for `stage` from the context.
///
/// # Errors
/// Returns a configuration error if the stage cannot be started in the
/// current context: a fault injector without impairments, or a storage
/// proxy without a rate.
pub fn stage_command(ctx: &ScenarioContext, stage: Stage) -> Result<StageCommand> {
    let config = ctx.config();
    let addresses = &config.addresses;
    let mut cmd = StageCommand::new(config.stage_binary(stage));

    match stage {
        Stage::StorageProxy => {
            let rate = ctx
                .proxy_rate()
                .ok_or_else(|| HarnessError::config("storage proxy needs a read rate"))?;
            let mount = ctx
                .rate_limited_dir()
                .ok_or_else(|| HarnessError::config("storage proxy needs a mountpoint"))?;
            cmd = cmd
                .arg(mount.display().to_string())
                .arg(ctx.send_dir().display().to_string())
                .arg(rate.to_string());
        }
        Stage::FaultInjector => {
            let args = ctx
                .faults
                .injector_args(addresses)
                .ok_or_else(|| HarnessError::config("fault injector needs at least one impairment"))?;
            cmd = cmd.args(args);
        }
        Stage::FileReceiver => {
            cmd = cmd
                .flag("--bind-tcp", addresses.file_receiver_tcp)
                .arg(ctx.receive_dir().display().to_string());
        }
        Stage::ReceiveBridge => {
            let bind = if ctx.faults.is_empty() {
                addresses.receive_bridge_udp
            } else {
                addresses.receive_bridge_udp_behind_injector
            };
            cmd = cmd
                .flag("--to-tcp", addresses.file_receiver_tcp)
                .flag(
                    "--session-expiration-delay",
                    config.workload.session_expiration_delay,
                )
                .flag("--bind-udp", bind);
            cmd = with_encoding(cmd, ctx);
        }
        Stage::SendBridge => {
            cmd = cmd
                .flag("--bind-tcp", addresses.send_bridge_tcp)
                .flag("--to-udp", addresses.send_bridge_udp_target)
                .flag("--nb-threads", ctx.perf.sender_threads);
            cmd = with_encoding(cmd, ctx);
            if let Some(bps) = ctx.perf.send_bandwidth_bps {
                cmd = cmd.flag("--max-bandwidth", bps);
            }
        }
    }

    if let Some(path) = ctx.log_config_path(stage) {
        cmd = cmd.flag("--log-config", path.display());
    }
    Ok(cmd)
}

fn with_encoding(mut cmd: StageCommand, ctx: &ScenarioContext) -> StageCommand {
    if let Some(mtu) = ctx.perf.mtu {
        cmd = cmd
            .flag("--udp-mtu", mtu)
            .flag("--repair-block-size", u64::from(mtu) * 2);
    }
    if let Some(block) = ctx.perf.block_size {
        cmd = cmd.flag("--encoding-block-size", block);
    }
    cmd
}

/// Starts one stage and waits for it to settle.
///
/// # Errors
/// [`HarnessError::Spawn`] if the executable cannot run,
/// [`HarnessError::StartupFailure`] if it exits before the probe.
pub async fn start_stage(ctx: &mut ScenarioContext, stage: Stage) -> Result<()> {
    if let Some(handle) = ctx.handle_mut(stage) {
        if handle.is_running() {
            return Err(HarnessError::config(format!("{stage} is already running")));
        }
    }
    let command = stage_command(ctx, stage)?;
    launch(ctx, stage, command).await
}

async fn launch(ctx: &mut ScenarioContext, stage: Stage, command: StageCommand) -> Result<()> {
    let capture = !ctx.config().quiet;
    let mut handle = ProcessHandle::spawn(stage.binary_name(), command, capture)
        .map_err(|source| HarnessError::Spawn { stage, source })?;

    tokio::time::sleep(ctx.config().timings.settle(stage)).await;

    let status = handle.status()?;
    if status.is_terminal() {
        let output = handle.collect_output().await;
        tracing::error!(scenario = %ctx.id(), stage = %stage, status = ?status, "stage exited during startup");
        return Err(HarnessError::StartupFailure {
            stage,
            exit_code: status.exit_code(),
            output,
        });
    }

    tracing::info!(scenario = %ctx.id(), stage = %stage, pid = ?handle.pid(), "stage ready");
    if let (Some(nice), Some(pid)) = (ctx.perf.bridge_nice, handle.pid()) {
        if matches!(stage, Stage::ReceiveBridge | Stage::SendBridge) {
            renice(stage, pid, nice).await;
        }
    }
    ctx.insert_handle(stage, handle);
    Ok(())
}

async fn renice(stage: Stage, pid: u32, nice: i32) {
    let result = tokio::process::Command::new("renice")
        .arg("-n")
        .arg(nice.to_string())
        .arg("-p")
        .arg(pid.to_string())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;
    match result {
        Ok(status) if status.success() => {
            tracing::debug!(stage = %stage, pid = pid, nice = nice, "reniced");
        }
        Ok(status) => {
            tracing::warn!(stage = %stage, pid = pid, nice = nice, status = %status, "renice refused");
        }
        Err(e) => {
            tracing::warn!(stage = %stage, pid = pid, nice = nice, error = %e, "renice failed");
        }
    }
}

/// Starts the pipeline: fault injector (only if an impairment is set), file
/// receiver, receive bridge, send bridge.
///
/// # Errors
/// Rejects invalid fault parameters before any process starts, then stops
/// at the first stage that fails to come up.
pub async fn start_pipeline(ctx: &mut ScenarioContext) -> Result<()> {
    ctx.faults.validate()?;

    if ctx.faults.is_empty() {
        tracing::debug!(scenario = %ctx.id(), "no impairment configured, skipping fault injector");
    } else {
        start_stage(ctx, Stage::FaultInjector).await?;
    }
    for stage in [Stage::FileReceiver, Stage::ReceiveBridge, Stage::SendBridge] {
        start_stage(ctx, stage).await?;
    }
    Ok(())
}

/// Mounts the storage proxy at `bytes_per_sec`, then starts the pipeline.
/// Senders read through the proxy afterwards.
///
/// # Errors
/// Returns an error for a zero rate, or any error of [`start_pipeline`].
pub async fn start_throttled_pipeline(ctx: &mut ScenarioContext, bytes_per_sec: u64) -> Result<()> {
    if bytes_per_sec == 0 {
        return Err(HarnessError::config("storage proxy rate must be greater than 0"));
    }
    ctx.faults.validate()?;
    ctx.ensure_rate_limited_dir()?;
    ctx.set_proxy_rate(bytes_per_sec);
    start_stage(ctx, Stage::StorageProxy).await?;
    start_pipeline(ctx).await
}

/// Stops a stage: SIGTERM, bounded grace wait, then SIGKILL.
///
/// The handle stays tracked so the stage can be restarted.
///
/// # Errors
/// [`HarnessError::StageNotRunning`] if the stage was never started.
pub async fn stop_stage(ctx: &mut ScenarioContext, stage: Stage) -> Result<StageStatus> {
    let grace = ctx.config().timings.stop_grace;
    let mount = ctx.rate_limited_dir().map(Path::to_path_buf);
    let handle = ctx
        .handle_mut(stage)
        .ok_or(HarnessError::StageNotRunning(stage))?;
    let status = handle.stop(grace).await?;

    if stage == Stage::StorageProxy {
        if let Some(mount) = mount {
            lazy_unmount(&mount).await;
        }
    }
    tracing::info!(stage = %stage, status = ?status, "stage stopped");
    Ok(status)
}

/// Stops a stage, waits the restart cool-down, and starts it again with the
/// exact command line it was first started with.
///
/// # Errors
/// [`HarnessError::StageNotRunning`] if the stage was never started, or any
/// startup error.
pub async fn restart_stage(ctx: &mut ScenarioContext, stage: Stage) -> Result<()> {
    let command = ctx
        .handle(stage)
        .ok_or(HarnessError::StageNotRunning(stage))?
        .command()
        .clone();

    stop_stage(ctx, stage).await?;
    let cooldown = ctx.config().timings.restart_cooldown;
    tracing::info!(stage = %stage, cooldown = ?cooldown, "restarting stage");
    tokio::time::sleep(cooldown).await;
    launch(ctx, stage, command).await
}

/// Current status of a stage.
///
/// # Errors
/// Returns an error if the OS cannot report the process state.
pub fn stage_status(ctx: &mut ScenarioContext, stage: Stage) -> Result<StageStatus> {
    match ctx.handle_mut(stage) {
        Some(handle) => Ok(handle.status()?),
        None => Ok(StageStatus::NotStarted),
    }
}

/// Kills background senders, then every stage in reverse start order.
///
/// Never fails: each step's error is logged and the next step runs. The
/// storage proxy gets SIGTERM first so it can unmount itself, followed by a
/// lazy unmount of its mountpoint.
pub async fn stop_all(ctx: &mut ScenarioContext) {
    let id = ctx.id();
    let grace = ctx.config().timings.stop_grace;

    for sender in ctx.senders_mut() {
        if let Err(e) = sender.kill().await {
            let err = HarnessError::teardown(format!("killing {}: {e}", sender.label()));
            tracing::warn!(scenario = %id, error = %err, "teardown step failed");
        }
    }

    let mount = ctx.rate_limited_dir().map(Path::to_path_buf);
    let order: Vec<Stage> = ctx.started().iter().rev().copied().collect();
    for stage in order {
        let Some(handle) = ctx.handle_mut(stage) else {
            continue;
        };
        let result = if stage == Stage::StorageProxy {
            match handle.signal(Signal::Term) {
                Ok(()) => match handle.wait_timeout(grace).await {
                    Ok(Some(_)) => Ok(()),
                    Ok(None) => handle.kill().await,
                    Err(e) => Err(e),
                },
                Err(e) => Err(e),
            }
        } else {
            handle.kill().await
        };
        if let Err(e) = result {
            let err = HarnessError::teardown(format!("killing {stage}: {e}"));
            tracing::warn!(scenario = %id, error = %err, "teardown step failed");
        }
        if stage == Stage::StorageProxy {
            if let Some(mount) = &mount {
                lazy_unmount(mount).await;
            }
        }
    }
}

/// Lazily unmounts a FUSE mountpoint. Failures are logged at debug level
/// since the mount is usually already gone.
pub async fn lazy_unmount(mount: &Path) {
    let result = tokio::process::Command::new("fusermount")
        .arg("-u")
        .arg("-z")
        .arg(mount)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;
    log_unmount(mount, result);
}

/// Blocking variant of [`lazy_unmount`] for drop paths.
pub fn lazy_unmount_blocking(mount: &Path) {
    let result = std::process::Command::new("fusermount")
        .arg("-u")
        .arg("-z")
        .arg(mount)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    log_unmount(mount, result);
}

fn log_unmount(mount: &Path, result: std::io::Result<std::process::ExitStatus>) {
    match result {
        Ok(status) if status.success() => {
            tracing::debug!(mount = %mount.display(), "unmounted");
        }
        Ok(status) => {
            tracing::debug!(mount = %mount.display(), status = %status, "fusermount reported failure");
        }
        Err(e) => {
            tracing::debug!(mount = %mount.display(), error = %e, "fusermount unavailable");
        }
    }
}

//! Per-scenario state.
//!
//! A [`ScenarioContext`] owns everything one scenario creates: scratch
//! directories, generated file records, stage processes and background
//! senders. It is passed by `&mut` into every harness call and torn down
//! when the scenario ends, whatever the outcome.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::config::HarnessConfig;
use crate::error::{HarnessError, Result};
use crate::fault::FaultConfig;
use crate::logconfig::StageLogConfig;
use crate::orchestrator;
use crate::process::ProcessHandle;
use crate::types::{ScenarioId, Stage};
use crate::verify::FileRecord;

/// Throughput-related knobs forwarded to the bridges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PerfKnobs {
    /// UDP MTU; also sets the repair block size to twice this value.
    pub mtu: Option<u32>,
    /// Encoding block size.
    pub block_size: Option<u32>,
    /// Send bridge worker threads.
    pub sender_threads: u32,
    /// Send bridge bandwidth cap in bits per second.
    pub send_bandwidth_bps: Option<u64>,
    /// Niceness applied to both bridges once they are up. Negative values
    /// need root; a refused change is logged and the stage keeps running.
    pub bridge_nice: Option<i32>,
}

impl Default for PerfKnobs {
    fn default() -> Self {
        Self {
            mtu: None,
            block_size: None,
            sender_threads: 1,
            send_bandwidth_bps: None,
            bridge_nice: None,
        }
    }
}

struct ScratchDirs {
    send: TempDir,
    receive: TempDir,
    log: TempDir,
    rate_limited: Option<TempDir>,
}

/// Mutable state of one scenario run.
pub struct ScenarioContext {
    id: ScenarioId,
    config: HarnessConfig,
    send_dir: PathBuf,
    receive_dir: PathBuf,
    log_dir: PathBuf,
    rate_limited_dir: Option<PathBuf>,
    dirs: Option<ScratchDirs>,
    files: BTreeMap<String, FileRecord>,
    stages: HashMap<Stage, ProcessHandle>,
    started: Vec<Stage>,
    senders: Vec<ProcessHandle>,
    log_configs: HashMap<Stage, PathBuf>,
    proxy_rate: Option<u64>,
    /// Network impairments applied when the pipeline starts.
    pub faults: FaultConfig,
    /// Bridge performance knobs applied when the pipeline starts.
    pub perf: PerfKnobs,
}

impl std::fmt::Debug for ScenarioContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScenarioContext")
            .field("id", &self.id)
            .field("send_dir", &self.send_dir)
            .field("receive_dir", &self.receive_dir)
            .field("files", &self.files.len())
            .field("started", &self.started)
            .field("senders", &self.senders.len())
            .field("faults", &self.faults)
            .field("perf", &self.perf)
            .finish_non_exhaustive()
    }
}

impl ScenarioContext {
    /// Creates a context with fresh scratch directories under the
    /// configured work root and writes the stage log configurations.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid or a directory or
    /// log configuration cannot be created.
    pub fn new(config: HarnessConfig) -> Result<Self> {
        config.validate()?;
        let id = ScenarioId::new();
        std::fs::create_dir_all(&config.work_root)?;

        let scratch = |role: &str| -> Result<TempDir> {
            Ok(tempfile::Builder::new()
                .prefix(&format!("diode-{}-{role}-", id.short()))
                .tempdir_in(&config.work_root)?)
        };
        let dirs = ScratchDirs {
            send: scratch("send")?,
            receive: scratch("receive")?,
            log: scratch("log")?,
            rate_limited: None,
        };

        let mut log_configs = HashMap::new();
        for stage in Stage::STARTUP_ORDER {
            if stage.supports_log_config() {
                let path = StageLogConfig::for_stage(stage, dirs.log.path(), config.log_level)
                    .write(stage, dirs.log.path())?;
                log_configs.insert(stage, path);
            }
        }

        tracing::info!(scenario = %id, send = %dirs.send.path().display(), receive = %dirs.receive.path().display(), "scenario context created");

        Ok(Self {
            id,
            send_dir: dirs.send.path().to_path_buf(),
            receive_dir: dirs.receive.path().to_path_buf(),
            log_dir: dirs.log.path().to_path_buf(),
            rate_limited_dir: None,
            dirs: Some(dirs),
            config,
            files: BTreeMap::new(),
            stages: HashMap::new(),
            started: Vec::new(),
            senders: Vec::new(),
            log_configs,
            proxy_rate: None,
            faults: FaultConfig::default(),
            perf: PerfKnobs::default(),
        })
    }

    /// Scenario identifier.
    #[must_use]
    pub const fn id(&self) -> ScenarioId {
        self.id
    }

    /// Harness configuration.
    #[must_use]
    pub const fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Directory test files are generated in.
    #[must_use]
    pub fn send_dir(&self) -> &Path {
        &self.send_dir
    }

    /// Directory the file receiver writes into.
    #[must_use]
    pub fn receive_dir(&self) -> &Path {
        &self.receive_dir
    }

    /// Directory holding stage logs and their configurations.
    #[must_use]
    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Mountpoint of the storage proxy, once created.
    #[must_use]
    pub fn rate_limited_dir(&self) -> Option<&Path> {
        self.rate_limited_dir.as_deref()
    }

    /// Creates the storage proxy mountpoint if needed and returns it.
    ///
    /// # Errors
    /// Returns an error if the directory cannot be created or the context
    /// was already torn down.
    pub fn ensure_rate_limited_dir(&mut self) -> Result<PathBuf> {
        if let Some(dir) = &self.rate_limited_dir {
            return Ok(dir.clone());
        }
        let dirs = self
            .dirs
            .as_mut()
            .ok_or_else(|| HarnessError::config("scenario context already torn down"))?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("diode-{}-rate-limited-", self.id.short()))
            .tempdir_in(&self.config.work_root)?;
        let path = dir.path().to_path_buf();
        dirs.rate_limited = Some(dir);
        self.rate_limited_dir = Some(path.clone());
        Ok(path)
    }

    /// Directory file senders read from: the proxy mountpoint while the
    /// proxy is tracked, otherwise the send directory.
    #[must_use]
    pub fn source_dir(&self) -> &Path {
        match &self.rate_limited_dir {
            Some(dir) if self.stages.contains_key(&Stage::StorageProxy) => dir,
            _ => &self.send_dir,
        }
    }

    /// Read rate of the storage proxy in bytes per second.
    #[must_use]
    pub const fn proxy_rate(&self) -> Option<u64> {
        self.proxy_rate
    }

    /// Sets the read rate used the next time the storage proxy starts.
    pub fn set_proxy_rate(&mut self, bytes_per_sec: u64) {
        self.proxy_rate = Some(bytes_per_sec);
    }

    /// Path of the log configuration written for `stage`.
    #[must_use]
    pub fn log_config_path(&self, stage: Stage) -> Option<&Path> {
        self.log_configs.get(&stage).map(PathBuf::as_path)
    }

    /// Registered files, ordered by name.
    #[must_use]
    pub const fn files(&self) -> &BTreeMap<String, FileRecord> {
        &self.files
    }

    /// Looks up a registered file.
    ///
    /// # Errors
    /// Returns [`HarnessError::UnknownFile`] if `name` is not registered.
    pub fn file(&self, name: &str) -> Result<&FileRecord> {
        self.files
            .get(name)
            .ok_or_else(|| HarnessError::UnknownFile(name.to_string()))
    }

    /// Registers a generated file, replacing any record with the same name.
    pub fn register_file(&mut self, record: FileRecord) {
        self.files.insert(record.name.clone(), record);
    }

    /// Removes a file from the registry.
    pub fn take_file(&mut self, name: &str) -> Option<FileRecord> {
        self.files.remove(name)
    }

    /// Handle tracked for `stage`.
    #[must_use]
    pub fn handle(&self, stage: Stage) -> Option<&ProcessHandle> {
        self.stages.get(&stage)
    }

    /// Mutable handle tracked for `stage`.
    pub fn handle_mut(&mut self, stage: Stage) -> Option<&mut ProcessHandle> {
        self.stages.get_mut(&stage)
    }

    /// Tracks `handle` as the process for `stage`, returning the previous one.
    pub fn insert_handle(&mut self, stage: Stage, handle: ProcessHandle) -> Option<ProcessHandle> {
        if !self.started.contains(&stage) {
            self.started.push(stage);
        }
        self.stages.insert(stage, handle)
    }

    /// Stages in the order they were first started.
    #[must_use]
    pub fn started(&self) -> &[Stage] {
        &self.started
    }

    /// Tracks a background file sender for teardown.
    pub fn add_sender(&mut self, handle: ProcessHandle) {
        self.senders.push(handle);
    }

    /// Background file senders.
    pub fn senders_mut(&mut self) -> &mut [ProcessHandle] {
        &mut self.senders
    }

    /// Returns true once [`Self::teardown`] has run.
    #[must_use]
    pub const fn is_torn_down(&self) -> bool {
        self.dirs.is_none()
    }

    /// Ends the scenario: kills every process, waits the teardown settle
    /// interval, then deletes the scratch directories.
    ///
    /// Every step runs even if an earlier one failed. Failures are logged
    /// and swallowed. Calling this twice is a no-op.
    pub async fn teardown(&mut self) {
        let Some(dirs) = self.dirs.take() else {
            return;
        };

        orchestrator::stop_all(self).await;
        tokio::time::sleep(self.config.timings.teardown_settle).await;

        let ScratchDirs {
            send,
            receive,
            log,
            rate_limited,
        } = dirs;
        for dir in [Some(send), Some(receive), Some(log), rate_limited].into_iter().flatten() {
            let path = dir.path().to_path_buf();
            if let Err(e) = dir.close() {
                let err = HarnessError::teardown(format!("removing {}: {e}", path.display()));
                tracing::warn!(scenario = %self.id, error = %err, "teardown step failed");
            }
        }

        self.files.clear();
        tracing::info!(scenario = %self.id, "scenario torn down");
    }
}

impl Drop for ScenarioContext {
    fn drop(&mut self) {
        if self.dirs.is_none() {
            return;
        }
        tracing::warn!(scenario = %self.id, "scenario context dropped without teardown");
        for handle in self.senders.iter_mut().chain(self.stages.values_mut()) {
            handle.start_kill();
        }
        if let Some(mount) = &self.rate_limited_dir {
            orchestrator::lazy_unmount_blocking(mount);
        }
        // Remaining TempDirs delete themselves on drop.
    }
}

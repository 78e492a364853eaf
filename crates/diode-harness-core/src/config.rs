//! Harness configuration.
//!
//! Every address, binary location, settle interval and deadline the harness
//! uses lives here, with defaults matching a single-host loopback pipeline.
//! Configuration is validated at load time.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{HarnessError, Result};
use crate::logconfig::LogLevel;
use crate::types::Stage;

/// Top-level harness configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarnessConfig {
    /// Directory holding the stage executables.
    #[serde(default = "default_bin_dir")]
    pub bin_dir: PathBuf,

    /// Parent directory for per-scenario scratch directories.
    #[serde(default = "default_work_root")]
    pub work_root: PathBuf,

    /// Severity written into each stage's log configuration.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Discard stage stdout/stderr instead of capturing it.
    #[serde(default)]
    pub quiet: bool,

    /// Socket addresses of every hop.
    #[serde(default)]
    pub addresses: AddressPlan,

    /// Settle intervals, cool-downs and deadlines.
    #[serde(default)]
    pub timings: Timings,

    /// File sender parameters.
    #[serde(default)]
    pub workload: WorkloadConfig,
}

fn default_bin_dir() -> PathBuf {
    PathBuf::from("./target/release")
}

fn default_work_root() -> PathBuf {
    let shm = PathBuf::from("/dev/shm");
    if shm.is_dir() {
        shm
    } else {
        std::env::temp_dir()
    }
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            bin_dir: default_bin_dir(),
            work_root: default_work_root(),
            log_level: LogLevel::default(),
            quiet: false,
            addresses: AddressPlan::default(),
            timings: Timings::default(),
            workload: WorkloadConfig::default(),
        }
    }
}

impl HarnessConfig {
    /// Creates a configuration looking for executables in `bin_dir`.
    #[must_use]
    pub fn new(bin_dir: impl Into<PathBuf>) -> Self {
        Self {
            bin_dir: bin_dir.into(),
            ..Self::default()
        }
    }

    /// Path of the executable for `stage`.
    #[must_use]
    pub fn stage_binary(&self, stage: Stage) -> PathBuf {
        self.bin_dir.join(stage.binary_name())
    }

    /// Path of the one-shot file sender executable.
    #[must_use]
    pub fn sender_binary(&self) -> PathBuf {
        self.bin_dir.join(SENDER_BINARY)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        if self.bin_dir.as_os_str().is_empty() {
            return Err(HarnessError::config("bin_dir cannot be empty"));
        }
        if self.work_root.as_os_str().is_empty() {
            return Err(HarnessError::config("work_root cannot be empty"));
        }
        self.timings.validate()?;
        self.workload.validate()?;
        Ok(())
    }

    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| HarnessError::config(format!("failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| HarnessError::config(format!("failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }
}

/// Name of the file sender executable.
pub const SENDER_BINARY: &str = "diode-send-file";

/// Loopback addresses of every hop.
///
/// The send bridge always targets `send_bridge_udp_target`. Without a fault
/// injector, the receive bridge binds that port directly; with one, the
/// injector takes it over and relays to `injector_target`, which the receive
/// bridge binds instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddressPlan {
    /// TCP address the send bridge listens on for file senders.
    #[serde(default = "default_send_bridge_tcp")]
    pub send_bridge_tcp: SocketAddr,
    /// UDP address the send bridge emits to.
    #[serde(default = "default_send_bridge_udp_target")]
    pub send_bridge_udp_target: SocketAddr,
    /// UDP address the receive bridge binds when no injector is present.
    #[serde(default = "default_receive_bridge_udp")]
    pub receive_bridge_udp: SocketAddr,
    /// UDP address the injector binds.
    #[serde(default = "default_injector_bind")]
    pub injector_bind: SocketAddr,
    /// UDP address the injector forwards to.
    #[serde(default = "default_injector_target")]
    pub injector_target: SocketAddr,
    /// UDP address the receive bridge binds behind an injector.
    #[serde(default = "default_receive_bridge_udp_behind_injector")]
    pub receive_bridge_udp_behind_injector: SocketAddr,
    /// TCP address of the file receiver.
    #[serde(default = "default_file_receiver_tcp")]
    pub file_receiver_tcp: SocketAddr,
}

fn default_send_bridge_tcp() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 5000))
}

fn default_send_bridge_udp_target() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 5000))
}

fn default_receive_bridge_udp() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 5000))
}

fn default_injector_bind() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 5000))
}

fn default_injector_target() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 6000))
}

fn default_receive_bridge_udp_behind_injector() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 6000))
}

fn default_file_receiver_tcp() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 7000))
}

impl Default for AddressPlan {
    fn default() -> Self {
        Self {
            send_bridge_tcp: default_send_bridge_tcp(),
            send_bridge_udp_target: default_send_bridge_udp_target(),
            receive_bridge_udp: default_receive_bridge_udp(),
            injector_bind: default_injector_bind(),
            injector_target: default_injector_target(),
            receive_bridge_udp_behind_injector: default_receive_bridge_udp_behind_injector(),
            file_receiver_tcp: default_file_receiver_tcp(),
        }
    }
}

/// Settle intervals, cool-downs and deadlines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Timings {
    /// Wait after starting the storage proxy before probing it.
    #[serde(default = "default_one_second", with = "humantime_serde")]
    pub proxy_settle: Duration,

    /// Wait after starting the fault injector before probing it.
    #[serde(default = "default_one_second", with = "humantime_serde")]
    pub injector_settle: Duration,

    /// Wait after starting the file receiver before probing it.
    #[serde(default = "default_one_second", with = "humantime_serde")]
    pub file_receiver_settle: Duration,

    /// Wait after starting the receive bridge before probing it.
    #[serde(default = "default_receive_bridge_settle", with = "humantime_serde")]
    pub receive_bridge_settle: Duration,

    /// Wait after starting the send bridge before probing it.
    #[serde(default = "default_send_bridge_settle", with = "humantime_serde")]
    pub send_bridge_settle: Duration,

    /// Grace period between SIGTERM and SIGKILL when stopping a stage.
    #[serde(default = "default_stop_grace", with = "humantime_serde")]
    pub stop_grace: Duration,

    /// Pause between stopping and restarting a stage so the OS releases its address.
    #[serde(default = "default_restart_cooldown", with = "humantime_serde")]
    pub restart_cooldown: Duration,

    /// Pause between killing processes and deleting directories at teardown.
    #[serde(default = "default_one_second", with = "humantime_serde")]
    pub teardown_settle: Duration,

    /// Verifier poll interval.
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,

    /// Deadline for a foreground file sender to exit.
    #[serde(default = "default_sender_timeout", with = "humantime_serde")]
    pub sender_timeout: Duration,
}

fn default_one_second() -> Duration {
    Duration::from_secs(1)
}

fn default_receive_bridge_settle() -> Duration {
    Duration::from_secs(2)
}

fn default_send_bridge_settle() -> Duration {
    Duration::from_millis(500)
}

fn default_stop_grace() -> Duration {
    Duration::from_secs(2)
}

fn default_restart_cooldown() -> Duration {
    Duration::from_secs(5)
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(1)
}

fn default_sender_timeout() -> Duration {
    Duration::from_secs(60)
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            proxy_settle: default_one_second(),
            injector_settle: default_one_second(),
            file_receiver_settle: default_one_second(),
            receive_bridge_settle: default_receive_bridge_settle(),
            send_bridge_settle: default_send_bridge_settle(),
            stop_grace: default_stop_grace(),
            restart_cooldown: default_restart_cooldown(),
            teardown_settle: default_one_second(),
            poll_interval: default_poll_interval(),
            sender_timeout: default_sender_timeout(),
        }
    }
}

impl Timings {
    /// Uniformly short timings for tests against fake stages.
    #[must_use]
    pub fn quick() -> Self {
        let short = Duration::from_millis(50);
        Self {
            proxy_settle: short,
            injector_settle: short,
            file_receiver_settle: short,
            receive_bridge_settle: short,
            send_bridge_settle: short,
            stop_grace: Duration::from_millis(500),
            restart_cooldown: short,
            teardown_settle: short,
            poll_interval: Duration::from_millis(5),
            sender_timeout: Duration::from_secs(10),
        }
    }

    /// Settle interval applied after starting `stage`.
    #[must_use]
    pub const fn settle(&self, stage: Stage) -> Duration {
        match stage {
            Stage::StorageProxy => self.proxy_settle,
            Stage::FaultInjector => self.injector_settle,
            Stage::FileReceiver => self.file_receiver_settle,
            Stage::ReceiveBridge => self.receive_bridge_settle,
            Stage::SendBridge => self.send_bridge_settle,
        }
    }

    /// Validates the timings.
    ///
    /// # Errors
    /// Returns an error if a polling interval is zero.
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(HarnessError::config("poll_interval must be greater than 0"));
        }
        if self.sender_timeout.is_zero() {
            return Err(HarnessError::config("sender_timeout must be greater than 0"));
        }
        Ok(())
    }
}

/// File sender parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadConfig {
    /// `--buffer-size` passed to the sender; small values limit bursts.
    #[serde(default = "default_sender_buffer_size")]
    pub sender_buffer_size: usize,

    /// `--session-expiration-delay` (seconds) passed to the receive bridge.
    #[serde(default = "default_session_expiration_delay")]
    pub session_expiration_delay: u32,
}

fn default_sender_buffer_size() -> usize {
    8192
}

fn default_session_expiration_delay() -> u32 {
    1
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            sender_buffer_size: default_sender_buffer_size(),
            session_expiration_delay: default_session_expiration_delay(),
        }
    }
}

impl WorkloadConfig {
    /// Validates the workload parameters.
    ///
    /// # Errors
    /// Returns an error if the sender buffer is empty.
    pub fn validate(&self) -> Result<()> {
        if self.sender_buffer_size == 0 {
            return Err(HarnessError::config(
                "sender_buffer_size must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// Serde helper for humantime durations.
mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    /// Serializes a duration as a human-readable string.
    ///
    /// # Errors
    /// Returns an error if serialization fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    /// Deserializes a duration from a human-readable string.
    ///
    /// # Errors
    /// Returns an error if the string cannot be parsed.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_new() {
        let config = HarnessConfig::new("/opt/diode/bin");
        assert_eq!(config.bin_dir, PathBuf::from("/opt/diode/bin"));
        assert_eq!(
            config.stage_binary(Stage::SendBridge),
            PathBuf::from("/opt/diode/bin/diode-send")
        );
        assert_eq!(
            config.sender_binary(),
            PathBuf::from("/opt/diode/bin/diode-send-file")
        );
    }

    #[test]
    fn test_default_addresses() {
        let plan = AddressPlan::default();
        assert_eq!(plan.send_bridge_tcp.port(), 5000);
        assert_eq!(plan.injector_bind.port(), plan.send_bridge_udp_target.port());
        assert_eq!(plan.injector_target.port(), 6000);
        assert_eq!(plan.receive_bridge_udp_behind_injector.port(), 6000);
        assert_eq!(plan.file_receiver_tcp.port(), 7000);
    }

    #[test]
    fn test_default_timings() {
        let t = Timings::default();
        assert_eq!(t.settle(Stage::ReceiveBridge), Duration::from_secs(2));
        assert_eq!(t.settle(Stage::SendBridge), Duration::from_millis(500));
        assert_eq!(t.settle(Stage::FileReceiver), Duration::from_secs(1));
        assert_eq!(t.restart_cooldown, Duration::from_secs(5));
        assert_eq!(t.poll_interval, Duration::from_millis(1));
        assert_eq!(t.sender_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_quick_timings_are_valid() {
        assert!(Timings::quick().validate().is_ok());
    }

    #[test]
    fn test_validate_zero_poll_interval() {
        let mut config = HarnessConfig::default();
        config.timings.poll_interval = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_empty_bin_dir() {
        let config = HarnessConfig::new("");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_zero_buffer() {
        let mut config = HarnessConfig::default();
        config.workload.sender_buffer_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_serialize_roundtrip() {
        let config = HarnessConfig::new("/bin");
        let text = toml::to_string(&config).unwrap();
        let back: HarnessConfig = toml::from_str(&text).unwrap();
        assert_eq!(back.bin_dir, config.bin_dir);
        assert_eq!(back.timings.restart_cooldown, config.timings.restart_cooldown);
        assert_eq!(back.addresses.injector_target, config.addresses.injector_target);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: HarnessConfig = toml::from_str(
            r#"
bin_dir = "/usr/local/bin"
quiet = true

[timings]
restart_cooldown = "250ms"
"#,
        )
        .unwrap();
        assert!(config.quiet);
        assert_eq!(config.timings.restart_cooldown, Duration::from_millis(250));
        assert_eq!(config.timings.send_bridge_settle, Duration::from_millis(500));
        assert_eq!(config.workload.sender_buffer_size, 8192);
    }

    #[test]
    fn test_load_missing_file() {
        let err = HarnessConfig::load("/nonexistent/harness.toml").unwrap_err();
        assert!(err.to_string().contains("failed to read config"));
    }
}

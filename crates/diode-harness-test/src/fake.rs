//! Fake pipeline executables for exercising the harness without a diode.
//!
//! [`FakeDiode`] writes one shell script per stage into a temporary binary
//! directory. Every script logs its arguments to `<binary>.args` and its
//! name to `order.log`, then idles until killed. The fake file receiver
//! records its receive directory, and the fake file sender copies its
//! arguments there, so transfers complete instantly and intact.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use diode_harness_core::{HarnessConfig, SENDER_BINARY, Stage, Timings};
use tempfile::TempDir;

const PRELUDE: &str = r#"#!/bin/sh
here=$(dirname "$0")
name=$(basename "$0")
echo "$*" >> "$here/$name.args"
echo "$name" >> "$here/order.log"
"#;

const IDLE: &str = "exec sleep 600\n";

const FILE_RECEIVER: &str = r#"echo "$3" > "$here/.sink"
exec sleep 600
"#;

// Replaces the mountpoint with a link to the source so reads pass through.
const STORAGE_PROXY: &str = r#"rmdir "$1" && ln -s "$2" "$1"
exec sleep 600
"#;

const SENDER_COPY: &str = r#"sink=$(cat "$here/.sink")
shift 4
cp "$@" "$sink/"
"#;

const SENDER_CORRUPT: &str = r#"sink=$(cat "$here/.sink")
shift 4
for f in "$@"; do
    head -c "$(wc -c < "$f")" /dev/zero > "$sink/$(basename "$f")"
done
"#;

const SENDER_TRUNCATE: &str = r#"sink=$(cat "$here/.sink")
shift 4
for f in "$@"; do
    head -c "$(( $(wc -c < "$f") / 2 ))" "$f" > "$sink/$(basename "$f")"
done
"#;

/// A directory of fake stage executables.
#[derive(Debug)]
pub struct FakeDiode {
    dir: TempDir,
}

impl FakeDiode {
    /// Writes a well-behaved fake for every stage and the file sender.
    ///
    /// # Errors
    /// Returns an error if the scripts cannot be written.
    pub fn new() -> io::Result<Self> {
        let fake = Self {
            dir: tempfile::Builder::new().prefix("fake-diode-").tempdir()?,
        };
        for stage in Stage::STARTUP_ORDER {
            let body = match stage {
                Stage::StorageProxy => STORAGE_PROXY,
                Stage::FileReceiver => FILE_RECEIVER,
                Stage::FaultInjector | Stage::ReceiveBridge | Stage::SendBridge => IDLE,
            };
            fake.script(stage.binary_name(), body)?;
        }
        fake.script(SENDER_BINARY, SENDER_COPY)?;
        Ok(fake)
    }

    /// Directory holding the scripts.
    #[must_use]
    pub fn bin_dir(&self) -> &Path {
        self.dir.path()
    }

    /// Harness configuration pointing at the fakes, with short timings and
    /// scratch space under `work_root`.
    #[must_use]
    pub fn config(&self, work_root: &Path) -> HarnessConfig {
        HarnessConfig {
            work_root: work_root.to_path_buf(),
            timings: Timings::quick(),
            ..HarnessConfig::new(self.bin_dir())
        }
    }

    /// Replaces the script for `binary` with `body`, run after the logging
    /// prelude.
    ///
    /// # Errors
    /// Returns an error if the script cannot be written.
    pub fn script(&self, binary: &str, body: &str) -> io::Result<PathBuf> {
        use std::os::unix::fs::PermissionsExt;

        let path = self.bin_dir().join(binary);
        fs::write(&path, format!("{PRELUDE}{body}"))?;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755))?;
        Ok(path)
    }

    /// Makes `stage` print `message` to stderr and exit with `code`.
    ///
    /// # Errors
    /// Returns an error if the script cannot be written.
    pub fn fail_on_start(&self, stage: Stage, code: i32, message: &str) -> io::Result<()> {
        self.script(
            stage.binary_name(),
            &format!("echo '{message}' >&2\nexit {code}\n"),
        )
        .map(drop)
    }

    /// Makes the file sender deliver same-size files full of zeros.
    ///
    /// # Errors
    /// Returns an error if the script cannot be written.
    pub fn corrupt_transfers(&self) -> io::Result<()> {
        self.script(SENDER_BINARY, SENDER_CORRUPT).map(drop)
    }

    /// Makes the file sender deliver the first half of every file and exit
    /// cleanly.
    ///
    /// # Errors
    /// Returns an error if the script cannot be written.
    pub fn truncate_transfers(&self) -> io::Result<()> {
        self.script(SENDER_BINARY, SENDER_TRUNCATE).map(drop)
    }

    /// Makes the file sender deliver nothing and exit cleanly.
    ///
    /// # Errors
    /// Returns an error if the script cannot be written.
    pub fn drop_transfers(&self) -> io::Result<()> {
        self.script(SENDER_BINARY, "exit 0\n").map(drop)
    }

    /// Makes the file sender hang until killed.
    ///
    /// # Errors
    /// Returns an error if the script cannot be written.
    pub fn hang_sender(&self) -> io::Result<()> {
        self.script(SENDER_BINARY, IDLE).map(drop)
    }

    /// Makes the file sender print `message` and exit with `code`.
    ///
    /// # Errors
    /// Returns an error if the script cannot be written.
    pub fn fail_sender(&self, code: i32, message: &str) -> io::Result<()> {
        self.script(SENDER_BINARY, &format!("echo '{message}' >&2\nexit {code}\n"))
            .map(drop)
    }

    /// Argument lines `binary` was invoked with, one per invocation.
    #[must_use]
    pub fn invocations(&self, binary: &str) -> Vec<String> {
        read_lines(&self.bin_dir().join(format!("{binary}.args")))
    }

    /// Binary names in the order they were started.
    #[must_use]
    pub fn start_order(&self) -> Vec<String> {
        read_lines(&self.bin_dir().join("order.log"))
    }
}

fn read_lines(path: &Path) -> Vec<String> {
    fs::read_to_string(path)
        .map(|s| s.lines().map(str::to_string).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripts_are_executable() {
        use std::os::unix::fs::PermissionsExt;

        let fake = FakeDiode::new().unwrap();
        for stage in Stage::STARTUP_ORDER {
            let meta = fs::metadata(fake.bin_dir().join(stage.binary_name())).unwrap();
            assert_eq!(meta.permissions().mode() & 0o777, 0o755);
        }
        assert!(fake.bin_dir().join(SENDER_BINARY).is_file());
    }

    #[test]
    fn test_config_points_at_fakes() {
        let fake = FakeDiode::new().unwrap();
        let root = tempfile::tempdir().unwrap();
        let config = fake.config(root.path());
        assert_eq!(config.bin_dir, fake.bin_dir());
        assert_eq!(config.timings.restart_cooldown, Timings::quick().restart_cooldown);
    }

    #[test]
    fn test_no_invocations_yet() {
        let fake = FakeDiode::new().unwrap();
        assert!(fake.invocations("diode-send").is_empty());
        assert!(fake.start_order().is_empty());
    }
}

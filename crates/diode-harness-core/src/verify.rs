//! Content-verified transfer polling.
//!
//! Files are fingerprinted before they are sent. After sending, the verifier
//! polls the receive directory until a file of the expected size appears,
//! fingerprints it once, and deletes it on a match.

use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::context::ScenarioContext;
use crate::error::{HarnessError, Result};

/// Block size used when streaming a file through the hasher.
pub const HASH_BLOCK: usize = 64 * 1024;

/// BLAKE3 digest of a file's content.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Fingerprint of an in-memory buffer.
    #[must_use]
    pub fn of_bytes(bytes: &[u8]) -> Self {
        Self(*blake3::hash(bytes).as_bytes())
    }

    /// Finalizes a running hasher.
    #[must_use]
    pub fn from_hasher(hasher: &blake3::Hasher) -> Self {
        Self(*hasher.finalize().as_bytes())
    }

    /// Raw digest bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({self})")
    }
}

/// Streams `path` through BLAKE3 in [`HASH_BLOCK`] chunks.
///
/// Blocking; call from `spawn_blocking` in async code.
///
/// # Errors
/// Returns an error if the file cannot be read.
pub fn fingerprint_file(path: &Path) -> std::io::Result<Fingerprint> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = blake3::Hasher::new();
    let mut block = vec![0u8; HASH_BLOCK];
    loop {
        let n = file.read(&mut block)?;
        if n == 0 {
            break;
        }
        hasher.update(&block[..n]);
    }
    Ok(Fingerprint::from_hasher(&hasher))
}

/// A generated test file awaiting delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    /// Name relative to the send and receive directories.
    pub name: String,
    /// Size in bytes.
    pub size: u64,
    /// Content fingerprint taken before sending.
    pub fingerprint: Fingerprint,
    /// Where the file was generated.
    pub source: PathBuf,
}

impl FileRecord {
    /// Fingerprints an existing file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read.
    pub async fn from_path(name: impl Into<String>, path: impl Into<PathBuf>) -> Result<Self> {
        let source = path.into();
        let hashed = source.clone();
        let (size, fingerprint) = tokio::task::spawn_blocking(move || {
            let size = std::fs::metadata(&hashed)?.len();
            fingerprint_file(&hashed).map(|fp| (size, fp))
        })
        .await
        .map_err(std::io::Error::other)??;

        Ok(Self {
            name: name.into(),
            size,
            fingerprint,
            source,
        })
    }
}

/// Polls a destination directory for one file.
#[derive(Debug, Clone, Copy)]
pub struct TransferVerifier {
    poll_interval: Duration,
    deadline: Duration,
}

impl TransferVerifier {
    /// Creates a verifier.
    #[must_use]
    pub const fn new(poll_interval: Duration, deadline: Duration) -> Self {
        Self {
            poll_interval,
            deadline,
        }
    }

    /// Waits for `record` to arrive intact in `receive_dir`.
    ///
    /// An absent, short or oversized destination keeps polling; only a file
    /// of exactly the expected size is fingerprinted. On a match the
    /// destination is deleted and the elapsed time returned.
    ///
    /// # Errors
    /// [`HarnessError::VerificationMismatch`] on differing content,
    /// [`HarnessError::TransferTimeout`] once the deadline passes.
    pub async fn verify(&self, record: &FileRecord, receive_dir: &Path) -> Result<Duration> {
        let dest = receive_dir.join(&record.name);
        let start = Instant::now();

        loop {
            if let Ok(meta) = tokio::fs::metadata(&dest).await {
                if meta.len() == record.size {
                    let hashed = dest.clone();
                    let actual = tokio::task::spawn_blocking(move || fingerprint_file(&hashed))
                        .await
                        .map_err(std::io::Error::other)??;

                    if actual != record.fingerprint {
                        tracing::warn!(file = %record.name, expected = %record.fingerprint, actual = %actual, "content mismatch");
                        return Err(HarnessError::VerificationMismatch {
                            file: record.name.clone(),
                            expected: record.fingerprint,
                            actual,
                        });
                    }

                    tokio::fs::remove_file(&dest).await?;
                    let elapsed = start.elapsed();
                    tracing::info!(file = %record.name, elapsed = ?elapsed, "file received");
                    return Ok(elapsed);
                }
            }

            let elapsed = start.elapsed();
            if elapsed >= self.deadline {
                tracing::warn!(file = %record.name, elapsed = ?elapsed, "file not received");
                return Err(HarnessError::TransferTimeout {
                    file: record.name.clone(),
                    elapsed,
                });
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

/// Verifies one registered file and drops it from the registry.
///
/// # Errors
/// [`HarnessError::UnknownFile`] if `name` was never generated, otherwise
/// the errors of [`TransferVerifier::verify`].
pub async fn receive_file(ctx: &mut ScenarioContext, name: &str, deadline: Duration) -> Result<Duration> {
    let record = ctx.file(name)?.clone();
    let verifier = TransferVerifier::new(ctx.config().timings.poll_interval, deadline);
    let elapsed = verifier.verify(&record, ctx.receive_dir()).await?;
    ctx.take_file(name);
    Ok(elapsed)
}

/// Verifies every registered file in name order, each with its own deadline.
///
/// # Errors
/// Stops at the first file that fails to verify.
pub async fn receive_all_files(ctx: &mut ScenarioContext, deadline: Duration) -> Result<Vec<(String, Duration)>> {
    let names: Vec<String> = ctx.files().keys().cloned().collect();
    let mut results = Vec::with_capacity(names.len());
    for name in names {
        let elapsed = receive_file(ctx, &name, deadline).await?;
        results.push((name, elapsed));
    }
    Ok(results)
}

/// Fails if a pending file left a copy of the wrong size in the receive
/// directory. A file that never arrived is not a leftover.
///
/// # Errors
/// [`HarnessError::Assertion`] naming the first truncated or oversized copy.
pub async fn assert_no_partial_files(ctx: &ScenarioContext) -> Result<()> {
    for record in ctx.files().values() {
        let dest = ctx.receive_dir().join(&record.name);
        let Ok(meta) = tokio::fs::metadata(&dest).await else {
            continue;
        };
        if meta.len() != record.size {
            tracing::error!(file = %record.name, expected = record.size, actual = meta.len(), "partial file left behind");
            return Err(HarnessError::assertion(format!(
                "partial file {} left in receive directory: {} of {} bytes",
                record.name,
                meta.len(),
                record.size
            )));
        }
    }
    Ok(())
}

/// Like [`receive_file`], but a file that never arrives is accepted as long
/// as nothing partial was left behind. Either way the record is dropped.
///
/// Returns the elapsed time on delivery and `None` on a clean timeout.
///
/// # Errors
/// [`HarnessError::VerificationMismatch`] on corrupt delivery,
/// [`HarnessError::Assertion`] if a partial copy remains after the deadline.
pub async fn receive_file_or_timeout(
    ctx: &mut ScenarioContext,
    name: &str,
    deadline: Duration,
) -> Result<Option<Duration>> {
    match receive_file(ctx, name, deadline).await {
        Ok(elapsed) => Ok(Some(elapsed)),
        Err(HarnessError::TransferTimeout { file, elapsed }) => {
            assert_no_partial_files(ctx).await?;
            ctx.take_file(&file);
            tracing::info!(file = %file, elapsed = ?elapsed, "file not delivered, nothing left behind");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

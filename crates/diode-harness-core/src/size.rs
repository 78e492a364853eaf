//! Size expressions such as `10MB` or `512KiB`.
//!
//! Decimal units (`KB`, `MB`, `GB`) are powers of 1000, binary units
//! (`KiB`, `MiB`, `GiB`) powers of 1024. The same type expresses file sizes
//! and outage thresholds, so both always mean bytes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::HarnessError;

const UNITS: [(&str, u64); 7] = [
    ("GiB", 1 << 30),
    ("MiB", 1 << 20),
    ("KiB", 1 << 10),
    ("GB", 1_000_000_000),
    ("MB", 1_000_000),
    ("KB", 1_000),
    ("B", 1),
];

/// A byte count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ByteSize(u64);

impl ByteSize {
    /// Exact number of bytes.
    #[must_use]
    pub const fn bytes(n: u64) -> Self {
        Self(n)
    }

    /// `n` × 1000 bytes.
    #[must_use]
    pub const fn kb(n: u64) -> Self {
        Self(n * 1_000)
    }

    /// `n` × 1 000 000 bytes.
    #[must_use]
    pub const fn mb(n: u64) -> Self {
        Self(n * 1_000_000)
    }

    /// `n` × 1024 × 1024 bytes.
    #[must_use]
    pub const fn mib(n: u64) -> Self {
        Self(n << 20)
    }

    /// Number of bytes.
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl FromStr for ByteSize {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (count, multiplier) = UNITS
            .iter()
            .find_map(|(suffix, mult)| s.strip_suffix(suffix).map(|c| (c, *mult)))
            .unwrap_or((s, 1));

        let count: u64 = count
            .trim()
            .parse()
            .map_err(|_| HarnessError::config(format!("invalid size expression: {s:?}")))?;

        count
            .checked_mul(multiplier)
            .map(Self)
            .ok_or_else(|| HarnessError::config(format!("size expression overflows: {s:?}")))
    }
}

impl TryFrom<String> for ByteSize {
    type Error = HarnessError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ByteSize> for String {
    fn from(value: ByteSize) -> Self {
        value.to_string()
    }
}

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 0 {
            return f.write_str("0B");
        }
        for (suffix, mult) in UNITS {
            if self.0 % mult == 0 {
                return write!(f, "{}{suffix}", self.0 / mult);
            }
        }
        write!(f, "{}B", self.0)
    }
}

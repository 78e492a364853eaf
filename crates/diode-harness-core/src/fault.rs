//! Network fault injection.
//!
//! The impairment itself is performed by an external UDP relay sitting
//! between the two bridges. This module only decides whether that relay is
//! needed and translates scenario parameters into its command line.
//!
//! Outage thresholds are byte counts of forwarded traffic, never elapsed
//! time.

use serde::{Deserialize, Serialize};

use crate::config::AddressPlan;
use crate::error::{HarnessError, Result};
use crate::size::ByteSize;

/// Impairments applied between the send and receive bridges.
///
/// Every field is optional and the impairments combine. When all fields are
/// `None` no relay is started and the bridges talk directly.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultConfig {
    /// Link goes down once this much traffic has been forwarded.
    #[serde(default)]
    pub down_after: Option<ByteSize>,
    /// Link comes back once this much traffic has been seen.
    #[serde(default)]
    pub up_after: Option<ByteSize>,
    /// Sustained bandwidth cap in bits per second.
    #[serde(default)]
    pub max_bandwidth_bps: Option<u64>,
    /// Uniform packet loss percentage, 1 to 100. Zero is rejected: the relay
    /// derives its drop interval from it. Leave the field `None` for no loss.
    #[serde(default)]
    pub loss_percent: Option<u8>,
}

impl FaultConfig {
    /// A scheduled outage: down after `down_after`, up again after `up_after`.
    #[must_use]
    pub fn interrupt(down_after: ByteSize, up_after: ByteSize) -> Self {
        Self {
            down_after: Some(down_after),
            up_after: Some(up_after),
            ..Default::default()
        }
    }

    /// Uniform random packet loss.
    #[must_use]
    pub fn loss(percent: u8) -> Self {
        Self {
            loss_percent: Some(percent),
            ..Default::default()
        }
    }

    /// Bandwidth cap in bits per second.
    #[must_use]
    pub fn bandwidth(bps: u64) -> Self {
        Self {
            max_bandwidth_bps: Some(bps),
            ..Default::default()
        }
    }

    /// Returns true if no impairment is configured.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.down_after.is_none()
            && self.up_after.is_none()
            && self.max_bandwidth_bps.is_none()
            && self.loss_percent.is_none()
    }

    /// Merges `other` into `self`; fields set in `other` win.
    pub fn merge(&mut self, other: &Self) {
        if other.down_after.is_some() {
            self.down_after = other.down_after;
        }
        if other.up_after.is_some() {
            self.up_after = other.up_after;
        }
        if other.max_bandwidth_bps.is_some() {
            self.max_bandwidth_bps = other.max_bandwidth_bps;
        }
        if other.loss_percent.is_some() {
            self.loss_percent = other.loss_percent;
        }
    }

    /// Validates the impairment combination.
    ///
    /// # Errors
    /// Returns an error if a parameter is out of range or the outage window
    /// is inconsistent. Loss must be within 1..=100 and bandwidth above 0.
    pub fn validate(&self) -> Result<()> {
        if let Some(loss) = self.loss_percent {
            if !(1..=100).contains(&loss) {
                return Err(HarnessError::config(format!(
                    "loss_percent must be within 1..=100, got {loss}"
                )));
            }
        }
        if self.max_bandwidth_bps == Some(0) {
            return Err(HarnessError::config("max_bandwidth_bps must be greater than 0"));
        }
        match (self.down_after, self.up_after) {
            (None, Some(_)) => Err(HarnessError::config("up_after requires down_after")),
            (Some(down), Some(up)) if up <= down => Err(HarnessError::config(format!(
                "up_after ({up}) must be greater than down_after ({down})"
            ))),
            _ => Ok(()),
        }
    }

    /// Command-line arguments for the relay, or `None` if it is not needed.
    #[must_use]
    pub fn injector_args(&self, addresses: &AddressPlan) -> Option<Vec<String>> {
        if self.is_empty() {
            return None;
        }

        let mut args = vec![
            "--bind-udp".to_string(),
            addresses.injector_bind.to_string(),
            "--to-udp".to_string(),
            addresses.injector_target.to_string(),
        ];
        if let Some(down) = self.down_after {
            args.push("--network-down-after".into());
            args.push(down.as_u64().to_string());
        }
        if let Some(up) = self.up_after {
            args.push("--network-up-after".into());
            args.push(up.as_u64().to_string());
        }
        if let Some(loss) = self.loss_percent {
            args.push("--loss-rate".into());
            args.push(loss.to_string());
        }
        if let Some(bps) = self.max_bandwidth_bps {
            args.push("--max-bandwidth".into());
            args.push(bps.to_string());
        }
        Some(args)
    }
}

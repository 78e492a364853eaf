// Allow unwrap/expect in tests for clear failure messages
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

//! # diode-harness-throttle
//!
//! A read-only mirror of a directory whose file reads are paced to a fixed
//! byte rate. Diode tests mount it in front of the send directory so the
//! file sender sees slow storage.
//!
//! - [`RateLimiter`] computes and applies the per-read delay
//! - [`ThrottledFs`] serves the mirror over FUSE
//!
//! The `throttled-fs` binary mounts the mirror until SIGINT or SIGTERM.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod fs;
pub mod limiter;

pub use error::{Result, ThrottleError};
pub use fs::ThrottledFs;
pub use limiter::RateLimiter;

//! Process-level plumbing: the accepting dispatcher, the monitor that keeps
//! the worker pool alive, and the workers themselves.
//!
//! ```text
//!                 ┌──────────────┐  fork   ┌──────────────┐  fork   ┌──────────┐
//!   clients ───▶  │  dispatcher  │ ──────▶ │   monitor    │ ──────▶ │ worker N │
//!                 │ (poll loop)  │         │ (reap loop)  │         └──────────┘
//!                 └──────┬───────┘         └──────────────┘               ▲
//!                        │        fd + correlation (SOCK_SEQPACKET)       │
//!                        └────────────────────────────────────────────────┘
//! ```

use std::time::Duration;

use nix::poll::PollTimeout;

pub mod dispatcher;
pub mod lifeline;
pub mod listener;
pub mod slots;
pub mod supervisor;
pub mod worker;

/// Converts a duration to a `poll` timeout, saturating at the largest value
/// `poll` takes in milliseconds.
pub(crate) fn poll_timeout(d: Duration) -> PollTimeout {
    let ms = u16::try_from(d.as_millis()).unwrap_or(u16::MAX);
    PollTimeout::from(ms)
}

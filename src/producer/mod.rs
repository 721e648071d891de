//! Producer pipeline: confirmed publishing over a supervised channel pool.

use std::time::Duration;

mod pool;
mod publisher;
mod topology;

pub use pool::ProducerPool;
pub use publisher::Publisher;
pub use topology::Topology;

/// Delay before rebuilding the channel after a channel exception.
pub(crate) const REINIT_DELAY: Duration = Duration::from_secs(5);

/// Delay before resending a message the broker has not confirmed.
pub(crate) const RESEND_DELAY: Duration = Duration::from_secs(15);

/// Confirm-wait attempts per push before giving up.
pub(crate) const CONFIRM_RETRIES: u32 = 9;

/// Pre-send readiness waits per push before giving up.
pub(crate) const PUSH_RETRIES: u32 = 3;

/// Grace period for in-flight sends to drain during pool shutdown.
pub(crate) const CLOSE_GRACE: Duration = Duration::from_secs(3);

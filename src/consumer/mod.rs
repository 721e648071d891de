//! Consumer pipeline: a supervised, restartable delivery stream per channel.

use std::time::Duration;

mod channel;
mod pool;

pub use channel::ConsumerChannel;
pub use pool::ConsumerPool;

/// Delay before rebuilding the channel after a channel exception.
pub(crate) const REINIT_DELAY: Duration = Duration::from_secs(2);

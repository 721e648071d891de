use thiserror::Error;

/// Everything a caller of this crate can observe going wrong.
///
/// Connectivity and channel-protocol failures are absorbed by the reconnect
/// and re-init loops and never show up here directly; they only delay
/// readiness. What does surface is the definitive outcome of an operation.
#[derive(Debug, Error)]
pub enum Error {
    /// The broker address did not parse as an AMQP URI. This is a permanent
    /// misconfiguration, surfaced once at pool creation and never retried.
    #[error("invalid broker address {addr:?}: {reason}")]
    InvalidAddress { addr: String, reason: String },

    #[error("connection not ready")]
    ConnectionNotReady,

    #[error("channel not ready")]
    ChannelNotReady,

    /// No open channel became available within the pre-send retry budget,
    /// or the channel was lost while waiting for a confirm. Nothing is in
    /// flight; the caller decides whether to resubmit.
    #[error("publish unavailable: channel not ready")]
    PublishUnavailable,

    /// The message was sent (possibly several times) but the broker never
    /// confirmed it within the retry budget.
    #[error("no broker confirm after {retries} resend attempts")]
    PublishConfirmTimeout { retries: u32 },

    #[error("shutting down")]
    ShuttingDown,

    #[error("broker error: {0}")]
    Broker(#[from] lapin::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

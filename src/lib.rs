//! Resilient RabbitMQ connection/channel pools.
//!
//! One supervised connection per pool, N supervised channels fanned out over
//! it. Each channel supervisor recovers independently from channel-level
//! protocol errors and from connection loss; the connection supervisor
//! reconnects with a fixed backoff for its whole lifetime. The producer side
//! publishes with broker confirms and bounded retry; the consumer side
//! exposes a restartable delivery stream with prefetch-based backpressure.
//!
//! ```no_run
//! use rabbit_pool::{BrokerConfig, ProducerPool, Topology};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let broker = BrokerConfig::load().map_err(|e| anyhow::anyhow!(e.to_string()))?;
//! let pool = ProducerPool::create(4, "main", &broker, Topology::catalog())?;
//!
//! for publisher in pool.publishers() {
//!     publisher.push("product", br#"{"id": 1}"#).await?;
//! }
//!
//! pool.close().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod consumer;
pub mod errors;
pub mod producer;

pub use config::{BrokerConfig, ConsumerConfig, ProducerConfig};
pub use connection::ConnectionSupervisor;
pub use consumer::{ConsumerChannel, ConsumerPool};
pub use errors::{Error, Result};
pub use producer::{ProducerPool, Publisher, Topology};

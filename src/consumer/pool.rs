use std::sync::Arc;

use tracing::{info, warn};

use crate::config::BrokerConfig;
use crate::connection::ConnectionSupervisor;
use crate::consumer::ConsumerChannel;
use crate::errors::Result;

/// One supervised connection fanned out over N consumer channels.
pub struct ConsumerPool {
    master: Arc<ConnectionSupervisor>,
    consumers: Vec<Arc<ConsumerChannel>>,
}

impl std::fmt::Debug for ConsumerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerPool")
            .field("consumers", &self.consumers.len())
            .finish()
    }
}

impl ConsumerPool {
    /// Create the connection supervisor and `channels` consumer channels
    /// bound to it, each with the same prefetch limit.
    pub fn create(
        channels: usize,
        prefetch_count: u16,
        queue: &str,
        broker: &BrokerConfig,
    ) -> Result<Self> {
        let master = ConnectionSupervisor::create(broker, queue)?;

        let consumers = (0..channels)
            .map(|id| ConsumerChannel::spawn(&master, prefetch_count, id))
            .collect();

        Ok(ConsumerPool { master, consumers })
    }

    /// The live worker set.
    pub fn consumers(&self) -> &[Arc<ConsumerChannel>] {
        &self.consumers
    }

    /// Ordered shutdown: channels first, then the connection. Individual
    /// close errors are logged, never fatal.
    pub async fn close(&self) {
        info!("closing consumer channels");
        for consumer in &self.consumers {
            consumer.complete();
            if let Err(err) = consumer.close().await {
                warn!(error = %err, "consumer close");
            }
        }

        self.master.complete();
        if let Err(err) = self.master.close().await {
            warn!(error = %err, "connection close");
        }
        info!("consumer pool closed");
    }
}

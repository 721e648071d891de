use std::sync::Arc;

use tokio::time::sleep;
use tracing::{info, warn};

use crate::config::BrokerConfig;
use crate::connection::ConnectionSupervisor;
use crate::errors::Result;
use crate::producer::{Publisher, Topology, CLOSE_GRACE};

/// One supervised connection fanned out over N publisher channels.
pub struct ProducerPool {
    master: Arc<ConnectionSupervisor>,
    publishers: Vec<Arc<Publisher>>,
}

impl std::fmt::Debug for ProducerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProducerPool")
            .field("publishers", &self.publishers.len())
            .finish()
    }
}

impl ProducerPool {
    /// Create the connection supervisor and `channels` publishers bound to
    /// it. Returns as soon as the supervisors are spawned; publishing blocks
    /// on readiness per [`Publisher::push`].
    pub fn create(
        channels: usize,
        exchange: &str,
        broker: &BrokerConfig,
        topology: Topology,
    ) -> Result<Self> {
        let master = ConnectionSupervisor::create(broker, exchange)?;

        let publishers = (0..channels)
            .map(|id| Publisher::spawn(&master, topology.clone(), id))
            .collect();

        Ok(ProducerPool { master, publishers })
    }

    /// The live worker set.
    pub fn publishers(&self) -> &[Arc<Publisher>] {
        &self.publishers
    }

    /// Ordered shutdown: channels first, then a drain grace period for
    /// in-flight sends, then the connection. Closing the connection first
    /// would strand channel operations in transit. Individual close errors
    /// are logged, never fatal.
    pub async fn close(&self) {
        info!("closing publisher channels");
        for publisher in &self.publishers {
            publisher.complete();
            if let Err(err) = publisher.close().await {
                warn!(error = %err, "publisher close");
            }
        }

        info!("publisher channels closed, draining in-flight sends");
        sleep(CLOSE_GRACE).await;

        self.master.complete();
        if let Err(err) = self.master.close().await {
            warn!(error = %err, "connection close");
        }
        info!("producer pool closed");
    }
}

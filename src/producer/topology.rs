use std::collections::BTreeMap;

use lapin::options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions};
use lapin::types::FieldTable;
use lapin::{Channel, ExchangeKind};
use tracing::debug;

/// The queues and routing-key bindings a publisher channel re-declares on
/// every (re)initialization.
///
/// Every call in [`Topology::declare`] is idempotent, so the full sequence
/// is safe to repeat each time a channel comes back.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    bindings: BTreeMap<String, Vec<String>>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `queue` to the shared exchange under each of `keys`.
    /// Repeated calls for the same queue accumulate keys.
    pub fn bind(mut self, queue: &str, keys: &[&str]) -> Self {
        let entry = self.bindings.entry(queue.to_string()).or_default();
        for key in keys {
            if !entry.iter().any(|k| k == key) {
                entry.push((*key).to_string());
            }
        }
        self
    }

    /// The catalog routing used by the store bus.
    pub fn catalog() -> Self {
        Self::new()
            .bind("q1", &["product", "brand"])
            .bind("q2", &["category"])
            .bind("q3", &["product", "attribute"])
    }

    pub fn queues(&self) -> impl Iterator<Item = &str> {
        self.bindings.keys().map(String::as_str)
    }

    pub fn routing_keys(&self, queue: &str) -> &[String] {
        self.bindings.get(queue).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Declare the durable direct exchange, every queue, and every binding.
    ///
    /// Safe to repeat: declares and binds are idempotent, and a publisher
    /// channel re-runs the full sequence on every re-initialization.
    pub async fn declare(&self, channel: &Channel, exchange: &str) -> lapin::Result<()> {
        channel
            .exchange_declare(
                exchange,
                ExchangeKind::Direct,
                ExchangeDeclareOptions {
                    durable: true,
                    ..ExchangeDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await?;

        for (queue, keys) in &self.bindings {
            channel
                .queue_declare(
                    queue,
                    QueueDeclareOptions {
                        durable: true,
                        ..QueueDeclareOptions::default()
                    },
                    FieldTable::default(),
                )
                .await?;

            for key in keys {
                channel
                    .queue_bind(
                        queue,
                        exchange,
                        key,
                        QueueBindOptions::default(),
                        FieldTable::default(),
                    )
                    .await?;
            }
        }

        debug!(exchange, queues = self.bindings.len(), "topology declared");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_accumulates_and_dedupes() {
        let topology = Topology::new()
            .bind("q1", &["product"])
            .bind("q1", &["product", "brand"]);

        assert_eq!(topology.routing_keys("q1"), ["product", "brand"]);
        assert_eq!(topology.queues().collect::<Vec<_>>(), ["q1"]);
    }

    #[test]
    fn test_catalog_routing() {
        let topology = Topology::catalog();

        assert_eq!(topology.queues().collect::<Vec<_>>(), ["q1", "q2", "q3"]);
        assert_eq!(topology.routing_keys("q1"), ["product", "brand"]);
        assert_eq!(topology.routing_keys("q2"), ["category"]);
        assert_eq!(topology.routing_keys("q3"), ["product", "attribute"]);
        assert!(topology.routing_keys("q4").is_empty());
    }
}

use anyhow::anyhow;
use futures_lite::StreamExt;
use lapin::options::{BasicAckOptions, BasicNackOptions};
use rabbit_pool::{ConsumerConfig, ConsumerPool};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = ConsumerConfig::load().map_err(|e| anyhow!(e.to_string()))?;
    let pool = ConsumerPool::create(
        config.channels,
        config.prefetch_count,
        &config.queue,
        &config.broker,
    )?;

    let consumer = pool.consumers()[0].clone();
    let drain = tokio::spawn(async move {
        loop {
            if consumer.wait_stream_ready().await.is_err() {
                return;
            }
            let Some(mut stream) = consumer.stream().await else {
                continue;
            };

            // The stream ends when the channel is lost; wait for the next
            // re-init and pick up a fresh one.
            while let Some(delivery) = stream.next().await {
                let delivery = match delivery {
                    Ok(delivery) => delivery,
                    Err(err) => {
                        warn!(error = %err, "delivery stream interrupted");
                        break;
                    }
                };

                match serde_json::from_slice::<serde_json::Value>(&delivery.data) {
                    Ok(body) => {
                        info!(routing_key = %delivery.routing_key, %body, "received");
                        if let Err(err) = delivery.ack(BasicAckOptions::default()).await {
                            error!(error = %err, "ack failed");
                        }
                    }
                    Err(err) => {
                        warn!(error = %err, "undecodable payload, requeueing");
                        let requeue = BasicNackOptions {
                            requeue: true,
                            ..BasicNackOptions::default()
                        };
                        if let Err(err) = delivery.nack(requeue).await {
                            error!(error = %err, "nack failed");
                        }
                    }
                }
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("interrupt received, closing pool");
    pool.close().await;
    drain.abort();

    Ok(())
}

use anyhow::anyhow;
use rabbit_pool::{ProducerConfig, ProducerPool, Topology};
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = ProducerConfig::load().map_err(|e| anyhow!(e.to_string()))?;
    let pool = ProducerPool::create(
        config.channels,
        &config.exchange,
        &config.broker,
        Topology::catalog(),
    )?;

    for publisher in pool.publishers() {
        if let Err(err) = publisher
            .push("product", br#"{"someField1": "Some Value 1"}"#)
            .await
        {
            error!(error = %err, "push failed");
        }

        if let Err(err) = publisher
            .push("brand", br#"{"someField2": "Some Value 2"}"#)
            .await
        {
            error!(error = %err, "push failed");
        }
    }

    info!("done, closing pool");
    pool.close().await;

    Ok(())
}

use std::env;

use dotenv::dotenv;
use lapin::uri::AMQPUri;
use serde::Deserialize;

use crate::errors::Error;

/// Broker endpoint and credentials. Immutable once a pool is created.
#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    #[serde(rename = "AMQP_ADDR")]
    pub addr: String,

    #[serde(rename = "AMQP_USERNAME")]
    pub username: String,

    #[serde(rename = "AMQP_PASSWORD")]
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProducerConfig {
    #[serde(flatten)]
    pub broker: BrokerConfig,

    #[serde(rename = "AMQP_EXCHANGE")]
    pub exchange: String,

    #[serde(default = "default_channels")]
    #[serde(rename = "AMQP_CHANNELS")]
    pub channels: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConsumerConfig {
    #[serde(flatten)]
    pub broker: BrokerConfig,

    #[serde(rename = "AMQP_QUEUE")]
    pub queue: String,

    #[serde(default = "default_channels")]
    #[serde(rename = "AMQP_CHANNELS")]
    pub channels: usize,

    #[serde(default = "default_prefetch_count")]
    #[serde(rename = "AMQP_PREFETCH_COUNT")]
    pub prefetch_count: u16,
}

fn default_channels() -> usize {
    1
}

fn default_prefetch_count() -> u16 {
    10
}

fn default_addr() -> String {
    "amqp://localhost:5672/%2f".to_string()
}

impl BrokerConfig {
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        dotenv().ok();
        Ok(BrokerConfig {
            addr: env::var("AMQP_ADDR").unwrap_or_else(|_| default_addr()),
            username: env::var("AMQP_USERNAME").unwrap_or_else(|_| "guest".to_string()),
            password: env::var("AMQP_PASSWORD").unwrap_or_else(|_| "guest".to_string()),
        })
    }

    /// Parse the configured address and embed the credentials.
    ///
    /// A failure here is permanent misconfiguration, not a connectivity
    /// problem, so it surfaces synchronously instead of entering the
    /// reconnect loop.
    pub(crate) fn amqp_uri(&self) -> Result<AMQPUri, Error> {
        let mut uri: AMQPUri = self.addr.parse().map_err(|reason| Error::InvalidAddress {
            addr: self.addr.clone(),
            reason,
        })?;
        uri.authority.userinfo.username = self.username.clone();
        uri.authority.userinfo.password = self.password.clone();
        Ok(uri)
    }
}

impl ProducerConfig {
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let broker = BrokerConfig::load()?;
        Ok(ProducerConfig {
            broker,
            exchange: env::var("AMQP_EXCHANGE").unwrap_or_else(|_| "main".to_string()),
            channels: match env::var("AMQP_CHANNELS") {
                Ok(val) => val.parse()?,
                Err(_) => default_channels(),
            },
        })
    }
}

impl ConsumerConfig {
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let broker = BrokerConfig::load()?;
        Ok(ConsumerConfig {
            broker,
            queue: env::var("AMQP_QUEUE").unwrap_or_else(|_| "q1".to_string()),
            channels: match env::var("AMQP_CHANNELS") {
                Ok(val) => val.parse()?,
                Err(_) => default_channels(),
            },
            prefetch_count: match env::var("AMQP_PREFETCH_COUNT") {
                Ok(val) => val.parse()?,
                Err(_) => default_prefetch_count(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn broker(addr: &str) -> BrokerConfig {
        BrokerConfig {
            addr: addr.to_string(),
            username: "user_store".to_string(),
            password: "secret".to_string(),
        }
    }

    #[test]
    fn test_uri_embeds_credentials() {
        let uri = broker("amqp://localhost:5672/%2f").amqp_uri().unwrap();
        assert_eq!(uri.authority.userinfo.username, "user_store");
        assert_eq!(uri.authority.userinfo.password, "secret");
        assert_eq!(uri.authority.host, "localhost");
        assert_eq!(uri.authority.port, 5672);
    }

    #[test]
    fn test_malformed_address_is_permanent() {
        let err = broker("http://localhost:5672").amqp_uri().unwrap_err();
        match err {
            Error::InvalidAddress { addr, .. } => assert_eq!(addr, "http://localhost:5672"),
            other => panic!("expected InvalidAddress, got {other:?}"),
        }
    }

    #[test]
    fn test_consumer_defaults() {
        std::env::remove_var("AMQP_CHANNELS");
        std::env::remove_var("AMQP_PREFETCH_COUNT");

        let config = ConsumerConfig::load().unwrap();
        assert_eq!(config.channels, 1);
        assert_eq!(config.prefetch_count, 10);
    }
}

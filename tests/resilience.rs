//! Behavioural tests that need no broker: every scenario here runs against
//! an address nothing listens on, so readiness never arrives and the retry
//! budgets are what terminate each call. The paused clock makes the fixed
//! delays free.

use std::time::Duration;

use rabbit_pool::{
    BrokerConfig, ConnectionSupervisor, ConsumerPool, Error, ProducerPool, Publisher, Topology,
};
use tokio::time::Instant;

/// Loopback port 1: connection refused, never ready.
fn unreachable_broker() -> BrokerConfig {
    BrokerConfig {
        addr: "amqp://127.0.0.1:1/%2f".to_string(),
        username: "guest".to_string(),
        password: "guest".to_string(),
    }
}

#[tokio::test(start_paused = true)]
async fn push_fails_after_presend_retry_budget() {
    let master = ConnectionSupervisor::create(&unreachable_broker(), "main").unwrap();
    let publisher = Publisher::spawn(&master, Topology::catalog(), 0);

    // Let the supervisors reach their steady waiting state before timing.
    tokio::time::sleep(Duration::from_millis(1)).await;

    let started = Instant::now();
    let err = publisher.push("product", b"{}").await.unwrap_err();
    let elapsed = started.elapsed();

    assert!(matches!(err, Error::PublishUnavailable), "got {err:?}");
    // Three pre-send waits of one reconnect delay each, and no hang.
    assert!(
        elapsed >= Duration::from_secs(15),
        "gave up too early: {elapsed:?}"
    );
    assert!(
        elapsed < Duration::from_secs(60),
        "took too long: {elapsed:?}"
    );

    master.complete();
}

#[tokio::test(start_paused = true)]
async fn close_is_not_ready_before_first_connect() {
    let master = ConnectionSupervisor::create(&unreachable_broker(), "main").unwrap();
    let publisher = Publisher::spawn(&master, Topology::catalog(), 0);

    let err = master.close().await.unwrap_err();
    assert!(matches!(err, Error::ConnectionNotReady), "got {err:?}");

    let err = publisher.close().await.unwrap_err();
    assert!(matches!(err, Error::ChannelNotReady), "got {err:?}");

    master.complete();
}

#[tokio::test]
async fn malformed_address_fails_pool_creation() {
    let broker = BrokerConfig {
        addr: "http://127.0.0.1:5672".to_string(),
        username: "guest".to_string(),
        password: "guest".to_string(),
    };

    let err = ProducerPool::create(1, "main", &broker, Topology::catalog()).unwrap_err();
    assert!(matches!(err, Error::InvalidAddress { .. }), "got {err:?}");

    let err = ConsumerPool::create(1, 10, "q1", &broker).unwrap_err();
    assert!(matches!(err, Error::InvalidAddress { .. }), "got {err:?}");
}

#[tokio::test(start_paused = true)]
async fn producer_pool_close_terminates_workers() {
    let pool = ProducerPool::create(3, "main", &unreachable_broker(), Topology::catalog()).unwrap();
    assert_eq!(pool.publishers().len(), 3);

    // Channels first, drain grace, then the connection; must complete even
    // though nothing ever connected.
    pool.close().await;

    for publisher in pool.publishers() {
        let err = publisher.push("product", b"{}").await.unwrap_err();
        assert!(matches!(err, Error::ShuttingDown), "got {err:?}");
    }
}

#[tokio::test(start_paused = true)]
async fn consumer_stream_absent_until_ready() {
    let pool = ConsumerPool::create(2, 2, "q1", &unreachable_broker()).unwrap();
    assert_eq!(pool.consumers().len(), 2);

    let consumer = &pool.consumers()[0];
    assert!(consumer.stream().await.is_none());
    assert!(!*consumer.stream_ready().borrow());

    pool.close().await;

    let err = consumer.wait_stream_ready().await.unwrap_err();
    assert!(matches!(err, Error::ShuttingDown), "got {err:?}");
}

#[tokio::test(start_paused = true)]
async fn complete_is_idempotent() {
    let master = ConnectionSupervisor::create(&unreachable_broker(), "main").unwrap();
    let publisher = Publisher::spawn(&master, Topology::catalog(), 0);

    publisher.complete();
    publisher.complete();
    master.complete();
    master.complete();

    let err = publisher.push("product", b"{}").await.unwrap_err();
    assert!(matches!(err, Error::ShuttingDown), "got {err:?}");
}

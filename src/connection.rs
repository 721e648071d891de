use std::sync::Arc;
use std::time::Duration;

use lapin::uri::AMQPUri;
use lapin::{Channel, Connection, ConnectionProperties};
use tokio::sync::{mpsc, watch, RwLock};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::BrokerConfig;
use crate::errors::{Error, Result};

/// Delay between reconnect attempts after a connection failure.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Block until the watched flag reads `want`.
///
/// Readiness is signalled, not polled: waiters sleep on the watch channel
/// and wake on every transition. Returns immediately if the flag already
/// matches; returns on sender loss as well, leaving the caller's next
/// operation to surface the failure.
pub(crate) async fn await_state(rx: &mut watch::Receiver<bool>, want: bool) {
    loop {
        if *rx.borrow_and_update() == want {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

/// Owns the single broker connection of a pool and keeps it alive.
///
/// The supervisor runs a reconnect loop for its whole lifetime: dial, stay
/// connected until the broker-side close notification fires, dial again.
/// Channel supervisors share the connection read-only through
/// [`ConnectionSupervisor::open_channel`] and follow the readiness watch;
/// only this supervisor ever replaces the handle.
pub struct ConnectionSupervisor {
    resource: String,
    connection: Arc<RwLock<Option<Connection>>>,
    ready: watch::Sender<bool>,
    done: CancellationToken,
}

impl ConnectionSupervisor {
    /// Start the reconnect loop and return a handle usable by dependents
    /// even before the first dial succeeds; dependents wait on [`ready`].
    ///
    /// The only synchronous failure is a broker address that does not parse:
    /// that is permanent misconfiguration and never enters the retry loop.
    ///
    /// [`ready`]: ConnectionSupervisor::ready
    pub fn create(broker: &BrokerConfig, resource: &str) -> Result<Arc<Self>> {
        let uri = broker.amqp_uri()?;
        let (ready, _) = watch::channel(false);

        let supervisor = Arc::new(ConnectionSupervisor {
            resource: resource.to_string(),
            connection: Arc::new(RwLock::new(None)),
            ready,
            done: CancellationToken::new(),
        });

        tokio::spawn(Arc::clone(&supervisor).reconnect_loop(uri));

        Ok(supervisor)
    }

    /// The queue (consumer side) or exchange (producer side) this pool targets.
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Readiness watch: `true` iff the current connection handle is open.
    pub fn ready(&self) -> watch::Receiver<bool> {
        self.ready.subscribe()
    }

    pub(crate) fn shutdown_token(&self) -> CancellationToken {
        self.done.clone()
    }

    /// Open a channel on the shared connection.
    pub(crate) async fn open_channel(&self) -> Result<Channel> {
        let guard = self.connection.read().await;
        match guard.as_ref() {
            Some(conn) if conn.status().connected() => Ok(conn.create_channel().await?),
            _ => Err(Error::ConnectionNotReady),
        }
    }

    /// Close the broker connection. Fails with `ConnectionNotReady` if no
    /// connection is currently established.
    pub async fn close(&self) -> Result<()> {
        if !*self.ready.borrow() {
            return Err(Error::ConnectionNotReady);
        }
        self.ready.send_replace(false);

        let conn = self.connection.write().await.take();
        match conn {
            Some(conn) => {
                conn.close(200, "shutting down").await?;
                info!("connection closed");
                Ok(())
            }
            None => Err(Error::ConnectionNotReady),
        }
    }

    /// Ask the reconnect loop to exit at its next suspension point.
    pub fn complete(&self) {
        self.done.cancel();
    }

    async fn reconnect_loop(self: Arc<Self>, uri: AMQPUri) {
        loop {
            self.ready.send_replace(false);
            debug!(resource = %self.resource, "attempting to connect");

            let mut closed = match self.connect(&uri).await {
                Ok(closed) => closed,
                Err(err) => {
                    warn!(error = %err, "failed to connect, retrying");
                    tokio::select! {
                        _ = self.done.cancelled() => break,
                        _ = sleep(RECONNECT_DELAY) => continue,
                    }
                }
            };

            tokio::select! {
                _ = self.done.cancelled() => break,
                _ = closed.recv() => {
                    warn!(resource = %self.resource, "connection closed, reconnecting");
                }
            }
        }

        self.ready.send_replace(false);
        debug!(resource = %self.resource, "reconnect loop terminated");
    }

    /// Dial the broker and install a fresh close notification for this
    /// connection epoch. The previous epoch's receiver is dropped un-drained;
    /// a closed connection carries at most one event.
    async fn connect(&self, uri: &AMQPUri) -> std::result::Result<mpsc::Receiver<lapin::Error>, lapin::Error> {
        let conn = Connection::connect_uri(uri.clone(), ConnectionProperties::default()).await?;

        let (closed_tx, closed_rx) = mpsc::channel(1);
        conn.on_error(move |err| {
            let _ = closed_tx.try_send(err);
        });

        *self.connection.write().await = Some(conn);
        self.ready.send_replace(true);
        info!(resource = %self.resource, "connected");

        Ok(closed_rx)
    }
}

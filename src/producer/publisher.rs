use std::sync::Arc;

use chrono::Utc;
use lapin::options::{BasicPublishOptions, ConfirmSelectOptions};
use lapin::publisher_confirm::{Confirmation, PublisherConfirm};
use lapin::{BasicProperties, Channel};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::connection::{await_state, ConnectionSupervisor, RECONNECT_DELAY};
use crate::errors::{Error, Result};
use crate::producer::{Topology, CONFIRM_RETRIES, PUSH_RETRIES, REINIT_DELAY, RESEND_DELAY};

/// One publisher channel drawn from the pool's shared connection.
///
/// The supervisor rebuilds its channel whenever the channel itself closes or
/// the parent connection drops, re-declaring the full topology each time.
/// [`Publisher::push`] blocks until the broker confirms the publish or one of
/// the bounded retry budgets runs out.
pub struct Publisher {
    id: usize,
    master: Arc<ConnectionSupervisor>,
    topology: Topology,
    channel: Mutex<Option<Channel>>,
    ready: watch::Sender<bool>,
    done: CancellationToken,
}

impl Publisher {
    /// Spawn the re-init loop for one worker slot.
    pub fn spawn(master: &Arc<ConnectionSupervisor>, topology: Topology, id: usize) -> Arc<Self> {
        let (ready, _) = watch::channel(false);

        let publisher = Arc::new(Publisher {
            id,
            master: Arc::clone(master),
            topology,
            channel: Mutex::new(None),
            ready,
            done: master.shutdown_token().child_token(),
        });

        tokio::spawn(Arc::clone(&publisher).reinit_loop());

        publisher
    }

    /// Readiness watch: `true` iff the channel is open and configured.
    pub fn ready(&self) -> watch::Receiver<bool> {
        self.ready.subscribe()
    }

    /// Publish and wait for the broker's confirm.
    ///
    /// Returns `Ok(())` once the broker acknowledges this publish. Failure
    /// outcomes are definitive for this call; the caller decides whether to
    /// resubmit the logical message:
    ///
    /// - `PublishUnavailable`: no open channel within the pre-send retry
    ///   budget, or the channel was lost while waiting for the confirm.
    /// - `ShuttingDown`: shutdown was requested before the message was sent.
    /// - `PublishConfirmTimeout`: the message was sent (and resent) but
    ///   never confirmed within the retry budget.
    ///
    /// Shutdown *after* a successful send returns `Ok(())` without waiting
    /// for the confirm: losing a confirm must not block shutdown.
    pub async fn push(&self, routing_key: &str, payload: &[u8]) -> Result<()> {
        let mut ready = self.ready.subscribe();

        let mut attempts: u32 = 0;
        loop {
            if *ready.borrow_and_update() {
                break;
            }
            if attempts >= PUSH_RETRIES {
                warn!(worker = self.id, routing_key, "giving up: channel never became ready");
                return Err(Error::PublishUnavailable);
            }
            attempts += 1;
            debug!(worker = self.id, routing_key, attempt = attempts, "channel not ready, waiting");
            tokio::select! {
                _ = self.done.cancelled() => return Err(Error::ShuttingDown),
                // A readiness flip wakes the gate early; otherwise one fixed
                // delay per attempt keeps the total wait bounded.
                _ = timeout(RECONNECT_DELAY, ready.changed()) => {}
            }
        }

        let mut confirm_retries: u32 = 0;
        loop {
            if !*ready.borrow_and_update() {
                return Err(Error::PublishUnavailable);
            }

            let confirm = match self.raw_publish(routing_key, payload).await {
                Ok(confirm) => confirm,
                Err(err) => {
                    warn!(worker = self.id, routing_key, error = %err, "publish failed, retrying");
                    tokio::select! {
                        _ = self.done.cancelled() => return Err(Error::ShuttingDown),
                        _ = sleep(RESEND_DELAY) => continue,
                    }
                }
            };

            let outcome = tokio::select! {
                _ = self.done.cancelled() => {
                    debug!(worker = self.id, routing_key, "shutdown during confirm wait");
                    return Ok(());
                }
                _ = await_state(&mut ready, false) => return Err(Error::PublishUnavailable),
                res = timeout(RESEND_DELAY, confirm) => res,
            };

            match outcome {
                Ok(Ok(Confirmation::Ack(_))) | Ok(Ok(Confirmation::NotRequested)) => {
                    debug!(worker = self.id, routing_key, "publish confirmed");
                    return Ok(());
                }
                Ok(Ok(Confirmation::Nack(_))) => {
                    warn!(worker = self.id, routing_key, "publish nacked by broker, resending");
                }
                Ok(Err(err)) => {
                    warn!(worker = self.id, routing_key, error = %err, "confirm failed, channel lost");
                    return Err(Error::PublishUnavailable);
                }
                Err(_) => {
                    debug!(worker = self.id, routing_key, retry = confirm_retries + 1, "no confirm yet, resending");
                }
            }

            confirm_retries += 1;
            if confirm_retries > CONFIRM_RETRIES {
                warn!(worker = self.id, routing_key, "giving up: no confirm from broker");
                return Err(Error::PublishConfirmTimeout { retries: CONFIRM_RETRIES });
            }
        }
    }

    /// Send without waiting for a confirm. No delivery guarantee on its own;
    /// the returned handle resolves with the broker's verdict.
    async fn raw_publish(&self, routing_key: &str, payload: &[u8]) -> Result<PublisherConfirm> {
        let channel = self.channel.lock().await.clone();
        let channel = channel.ok_or(Error::ChannelNotReady)?;

        let properties = BasicProperties::default()
            .with_message_id(Uuid::new_v4().to_string().into())
            .with_content_type("application/octet-stream".into())
            .with_delivery_mode(2) // persistent
            .with_priority(5)
            .with_timestamp(Utc::now().timestamp() as u64);

        let confirm = channel
            .basic_publish(
                self.master.resource(),
                routing_key,
                BasicPublishOptions::default(),
                payload,
                properties,
            )
            .await?;

        Ok(confirm)
    }

    /// Close the channel. Fails with `ChannelNotReady` if it is not open.
    pub async fn close(&self) -> Result<()> {
        if !*self.ready.borrow() {
            return Err(Error::ChannelNotReady);
        }
        self.ready.send_replace(false);

        let channel = self.channel.lock().await.take();
        match channel {
            Some(channel) => {
                channel.close(200, "shutting down").await?;
                Ok(())
            }
            None => Err(Error::ChannelNotReady),
        }
    }

    /// Ask the re-init loop to exit at its next suspension point.
    pub fn complete(&self) {
        self.done.cancel();
    }

    async fn reinit_loop(self: Arc<Self>) {
        let mut conn_ready = self.master.ready();
        loop {
            self.ready.send_replace(false);
            self.channel.lock().await.take();

            tokio::select! {
                _ = self.done.cancelled() => break,
                _ = await_state(&mut conn_ready, true) => {}
            }

            let mut chan_closed = match self.init().await {
                Ok(closed) => closed,
                Err(err) => {
                    warn!(worker = self.id, error = %err, "failed to initialize channel, retrying");
                    tokio::select! {
                        _ = self.done.cancelled() => break,
                        _ = sleep(REINIT_DELAY) => continue,
                    }
                }
            };
            info!(worker = self.id, "publisher channel ready");

            tokio::select! {
                _ = self.done.cancelled() => break,
                _ = await_state(&mut conn_ready, false) => {
                    warn!(worker = self.id, "connection lost, reinitializing");
                }
                _ = chan_closed.recv() => {
                    warn!(worker = self.id, "channel closed, reinitializing");
                }
            }
        }

        self.ready.send_replace(false);
        debug!(worker = self.id, "publisher loop terminated");
    }

    /// Open a channel, enable publisher confirms, re-declare the topology,
    /// and install a fresh close notification for this channel epoch.
    async fn init(&self) -> Result<mpsc::Receiver<lapin::Error>> {
        let channel = self.master.open_channel().await?;

        channel.confirm_select(ConfirmSelectOptions::default()).await?;
        self.topology.declare(&channel, self.master.resource()).await?;

        let (closed_tx, closed_rx) = mpsc::channel(1);
        channel.on_error(move |err| {
            let _ = closed_tx.try_send(err);
        });

        *self.channel.lock().await = Some(channel);
        self.ready.send_replace(true);

        Ok(closed_rx)
    }
}

use std::sync::Arc;

use lapin::options::{BasicConsumeOptions, BasicQosOptions, ConfirmSelectOptions};
use lapin::types::FieldTable;
use lapin::{Channel, Consumer};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::connection::{await_state, ConnectionSupervisor};
use crate::consumer::REINIT_DELAY;
use crate::errors::{Error, Result};

/// The channel handle and the delivery stream derived from it, guarded
/// together so a reader never observes a half-updated pair.
#[derive(Default)]
struct Slot {
    channel: Option<Channel>,
    deliveries: Option<Consumer>,
}

/// One consumer channel drawn from the pool's shared connection.
///
/// The supervisor rebuilds its channel and delivery stream whenever the
/// channel closes or the parent connection drops, re-applying the prefetch
/// limit each time. Stream loss after initial success is expected: callers
/// that see the stream end wait on [`ConsumerChannel::wait_stream_ready`]
/// and fetch a fresh one instead of treating it as fatal.
pub struct ConsumerChannel {
    id: usize,
    master: Arc<ConnectionSupervisor>,
    prefetch_count: u16,
    slot: Mutex<Slot>,
    ready: watch::Sender<bool>,
    stream_ready: watch::Sender<bool>,
    done: CancellationToken,
}

impl ConsumerChannel {
    /// Spawn the re-init loop for one worker slot.
    pub fn spawn(master: &Arc<ConnectionSupervisor>, prefetch_count: u16, id: usize) -> Arc<Self> {
        let (ready, _) = watch::channel(false);
        let (stream_ready, _) = watch::channel(false);

        let consumer = Arc::new(ConsumerChannel {
            id,
            master: Arc::clone(master),
            prefetch_count,
            slot: Mutex::new(Slot::default()),
            ready,
            stream_ready,
            done: master.shutdown_token().child_token(),
        });

        tokio::spawn(Arc::clone(&consumer).reinit_loop());

        consumer
    }

    /// Readiness watch: `true` iff the channel is open and configured.
    pub fn ready(&self) -> watch::Receiver<bool> {
        self.ready.subscribe()
    }

    /// Stream readiness watch: `true` only while the channel is ready *and*
    /// the consume call succeeded.
    pub fn stream_ready(&self) -> watch::Receiver<bool> {
        self.stream_ready.subscribe()
    }

    /// The current delivery stream, if one is live. Each delivery carries
    /// its ack/nack capability; the prefetch limit bounds how many
    /// unacknowledged deliveries the broker pushes ahead of acks.
    pub async fn stream(&self) -> Option<Consumer> {
        self.slot.lock().await.deliveries.clone()
    }

    /// Block until the delivery stream is consumable, or shutdown.
    pub async fn wait_stream_ready(&self) -> Result<()> {
        let mut stream_ready = self.stream_ready.subscribe();
        tokio::select! {
            _ = self.done.cancelled() => Err(Error::ShuttingDown),
            _ = await_state(&mut stream_ready, true) => Ok(()),
        }
    }

    /// Close the channel. Fails with `ChannelNotReady` if it is not open.
    pub async fn close(&self) -> Result<()> {
        if !*self.ready.borrow() {
            return Err(Error::ChannelNotReady);
        }
        self.ready.send_replace(false);
        self.stream_ready.send_replace(false);

        let mut slot = self.slot.lock().await;
        slot.deliveries.take();
        let channel = slot.channel.take();
        drop(slot);

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
            self.stream_ready.send_replace(false);
            *self.slot.lock().await = Slot::default();

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

            // Stream failure is not fatal to the channel: keep watching for
            // disruptions and retry the consume on the next re-init.
            if let Err(err) = self.start_stream().await {
                warn!(worker = self.id, error = %err, "delivery stream not started");
            }

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
        self.stream_ready.send_replace(false);
        debug!(worker = self.id, "consumer loop terminated");
    }

    /// Open a channel, enable confirms, apply the prefetch limit, and
    /// install a fresh close notification for this channel epoch.
    async fn init(&self) -> Result<mpsc::Receiver<lapin::Error>> {
        let channel = self.master.open_channel().await?;

        channel.confirm_select(ConfirmSelectOptions::default()).await?;
        channel
            .basic_qos(self.prefetch_count, BasicQosOptions::default())
            .await?;

        let (closed_tx, closed_rx) = mpsc::channel(1);
        channel.on_error(move |err| {
            let _ = closed_tx.try_send(err);
        });

        *self.slot.lock().await = Slot {
            channel: Some(channel),
            deliveries: None,
        };
        self.ready.send_replace(true);
        info!(worker = self.id, prefetch = self.prefetch_count, "consumer channel ready");

        Ok(closed_rx)
    }

    /// Start consuming from the target queue with manual acks.
    async fn start_stream(&self) -> Result<()> {
        if !*self.ready.borrow() {
            return Err(Error::ChannelNotReady);
        }

        let mut slot = self.slot.lock().await;
        let channel = slot.channel.as_ref().ok_or(Error::ChannelNotReady)?;

        let deliveries = channel
            .basic_consume(
                self.master.resource(),
                &format!("consumer-{}", Uuid::new_v4()),
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        slot.deliveries = Some(deliveries);
        drop(slot);

        self.stream_ready.send_replace(true);
        info!(worker = self.id, queue = %self.master.resource(), "delivery stream ready");
        Ok(())
    }
}

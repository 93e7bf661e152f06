//! Channel communicator: one UDP channel, one inbox worker, one outbox
//! worker, and per-subscriber delivery queues.
//!
//! The inbox worker is the only reader of the socket and the outbox worker
//! the only writer. Inbound datagrams are decoded, filtered by the
//! communicator's affinity mask, and fanned out to subscribers; every
//! subscriber drains its own FIFO queue on its own task, so a slow or
//! panicking handler delays or kills only itself. Blocking waits
//! (`send_and_wait`) run on the callers' tasks, bounded by a semaphore,
//! and never inside the workers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use knxnet_core::protocol::body::Body;
use knxnet_core::{decode_frame, encode_frame};
use tokio::sync::{mpsc, watch, Semaphore};
use tracing::{debug, error, trace, warn};

use crate::application::event_pool::EventCell;
use crate::application::retry::{self, BodySender, RetryPolicy};
use crate::config::PoolConfig;
use crate::error::ClientError;
use crate::infrastructure::network::channel::{UdpChannel, MAX_DATAGRAM_SIZE};

/// Inbound frame observer. Handlers run on their own delivery task and
/// receive frames in arrival order.
#[async_trait]
pub trait FrameHandler: Send + Sync {
    async fn on_frame(&self, body: Body);
}

/// Pumps frames between one [`UdpChannel`] and its subscribers.
pub struct ChannelCommunicator {
    channel: Arc<UdpChannel>,
    /// Affinity mask of bodies this communicator carries.
    accepted: u8,
    outbox: mpsc::Sender<Body>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<Body>>>,
    send_permits: Semaphore,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    closed: AtomicBool,
}

impl ChannelCommunicator {
    /// Wraps `channel` and starts the inbox and outbox workers.
    pub fn start(channel: UdpChannel, accepted: u8, pool: &PoolConfig) -> Arc<Self> {
        let channel = Arc::new(channel);
        let (outbox_tx, outbox_rx) = mpsc::channel(pool.outbox_depth);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let communicator = Arc::new(Self {
            channel,
            accepted,
            outbox: outbox_tx,
            subscribers: Mutex::new(Vec::new()),
            send_permits: Semaphore::new(pool.max_concurrent_waits),
            shutdown_tx,
            shutdown_rx,
            closed: AtomicBool::new(false),
        });

        tokio::spawn(Arc::clone(&communicator).outbox_loop(outbox_rx));
        tokio::spawn(Arc::clone(&communicator).inbox_loop());
        communicator
    }

    /// Whether this communicator carries `body`, inbound or outbound.
    pub fn is_compatible(&self, body: &Body) -> bool {
        body.affinity() & self.accepted != 0
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    /// Enqueues `body` for the outbox worker. Only queue admission can
    /// make the caller wait.
    pub async fn send(&self, body: Body) -> Result<(), ClientError> {
        if self.is_closed() {
            return Err(ClientError::Closed);
        }
        self.outbox.send(body).await.map_err(|_| ClientError::Closed)
    }

    /// Sends `request` and awaits a response matching `predicate` via the
    /// retry engine, with concurrency bounded per communicator.
    pub async fn send_and_wait(
        &self,
        request: Body,
        cell: &EventCell,
        predicate: impl Fn(&Body) -> bool + Send + Sync,
        policy: &RetryPolicy,
    ) -> Result<Option<Body>, ClientError> {
        let _permit = self
            .send_permits
            .acquire()
            .await
            .map_err(|_| ClientError::Closed)?;
        retry::send_and_wait(self, cell, request, predicate, policy, &self.shutdown_rx).await
    }

    /// Registers `handler` with its own FIFO delivery queue and task.
    pub fn subscribe(&self, handler: Arc<dyn FrameHandler>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<Body>();
        self.lock_subscribers().push(tx);
        tokio::spawn(async move {
            while let Some(body) = rx.recv().await {
                handler.on_frame(body).await;
            }
        });
    }

    /// Idempotent shutdown: stop workers, run channel cleanup, drop
    /// subscriber queues. Cleanup failures are logged, never escalated.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("closing communicator");
        let _ = self.shutdown_tx.send(true);
        self.channel.close();
        self.send_permits.close();
        self.lock_subscribers().clear();
    }

    fn lock_subscribers(&self) -> std::sync::MutexGuard<'_, Vec<mpsc::UnboundedSender<Body>>> {
        // Subscriber list mutations are single push/clear operations.
        self.subscribers.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn distribute(&self, body: Body) {
        let mut subscribers = self.lock_subscribers();
        // Drop queues whose delivery task is gone.
        subscribers.retain(|tx| !tx.is_closed());
        match subscribers.len() {
            0 => {}
            1 => {
                let _ = subscribers[0].send(body);
            }
            _ => {
                for tx in subscribers.iter() {
                    let _ = tx.send(body.clone());
                }
            }
        }
    }

    async fn outbox_loop(self: Arc<Self>, mut outbox: mpsc::Receiver<Body>) {
        let mut shutdown = self.shutdown_rx.clone();
        loop {
            tokio::select! {
                next = outbox.recv() => {
                    let Some(body) = next else { break };
                    let bytes = match encode_frame(&body) {
                        Ok(bytes) => bytes,
                        Err(e) => {
                            error!("failed to encode outbound frame: {e}");
                            continue;
                        }
                    };
                    trace!(service = ?body.service_type(), len = bytes.len(), "sending frame");
                    if let Err(e) = self.channel.send(&bytes).await {
                        if self.is_closed() {
                            break;
                        }
                        warn!("failed to send frame: {e}");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("outbox worker stopped");
    }

    async fn inbox_loop(self: Arc<Self>) {
        let mut shutdown = self.shutdown_rx.clone();
        let mut buf = [0u8; MAX_DATAGRAM_SIZE];
        loop {
            tokio::select! {
                received = self.channel.recv(&mut buf) => {
                    let (len, from) = match received {
                        Ok(r) => r,
                        Err(e) => {
                            // A socket error during teardown is expected.
                            if self.is_closed() {
                                break;
                            }
                            error!("socket error on inbox: {e}");
                            break;
                        }
                    };
                    let body = match decode_frame(&buf[..len]) {
                        Ok(body) => body,
                        Err(e) => {
                            warn!(%from, len, "dropping undecodable datagram: {e}");
                            continue;
                        }
                    };
                    if !self.is_compatible(&body) {
                        trace!(service = ?body.service_type(), "ignoring frame outside channel affinity");
                        continue;
                    }
                    if self.is_closed() {
                        warn!(service = ?body.service_type(), "dropping frame received while closing");
                        continue;
                    }
                    trace!(service = ?body.service_type(), %from, "received frame");
                    self.distribute(body);
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("inbox worker stopped");
    }
}

#[async_trait]
impl BodySender for ChannelCommunicator {
    async fn send_body(&self, body: Body) -> Result<(), ClientError> {
        self.send(body).await
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

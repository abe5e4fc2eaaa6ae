use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, watch, Notify};
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::transport::Transport;

/// Queued outbound frames per connection
pub const OUTBOUND_CAPACITY: usize = 64;

/// Inbound frames buffered for the slowest receiver
pub const INBOUND_CAPACITY: usize = 256;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

struct Shared {
    id: u64,
    outbound: mpsc::Sender<String>,
    inbound: broadcast::Sender<String>,
    closed: watch::Receiver<bool>,
    shutdown: Arc<Notify>,
}

/// A live bidirectional connection shared by many users
///
/// A driver task owns the transport: frames sent through any clone are
/// written in order, and every received frame is fanned out to all
/// [`Inbound`] receivers. The connection closes when the peer closes, on
/// a transport error, or on [`Duplex::close`].
#[derive(Clone)]
pub struct Duplex {
    shared: Arc<Shared>,
}

impl Duplex {
    /// Take over a transport and start driving it
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(transport: Box<dyn Transport>) -> Self {
        let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let (inbound, _) = broadcast::channel(INBOUND_CAPACITY);
        let (closed_tx, closed) = watch::channel(false);
        let shutdown = Arc::new(Notify::new());

        let shared = Arc::new(Shared {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            outbound,
            inbound: inbound.clone(),
            closed,
            shutdown: Arc::clone(&shutdown),
        });

        tokio::spawn(drive(
            shared.id,
            transport,
            outbound_rx,
            inbound,
            closed_tx,
            shutdown,
        ));

        Self { shared }
    }

    /// Unique per connection, so consumers can tell a reconnect happened
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    /// Queue a frame, waiting for room if the queue is full
    pub async fn send(&self, text: String) -> Result<()> {
        if self.is_closed() {
            return Err(Error::ConnectionClosed);
        }
        self.shared
            .outbound
            .send(text)
            .await
            .map_err(|_| Error::ConnectionClosed)
    }

    /// Queue a frame without waiting
    ///
    /// For use where awaiting is impossible, such as in `Drop`.
    pub fn try_send(&self, text: String) -> Result<()> {
        if self.is_closed() {
            return Err(Error::ConnectionClosed);
        }
        self.shared.outbound.try_send(text).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => Error::custom("outbound queue full"),
            mpsc::error::TrySendError::Closed(_) => Error::ConnectionClosed,
        })
    }

    /// Receive frames arriving from now on
    pub fn subscribe(&self) -> Inbound {
        Inbound {
            frames: self.shared.inbound.subscribe(),
            closed: self.shared.closed.clone(),
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.shared.closed.borrow()
    }

    /// Wait until the connection has closed
    pub async fn closed(&self) {
        let mut closed = self.shared.closed.clone();
        // An error means the driver is gone, which also means closed
        let _ = closed.wait_for(|closed| *closed).await;
    }

    /// Ask the driver to close the transport
    pub fn close(&self) {
        self.shared.shutdown.notify_one();
    }
}

impl std::fmt::Debug for Duplex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Duplex")
            .field("id", &self.shared.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// One receiver of a [`Duplex`]'s inbound frames
pub struct Inbound {
    frames: broadcast::Receiver<String>,
    closed: watch::Receiver<bool>,
}

impl Inbound {
    /// The next frame, or `None` once the connection has closed
    ///
    /// Frames that arrived before the close are still delivered. A
    /// receiver that falls more than [`INBOUND_CAPACITY`] frames behind
    /// gets [`Error::Lagged`] once and then continues with the oldest
    /// frame still buffered.
    pub async fn recv(&mut self) -> Result<Option<String>> {
        tokio::select! {
            biased;

            frame = self.frames.recv() => match frame {
                Ok(text) => Ok(Some(text)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "inbound receiver lagged");
                    Err(Error::Lagged(skipped))
                }
                Err(broadcast::error::RecvError::Closed) => Ok(None),
            },
            _ = self.closed.wait_for(|closed| *closed) => {
                // Drain what is already buffered
                match self.frames.try_recv() {
                    Ok(text) => Ok(Some(text)),
                    Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                        Err(Error::Lagged(skipped))
                    }
                    Err(_) => Ok(None),
                }
            }
        }
    }
}

async fn drive(
    id: u64,
    mut transport: Box<dyn Transport>,
    mut outbound: mpsc::Receiver<String>,
    inbound: broadcast::Sender<String>,
    closed: watch::Sender<bool>,
    shutdown: Arc<Notify>,
) {
    debug!(connection = id, "connection open");

    loop {
        tokio::select! {
            frame = outbound.recv() => match frame {
                Some(text) => {
                    trace!(connection = id, len = text.len(), "sending frame");
                    if let Err(err) = transport.send(text).await {
                        warn!(connection = id, error = %err, "send failed");
                        break;
                    }
                }
                None => {
                    debug!(connection = id, "all handles dropped");
                    break;
                }
            },
            frame = transport.receive() => match frame {
                Ok(Some(text)) => {
                    trace!(connection = id, len = text.len(), "received frame");
                    // No receivers is not an error
                    let _ = inbound.send(text);
                }
                Ok(None) => {
                    debug!(connection = id, "peer closed connection");
                    break;
                }
                Err(err) => {
                    warn!(connection = id, error = %err, "receive failed");
                    break;
                }
            },
            _ = shutdown.notified() => {
                debug!(connection = id, "closing connection");
                break;
            }
        }
    }

    // Flush frames queued before the close, e.g. CLOSE requests
    while let Ok(text) = outbound.try_recv() {
        if transport.send(text).await.is_err() {
            break;
        }
    }
    if let Err(err) = transport.close().await {
        debug!(connection = id, error = %err, "close failed");
    }
    let _ = closed.send(true);
}

use std::sync::{Arc, Weak};
use std::time::Duration;

use conduit_core::ServiceId;
use parking_lot::Mutex;
use rand::Rng;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::client::HttpClient;
use crate::duplex::Duplex;
use crate::error::Result;

/// How long an unused socket stays up after its last user detaches
pub const DEFAULT_LINGER: Duration = Duration::from_secs(5);

/// Produces new connections for a [`ReconnectingSocket`]
#[async_trait::async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self) -> Result<Duplex>;
}

/// Dials an authenticated websocket to a path on a service
pub struct ServiceDialer {
    client: HttpClient,
    service: ServiceId,
    path: String,
}

impl ServiceDialer {
    pub fn new(client: HttpClient, service: ServiceId, path: impl Into<String>) -> Self {
        Self {
            client,
            service,
            path: path.into(),
        }
    }
}

#[async_trait::async_trait]
impl Dialer for ServiceDialer {
    async fn dial(&self) -> Result<Duplex> {
        self.client.websocket(self.service, &self.path).await
    }
}

/// Randomized delay between connection attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub jitter: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(5000),
            jitter: Duration::from_millis(2000),
        }
    }
}

impl Backoff {
    /// `base` plus a uniform share of `jitter`
    pub fn delay(&self) -> Duration {
        let jitter = self.jitter.as_millis() as u64;
        let extra = if jitter == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter)
        };
        self.base + Duration::from_millis(extra)
    }
}

struct Running {
    current: watch::Receiver<Option<Duplex>>,
    task: JoinHandle<()>,
}

struct SocketState {
    attached: usize,
    epoch: u64,
    running: Option<Running>,
}

struct SocketInner {
    dialer: Arc<dyn Dialer>,
    backoff: Backoff,
    linger: Duration,
    state: Mutex<SocketState>,
}

/// One logical connection kept open for as long as anyone uses it
///
/// The first [`Attachment`] starts a supervisor task that dials, publishes
/// the live connection to every attachment, and redials after a
/// [`Backoff`] whenever the connection fails or closes. After the last
/// attachment is dropped the connection lingers, then is closed.
#[derive(Clone)]
pub struct ReconnectingSocket {
    inner: Arc<SocketInner>,
}

impl ReconnectingSocket {
    pub fn new(dialer: Arc<dyn Dialer>) -> Self {
        Self::builder(dialer).build()
    }

    pub fn builder(dialer: Arc<dyn Dialer>) -> ReconnectingSocketBuilder {
        ReconnectingSocketBuilder {
            dialer,
            backoff: Backoff::default(),
            linger: DEFAULT_LINGER,
        }
    }

    /// Start using the socket, connecting it if needed
    ///
    /// Must be called from within a tokio runtime.
    pub fn attach(&self) -> Attachment {
        let mut guard = self.inner.state.lock();
        let state = &mut *guard;
        state.attached += 1;

        let current = match &state.running {
            Some(running) => running.current.clone(),
            None => {
                debug!("starting socket supervisor");
                let (tx, rx) = watch::channel(None);
                let task = tokio::spawn(supervise(
                    Arc::clone(&self.inner.dialer),
                    self.inner.backoff,
                    tx,
                ));
                state.running = Some(Running {
                    current: rx.clone(),
                    task,
                });
                rx
            }
        };

        Attachment {
            current,
            last: None,
            socket: Arc::downgrade(&self.inner),
        }
    }

    pub fn attached(&self) -> usize {
        self.inner.state.lock().attached
    }

    /// Whether a supervisor is currently running
    pub fn is_running(&self) -> bool {
        self.inner.state.lock().running.is_some()
    }
}

pub struct ReconnectingSocketBuilder {
    dialer: Arc<dyn Dialer>,
    backoff: Backoff,
    linger: Duration,
}

impl ReconnectingSocketBuilder {
    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn linger(mut self, linger: Duration) -> Self {
        self.linger = linger;
        self
    }

    pub fn build(self) -> ReconnectingSocket {
        ReconnectingSocket {
            inner: Arc::new(SocketInner {
                dialer: self.dialer,
                backoff: self.backoff,
                linger: self.linger,
                state: Mutex::new(SocketState {
                    attached: 0,
                    epoch: 0,
                    running: None,
                }),
            }),
        }
    }
}

/// A user's hold on a [`ReconnectingSocket`]
pub struct Attachment {
    current: watch::Receiver<Option<Duplex>>,
    last: Option<u64>,
    socket: Weak<SocketInner>,
}

impl Attachment {
    /// The live connection, if there is one right now
    pub fn current(&self) -> Option<Duplex> {
        self.current
            .borrow()
            .as_ref()
            .filter(|duplex| !duplex.is_closed())
            .cloned()
    }

    /// Wait for a live connection other than the one returned last time
    ///
    /// Returns `None` only if the socket has been torn down.
    pub async fn next_connection(&mut self) -> Option<Duplex> {
        loop {
            let candidate = self.current.borrow_and_update().clone();
            if let Some(duplex) = candidate {
                if !duplex.is_closed() && self.last != Some(duplex.id()) {
                    self.last = Some(duplex.id());
                    return Some(duplex);
                }
            }
            self.current.changed().await.ok()?;
        }
    }
}

impl Drop for Attachment {
    fn drop(&mut self) {
        let Some(inner) = self.socket.upgrade() else {
            return;
        };

        let epoch = {
            let mut state = inner.state.lock();
            state.attached = state.attached.saturating_sub(1);
            if state.attached > 0 {
                return;
            }
            state.epoch += 1;
            state.epoch
        };

        match Handle::try_current() {
            Ok(handle) if !inner.linger.is_zero() => {
                debug!(linger = ?inner.linger, "socket unused");
                let linger = inner.linger;
                let socket = Arc::downgrade(&inner);
                handle.spawn(async move {
                    tokio::time::sleep(linger).await;
                    if let Some(inner) = socket.upgrade() {
                        teardown(&inner, epoch);
                    }
                });
            }
            _ => teardown(&inner, epoch),
        }
    }
}

fn teardown(inner: &SocketInner, epoch: u64) {
    let running = {
        let mut state = inner.state.lock();
        if state.attached > 0 || state.epoch != epoch {
            return;
        }
        state.running.take()
    };

    if let Some(running) = running {
        info!("closing unused socket");
        running.task.abort();
        if let Some(duplex) = running.current.borrow().as_ref() {
            duplex.close();
        }
    }
}

async fn supervise(
    dialer: Arc<dyn Dialer>,
    backoff: Backoff,
    current: watch::Sender<Option<Duplex>>,
) {
    loop {
        match dialer.dial().await {
            Ok(duplex) => {
                info!(connection = duplex.id(), "socket connected");
                current.send_replace(Some(duplex.clone()));
                duplex.closed().await;
                current.send_replace(None);
                info!(connection = duplex.id(), "socket closed");
            }
            Err(err) => warn!(error = %err, "socket connect failed"),
        }

        let delay = backoff.delay();
        info!(delay_ms = delay.as_millis() as u64, "reconnecting");
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_stays_within_jitter() {
        let backoff = Backoff::default();
        for _ in 0..200 {
            let delay = backoff.delay();
            assert!(delay >= Duration::from_millis(5000));
            assert!(delay <= Duration::from_millis(7000));
        }
        let fixed = Backoff {
            base: Duration::from_secs(1),
            jitter: Duration::ZERO,
        };
        assert_eq!(fixed.delay(), Duration::from_secs(1));
    }
}

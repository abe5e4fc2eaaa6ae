#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use conduit_core::ServiceId;
use conduit_fabric::transport::{Connector, Transport};
use conduit_fabric::{
    Backoff, Dialer, Duplex, Error, HttpBackend, HttpRequest, HttpResponse, ReconnectingSocket,
    Result,
};
use conduit_node::NotifyV2;
use conduit_shields::testing::SERVER_TOKEN;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use url::Url;
use uuid::Uuid;

/// Server side of an in-memory socket
pub struct ServerEnd {
    pub from_client: mpsc::UnboundedReceiver<String>,
    pub to_client: mpsc::UnboundedSender<String>,
}

impl ServerEnd {
    /// Next frame from the client, as JSON
    pub async fn frame(&mut self) -> Value {
        let text = self.from_client.recv().await.expect("client hung up");
        serde_json::from_str(&text).unwrap()
    }

    /// Next frame, which must be a request; returns its id
    pub async fn request(&mut self, method: &str) -> (Uuid, Value) {
        let frame = self.frame().await;
        assert_eq!(frame["method"], method, "unexpected frame {frame}");
        let uuid = frame["uuid"].as_str().unwrap().parse().unwrap();
        (uuid, frame)
    }

    /// Wait for the CLOSE of `uuid`, skipping anything else
    pub async fn closed(&mut self, uuid: Uuid) {
        loop {
            let frame = self.frame().await;
            if frame["method"] == "CLOSE" && frame["uuid"] == uuid.to_string() {
                return;
            }
        }
    }

    pub fn send(&self, update: Value) {
        self.to_client.send(update.to_string()).unwrap();
    }

    /// Send an update for `uuid` with extra content fields
    pub fn update(&self, uuid: Uuid, status: u16, content: Value) {
        let mut update = json!({"uuid": uuid, "status": status});
        if let (Some(update), Some(content)) = (update.as_object_mut(), content.as_object()) {
            update.extend(content.clone());
        }
        self.send(update);
    }
}

pub struct MemoryTransport {
    outbound: mpsc::UnboundedSender<String>,
    inbound: mpsc::UnboundedReceiver<String>,
}

#[async_trait::async_trait]
impl Transport for MemoryTransport {
    async fn send(&mut self, text: String) -> Result<()> {
        self.outbound.send(text).map_err(|_| Error::ConnectionClosed)
    }

    async fn receive(&mut self) -> Result<Option<String>> {
        Ok(self.inbound.recv().await)
    }

    async fn close(&mut self) -> Result<()> {
        self.inbound.close();
        Ok(())
    }
}

pub fn pipe() -> (MemoryTransport, ServerEnd) {
    let (outbound, from_client) = mpsc::unbounded_channel();
    let (to_client, inbound) = mpsc::unbounded_channel();
    (
        MemoryTransport { outbound, inbound },
        ServerEnd {
            from_client,
            to_client,
        },
    )
}

/// Dials in-memory sockets, handing each server end to the test
pub struct MemoryDialer {
    accepted: mpsc::UnboundedSender<ServerEnd>,
    dials: AtomicUsize,
}

impl MemoryDialer {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ServerEnd>) {
        let (accepted, rx) = mpsc::unbounded_channel();
        let dialer = Arc::new(Self {
            accepted,
            dials: AtomicUsize::new(0),
        });
        (dialer, rx)
    }

    pub fn dials(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Dialer for MemoryDialer {
    async fn dial(&self) -> Result<Duplex> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        let (transport, server) = pipe();
        self.accepted
            .send(server)
            .map_err(|_| Error::custom("test finished"))?;
        Ok(Duplex::open(Box::new(transport)))
    }
}

pub const NOTIFY: ServiceId = ServiceId::from_u128(0x0123_4567);

/// A notify client over in-memory sockets that redials quickly
pub fn memory_notify() -> (NotifyV2, Arc<MemoryDialer>, mpsc::UnboundedReceiver<ServerEnd>) {
    let (dialer, accepted) = MemoryDialer::new();
    let socket = ReconnectingSocket::builder(dialer.clone())
        .backoff(Backoff {
            base: Duration::from_millis(10),
            jitter: Duration::ZERO,
        })
        .build();
    (NotifyV2::with_socket(NOTIFY, socket), dialer, accepted)
}

type Handler = Box<dyn Fn(&HttpRequest) -> HttpResponse + Send + Sync>;

/// Answers token requests itself and everything else from a closure
pub struct FakeBackend {
    handler: Handler,
    tokens: AtomicUsize,
    log: Mutex<Vec<HttpRequest>>,
}

impl FakeBackend {
    pub fn new(
        handler: impl Fn(&HttpRequest) -> HttpResponse + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            handler: Box::new(handler),
            tokens: AtomicUsize::new(0),
            log: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.log.lock().unwrap().clone()
    }

    pub fn tokens(&self) -> usize {
        self.tokens.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl HttpBackend for FakeBackend {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        self.log.lock().unwrap().push(request.clone());
        if request.url.path() == "/token" {
            let n = self.tokens.fetch_add(1, Ordering::SeqCst) + 1;
            return Ok(HttpResponse::new(200)
                .with_header(
                    "WWW-Authenticate",
                    format!("Negotiate {}", BASE64.encode(SERVER_TOKEN)),
                )
                .with_json(&json!({ "token": format!("tok-{n}") })));
        }
        Ok((self.handler)(&request))
    }
}

/// Accepts every socket whose bearer frame arrives, then pipes it
pub struct FakeConnector {
    accepted: mpsc::UnboundedSender<ServerEnd>,
}

impl FakeConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ServerEnd>) {
        let (accepted, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { accepted }), rx)
    }
}

#[async_trait::async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, _url: &Url) -> Result<Box<dyn Transport>> {
        let (transport, server) = pipe();
        Ok(Box::new(BearerTransport {
            inner: transport,
            server: Some(server),
            accepted: self.accepted.clone(),
            ready: None,
        }))
    }
}

struct BearerTransport {
    inner: MemoryTransport,
    server: Option<ServerEnd>,
    accepted: mpsc::UnboundedSender<ServerEnd>,
    ready: Option<String>,
}

#[async_trait::async_trait]
impl Transport for BearerTransport {
    async fn send(&mut self, text: String) -> Result<()> {
        if let Some(server) = self.server.take() {
            assert!(text.starts_with("Bearer "), "expected bearer, got {text}");
            self.ready = Some("200".to_string());
            let _ = self.accepted.send(server);
            return Ok(());
        }
        self.inner.send(text).await
    }

    async fn receive(&mut self) -> Result<Option<String>> {
        if let Some(ready) = self.ready.take() {
            return Ok(Some(ready));
        }
        self.inner.receive().await
    }

    async fn close(&mut self) -> Result<()> {
        self.inner.close().await
    }
}

pub fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
}

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use conduit_core::services;
use conduit_fabric::transport::{Connector, Transport};
use conduit_fabric::{
    Error, HttpBackend, HttpClient, HttpClientBuilder, HttpRequest, HttpResponse, Result,
};
use conduit_shields::testing::{FakeMechanism, SERVER_TOKEN};
use conduit_shields::{CredentialManager, IdentitySource, Role};
use serde_json::json;
use tokio::sync::mpsc;
use url::Url;

type Handler = Box<dyn Fn(&HttpRequest) -> HttpResponse + Send + Sync>;

/// Answers requests from a closure and records them
pub struct FakeBackend {
    handler: Handler,
    log: Mutex<Vec<HttpRequest>>,
}

impl FakeBackend {
    pub fn new(
        handler: impl Fn(&HttpRequest) -> HttpResponse + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            handler: Box::new(handler),
            log: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.log.lock().unwrap().clone()
    }

    /// Requests made to `path` on any host
    pub fn count(&self, path: &str) -> usize {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.url.path() == path)
            .count()
    }
}

#[async_trait::async_trait]
impl HttpBackend for FakeBackend {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        self.log.lock().unwrap().push(request.clone());
        Ok((self.handler)(&request))
    }
}

pub fn authorization(request: &HttpRequest) -> Option<&str> {
    request
        .headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("authorization"))
        .map(|(_, value)| value.as_str())
}

/// Issues `tok-1`, `tok-2`, ... with the challenge the fake mechanism expects
pub struct TokenServer {
    issued: AtomicUsize,
}

impl TokenServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            issued: AtomicUsize::new(0),
        })
    }

    pub fn issue(&self) -> HttpResponse {
        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        HttpResponse::new(200)
            .with_header(
                "WWW-Authenticate",
                format!("Negotiate {}", BASE64.encode(SERVER_TOKEN)),
            )
            .with_json(&json!({ "token": format!("tok-{n}") }))
    }

    pub fn issued(&self) -> usize {
        self.issued.load(Ordering::SeqCst)
    }
}

pub fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
}

pub fn negotiating_client(
    backend: Arc<FakeBackend>,
    mechanism: &FakeMechanism,
    connector: Option<Arc<FakeConnector>>,
) -> HttpClient {
    let mut builder = negotiating_builder(backend, mechanism);
    if let Some(connector) = connector {
        builder = builder.connector(connector);
    }
    builder.build().unwrap()
}

/// A client builder authenticating through `mechanism`, with the Directory preset
pub fn negotiating_builder(
    backend: Arc<FakeBackend>,
    mechanism: &FakeMechanism,
) -> HttpClientBuilder {
    let credentials = Arc::new(CredentialManager::new(
        Arc::new(mechanism.clone()),
        Role::Initiator,
        IdentitySource::Ccache,
    ));
    HttpClient::builder()
        .backend(backend)
        .negotiate(credentials)
        .service_url(services::DIRECTORY, url("http://dir.local/"))
}

/// The server side of a fake socket
pub struct ServerEnd {
    pub url: Url,
    pub bearer: String,
    pub from_client: mpsc::UnboundedReceiver<String>,
    pub to_client: mpsc::UnboundedSender<String>,
}

/// Accepts every connection, answering the bearer frame from a script
pub struct FakeConnector {
    replies: Mutex<VecDeque<String>>,
    accepted: mpsc::UnboundedSender<ServerEnd>,
}

impl FakeConnector {
    /// Replies are used in order, then `200` for every later connection
    pub fn new(replies: &[&str]) -> (Arc<Self>, mpsc::UnboundedReceiver<ServerEnd>) {
        let (accepted, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            accepted,
        });
        (connector, rx)
    }
}

#[async_trait::async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, url: &Url) -> Result<Box<dyn Transport>> {
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| "200".to_string());
        let (client_tx, from_client) = mpsc::unbounded_channel();
        let (to_client, client_rx) = mpsc::unbounded_channel();

        Ok(Box::new(FakeTransport {
            url: url.clone(),
            reply: Some(reply),
            pending: None,
            server: Some((from_client, to_client)),
            accepted: self.accepted.clone(),
            outbound: client_tx,
            inbound: client_rx,
        }))
    }
}

pub struct FakeTransport {
    url: Url,
    reply: Option<String>,
    pending: Option<String>,
    server: Option<(mpsc::UnboundedReceiver<String>, mpsc::UnboundedSender<String>)>,
    accepted: mpsc::UnboundedSender<ServerEnd>,
    outbound: mpsc::UnboundedSender<String>,
    inbound: mpsc::UnboundedReceiver<String>,
}

#[async_trait::async_trait]
impl Transport for FakeTransport {
    async fn send(&mut self, text: String) -> Result<()> {
        if let Some(reply) = self.reply.take() {
            // First frame is the bearer token
            self.pending = Some(reply.clone());
            if reply == "200" {
                if let Some((from_client, to_client)) = self.server.take() {
                    let _ = self.accepted.send(ServerEnd {
                        url: self.url.clone(),
                        bearer: text,
                        from_client,
                        to_client,
                    });
                }
            }
            return Ok(());
        }
        self.outbound.send(text).map_err(|_| Error::ConnectionClosed)
    }

    async fn receive(&mut self) -> Result<Option<String>> {
        if let Some(reply) = self.pending.take() {
            return Ok(Some(reply));
        }
        Ok(self.inbound.recv().await)
    }

    async fn close(&mut self) -> Result<()> {
        self.inbound.close();
        Ok(())
    }
}

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::transport::{Connector, Transport};

/// WebSocket transport carrying text frames
///
/// Binary frames holding UTF-8 are accepted as text; control frames are
/// handled by the protocol layer and never surface.
pub struct WebSocketTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WebSocketTransport {
    /// Connect to a `ws://` or `wss://` URL with no timeout
    pub async fn connect(url: &Url) -> Result<Self> {
        WebSocketConnector::builder().build().open(url).await
    }

    /// Create from an existing stream
    pub fn from_stream(stream: WebSocketStream<MaybeTlsStream<TcpStream>>) -> Self {
        Self { stream }
    }
}

#[async_trait::async_trait]
impl Transport for WebSocketTransport {
    async fn send(&mut self, text: String) -> Result<()> {
        self.stream.send(Message::Text(text)).await.map_err(|e| match e {
            tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                Error::ConnectionClosed
            }
            e => e.into(),
        })
    }

    async fn receive(&mut self) -> Result<Option<String>> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Some(text)),
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                    Ok(text) => return Ok(Some(text)),
                    Err(_) => warn!("dropping non-UTF-8 binary frame"),
                },
                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "peer closed websocket");
                    return Ok(None);
                }
                Some(Ok(_)) => continue,
                Some(Err(
                    tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed,
                ))
                | None => return Ok(None),
                Some(Err(e)) => return Err(e.into()),
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        match self.stream.close(None).await {
            Ok(())
            | Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Opens [`WebSocketTransport`]s
#[derive(Debug, Clone, Default)]
pub struct WebSocketConnector {
    connect_timeout: Option<Duration>,
}

impl WebSocketConnector {
    /// Create a builder for configuring the connector
    pub fn builder() -> WebSocketConnectorBuilder {
        WebSocketConnectorBuilder::new()
    }

    async fn open(&self, url: &Url) -> Result<WebSocketTransport> {
        let connect_op = tokio_tungstenite::connect_async(url.as_str());

        let (stream, _response) = if let Some(timeout) = self.connect_timeout {
            tokio::time::timeout(timeout, connect_op)
                .await
                .map_err(|_| Error::Timeout)??
        } else {
            connect_op.await?
        };

        debug!(%url, "websocket connected");
        Ok(WebSocketTransport::from_stream(stream))
    }
}

#[async_trait::async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, url: &Url) -> Result<Box<dyn Transport>> {
        Ok(Box::new(self.open(url).await?))
    }
}

/// Builder for configuring WebSocket connections
#[derive(Default)]
pub struct WebSocketConnectorBuilder {
    connect_timeout: Option<Duration>,
}

impl WebSocketConnectorBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the connection timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn build(self) -> WebSocketConnector {
        WebSocketConnector {
            connect_timeout: self.connect_timeout,
        }
    }
}

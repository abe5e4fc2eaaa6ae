use url::Url;

use crate::error::Result;

pub mod websocket;

pub use self::websocket::{WebSocketConnector, WebSocketConnectorBuilder, WebSocketTransport};

/// Transport trait for sending and receiving text messages
///
/// Each transport instance represents a single connection.
#[async_trait::async_trait]
pub trait Transport: Send {
    /// Send a message over the transport
    async fn send(&mut self, text: String) -> Result<()>;

    /// Receive the next message, or `None` once the peer has closed
    ///
    /// Must be cancel safe: dropping the future loses no message.
    async fn receive(&mut self) -> Result<Option<String>>;

    /// Close the transport connection
    async fn close(&mut self) -> Result<()>;
}

/// Opens transports to URLs
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &Url) -> Result<Box<dyn Transport>>;
}

use serde::{de::DeserializeOwned, Serialize};
use tracing::warn;

use crate::codec::Codec;
use crate::duplex::{Duplex, Inbound};
use crate::error::Result;

/// Typed view of a [`Duplex`]
///
/// Combines a live connection and a codec
#[derive(Clone)]
pub struct Channel<C> {
    duplex: Duplex,
    codec: C,
}

impl<C: Codec + Clone> Channel<C> {
    pub fn new(duplex: Duplex, codec: C) -> Self {
        Self { duplex, codec }
    }

    pub fn duplex(&self) -> &Duplex {
        &self.duplex
    }

    /// Send a message over the channel
    pub async fn send<T: Serialize>(&self, message: &T) -> Result<()> {
        let text = self.codec.encode(message)?;
        self.duplex.send(text).await
    }

    /// Send a message without waiting for queue space
    pub fn try_send<T: Serialize>(&self, message: &T) -> Result<()> {
        let text = self.codec.encode(message)?;
        self.duplex.try_send(text)
    }

    /// Start receiving messages arriving from now on
    pub fn subscribe(&self) -> Receiver<C> {
        Receiver {
            inbound: self.duplex.subscribe(),
            codec: self.codec.clone(),
        }
    }
}

pub struct Receiver<C> {
    inbound: Inbound,
    codec: C,
}

impl<C: Codec> Receiver<C> {
    /// Receive the next message that decodes as `T`
    ///
    /// Frames that fail to decode are logged and skipped. Returns `None`
    /// once the connection has closed, and [`crate::Error::Lagged`] if
    /// messages were lost because this receiver fell behind.
    pub async fn receive<T: DeserializeOwned>(&mut self) -> Result<Option<T>> {
        loop {
            let Some(text) = self.inbound.recv().await? else {
                return Ok(None);
            };
            match self.codec.decode(&text) {
                Ok(message) => return Ok(Some(message)),
                Err(err) => warn!(error = %err, "skipping undecodable frame"),
            }
        }
    }
}

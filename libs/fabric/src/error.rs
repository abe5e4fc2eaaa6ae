use std::sync::Arc;

use conduit_core::{ServiceError, ServiceId};
use thiserror::Error;
use url::Url;

/// Errors are `Clone` so one failed fetch can be handed to every caller
/// waiting on it; library errors that are not are held in an `Arc`.
#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("HTTP error: {0}")]
    Http(Arc<reqwest::Error>),

    #[error("WebSocket error: {0}")]
    WebSocket(Arc<tokio_tungstenite::tungstenite::Error>),

    #[error("Authentication error: {0}")]
    Auth(#[from] conduit_shields::Error),

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("No URL available for service {0}")]
    NoServiceUrl(ServiceId),

    #[error("Token request to {url} failed with status {status}")]
    TokenRequest { url: Url, status: u16 },

    #[error("Bad token response: {0}")]
    BadTokenResponse(String),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Receiver fell behind and missed {0} frames")]
    Lagged(u64),

    #[error("Timed out")]
    Timeout,

    #[error("{0}")]
    Custom(String),
}

impl Error {
    pub fn custom(msg: impl Into<String>) -> Self {
        Self::Custom(msg.into())
    }

    /// The service this error is about, if known
    pub fn service(&self) -> Option<ServiceId> {
        match self {
            Self::Service(err) => Some(err.service),
            Self::NoServiceUrl(service) => Some(*service),
            _ => None,
        }
    }

    /// The status code this error carries, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Service(err) => Some(err.status),
            Self::TokenRequest { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Self::Http(Arc::new(err))
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Arc::new(err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Codec(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

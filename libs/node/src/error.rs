use conduit_core::{ServiceError, ServiceId};
use thiserror::Error;

use crate::notify::NotifyRequest;

#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error(transparent)]
    Fabric(#[from] conduit_fabric::Error),

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error("Notify request {request} to service {service} failed with status {status}")]
    Notify {
        service: ServiceId,
        status: u16,
        request: NotifyRequest,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("{0}")]
    Custom(String),
}

impl Error {
    pub fn custom(msg: impl Into<String>) -> Self {
        Self::Custom(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// The service this error is about, if known
    pub fn service(&self) -> Option<ServiceId> {
        match self {
            Self::Fabric(err) => err.service(),
            Self::Service(err) => Some(err.service),
            Self::Notify { service, .. } => Some(*service),
            _ => None,
        }
    }

    /// The status code this error carries, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Fabric(err) => err.status(),
            Self::Service(err) => Some(err.status),
            Self::Notify { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Fabric(err.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

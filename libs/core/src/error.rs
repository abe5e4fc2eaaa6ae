use thiserror::Error;

use crate::service::ServiceId;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error("Response was empty")]
    Empty,

    #[error("{0}")]
    Custom(String),
}

impl Error {
    pub fn custom(msg: impl Into<String>) -> Self {
        Self::Custom(msg.into())
    }

    /// The status code carried by this error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Service(err) => Some(err.status),
            Self::Empty => Some(404),
            Self::Custom(_) => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// A failure reported by, or while talking to, a particular service
///
/// A status of 0 means no usable status was received.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message} (service {service}, status {status})")]
pub struct ServiceError {
    pub service: ServiceId,
    pub status: u16,
    pub message: String,
}

impl ServiceError {
    pub fn new(service: ServiceId, status: u16, message: impl Into<String>) -> Self {
        Self {
            service,
            status,
            message: message.into(),
        }
    }
}

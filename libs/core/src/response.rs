use serde_json::Value;

use crate::error::{Error, Result, ServiceError};
use crate::service::ServiceId;

/// A status-classified value
///
/// The variant is decided by the status code alone: 404 is `Empty`,
/// anything below 300 is `Success`, everything else is `Failure`.
#[derive(Debug, Clone, PartialEq)]
pub enum Response<T> {
    Success { status: u16, body: T },
    Empty,
    Failure { status: u16 },
}

impl<T> Response<T> {
    /// Classify a status code and body
    pub fn of(status: u16, body: T) -> Self {
        match status {
            404 => Self::Empty,
            s if s < 300 => Self::Success { status: s, body },
            s => Self::Failure { status: s },
        }
    }

    /// Classify a status with no body available
    ///
    /// A success status needs a body, so one is built with `T::default()`.
    pub fn of_status(status: u16) -> Self
    where
        T: Default,
    {
        Self::of(status, T::default())
    }

    pub fn ok(body: T) -> Self {
        Self::of(200, body)
    }

    pub fn empty() -> Self {
        Self::Empty
    }

    pub fn error() -> Self {
        Self::Failure { status: 500 }
    }

    pub fn from_option(value: Option<T>) -> Self {
        value.map_or(Self::Empty, Self::ok)
    }

    pub fn status(&self) -> u16 {
        match self {
            Self::Success { status, .. } => *status,
            Self::Empty => 404,
            Self::Failure { status } => *status,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Failure { .. })
    }

    pub fn as_ref(&self) -> Response<&T> {
        match self {
            Self::Success { status, body } => Response::Success {
                status: *status,
                body,
            },
            Self::Empty => Response::Empty,
            Self::Failure { status } => Response::Failure { status: *status },
        }
    }

    /// Reclassify under a new status, keeping the body if there is one
    pub fn with_status(self, status: u16) -> Self
    where
        T: Default,
    {
        match self {
            Self::Success { body, .. } => Self::of(status, body),
            _ => Self::of_status(status),
        }
    }

    pub fn and_then<U>(self, f: impl FnOnce(T) -> Response<U>) -> Response<U> {
        match self {
            Self::Success { body, .. } => f(body),
            Self::Empty => Response::Empty,
            Self::Failure { status } => Response::Failure { status },
        }
    }

    /// Map the body of a success, keeping its status
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Response<U> {
        match self {
            Self::Success { status, body } => Response::Success {
                status,
                body: f(body),
            },
            Self::Empty => Response::Empty,
            Self::Failure { status } => Response::Failure { status },
        }
    }

    /// A success whose body fails the predicate becomes `Empty`
    pub fn filter(self, pred: impl FnOnce(&T) -> bool) -> Self {
        match self {
            Self::Success { status, body } => {
                if pred(&body) {
                    Self::Success { status, body }
                } else {
                    Self::Empty
                }
            }
            other => other,
        }
    }

    /// Replace an `Empty` with another response
    pub fn or_else(self, f: impl FnOnce() -> Self) -> Self {
        match self {
            Self::Empty => f(),
            other => other,
        }
    }

    /// Replace an `Empty` with a successful default
    pub fn or_item(self, f: impl FnOnce() -> T) -> Self {
        self.or_else(|| Self::ok(f()))
    }

    /// Recover from a failure status
    pub fn handle(self, f: impl FnOnce(u16) -> Self) -> Self {
        match self {
            Self::Failure { status } => f(status),
            other => other,
        }
    }

    pub fn into_option(self) -> Option<T> {
        match self {
            Self::Success { body, .. } => Some(body),
            _ => None,
        }
    }

    /// `Empty` becomes `Ok(None)`, a failure becomes an error
    pub fn into_result(self) -> Result<Option<T>> {
        match self {
            Self::Success { body, .. } => Ok(Some(body)),
            Self::Empty => Ok(None),
            Self::Failure { status } => Err(Error::custom(format!("HTTP error {status}"))),
        }
    }

    /// As [`Response::into_result`], with failures tagged by service
    pub fn into_service_result(
        self,
        service: ServiceId,
        message: impl Into<String>,
    ) -> std::result::Result<Option<T>, ServiceError> {
        match self {
            Self::Success { body, .. } => Ok(Some(body)),
            Self::Empty => Ok(None),
            Self::Failure { status } => Err(ServiceError::new(service, status, message)),
        }
    }

    /// The body, treating `Empty` as an error too
    pub fn into_value(self) -> Result<T> {
        match self {
            Self::Success { body, .. } => Ok(body),
            Self::Empty => Err(Error::Empty),
            Self::Failure { status } => Err(Error::custom(format!("HTTP error {status}"))),
        }
    }
}

impl Response<Value> {
    /// Decode a `{status, body}` object
    ///
    /// A missing body is `null`; a missing or invalid status is a 500.
    pub fn from_json(value: &Value) -> Self {
        let status = value
            .get("status")
            .and_then(Value::as_u64)
            .and_then(|s| u16::try_from(s).ok())
            .unwrap_or(500);
        let body = value.get("body").cloned().unwrap_or(Value::Null);
        Self::of(status, body)
    }
}

impl<T> From<Option<T>> for Response<T> {
    fn from(value: Option<T>) -> Self {
        Self::from_option(value)
    }
}

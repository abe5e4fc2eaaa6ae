//! Conduit Core - Shared types for the service client crates
//!
//! Service identifiers, the status-classified [`Response`] wrapper used for
//! HTTP and notify results, service-tagged errors, and URL path encoding.

pub mod error;
pub mod path;
pub mod response;
pub mod service;

// Re-exports for convenience
pub use error::{Error, Result, ServiceError};
pub use response::Response;
pub use service::{services, ServiceId};

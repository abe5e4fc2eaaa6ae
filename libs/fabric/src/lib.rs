//! Conduit Fabric - Authenticated HTTP and socket plumbing
//!
//! Resolves services to base URLs ([`Discovery`]), attaches bearer tokens
//! obtained by mutual authentication ([`HttpClient`]), and keeps shared,
//! self-healing text sockets open to services ([`ReconnectingSocket`]).
//! Network access goes through the [`HttpBackend`] and
//! [`transport::Connector`] traits.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use conduit_core::services;
//! use conduit_fabric::HttpClient;
//! use conduit_shields::CredentialManager;
//!
//! # async fn example(credentials: Arc<CredentialManager>) -> conduit_fabric::Result<()> {
//! let client = HttpClient::builder()
//!     .negotiate(credentials)
//!     .service_url(services::DIRECTORY, "http://directory.local/".parse()?)
//!     .build()?;
//!
//! // GET v1/service/<uuid> on the Directory, classified by status
//! let _response = client
//!     .get(services::DIRECTORY)
//!     .segments(["v1", "service"])
//!     .segment(services::CONFIGDB)
//!     .fetch()
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod channel;
pub mod client;
pub mod codec;
pub mod discovery;
pub mod duplex;
pub mod error;
pub mod http;
pub mod socket;
pub mod transport;

// Re-exports for convenience
pub use channel::Channel;
pub use client::{HttpClient, HttpClientBuilder, RequestBuilder};
pub use discovery::{Discovery, Locator};
pub use duplex::{Duplex, Inbound};
pub use error::{Error, Result};
pub use http::{HttpBackend, HttpRequest, HttpResponse, ReqwestBackend};
pub use reqwest::Method;
pub use socket::{Attachment, Backoff, Dialer, ReconnectingSocket, ServiceDialer};

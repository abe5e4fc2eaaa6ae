//! Conduit Node - Clients for the core services
//!
//! [`ServiceClient`] ties an identity, an authenticated [`HttpClient`] and
//! service discovery together, and hands out typed interfaces to the
//! Directory, ConfigDB and Authentication services. Live data comes over
//! the notify/v2 protocol ([`NotifyV2`]), multiplexed on one shared socket
//! per service.
//!
//! # Example
//!
//! ```no_run
//! use futures::StreamExt;
//! use conduit_node::{ClientConfig, ServiceClient};
//!
//! # async fn example(app: uuid::Uuid) -> conduit_node::Result<()> {
//! let client = ServiceClient::builder()
//!     .config(ClientConfig::from_env()?)
//!     .build()?;
//!
//! let mut objects = client.configdb().watch_list(app);
//! while let Some(objects) = objects.next().await {
//!     println!("{} objects", objects?.len());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! [`HttpClient`]: conduit_fabric::HttpClient

pub mod client;
pub mod config;
pub mod error;
pub mod notify;
pub mod services;

// Re-exports for convenience
pub use client::{ServiceClient, ServiceClientBuilder};
pub use config::{ClientConfig, Identity};
pub use error::{Error, Result};
pub use notify::{NotifyRequest, NotifyUpdate, NotifyV2};
pub use services::{Auth, ConfigDb, Directory, Grant};

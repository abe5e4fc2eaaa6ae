//! Conduit Shields - Identity and mutual authentication
//!
//! A [`CredentialManager`] owns the process identity and hands out
//! single-round [`Handshake`]s. The security mechanism sits behind the
//! [`Mechanism`] trait: Kerberos via the `gssapi` feature, or the
//! scripted one in [`testing`] with the `testing` feature.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use conduit_shields::{CredentialManager, IdentitySource, Mechanism, Role};
//!
//! # fn example(mechanism: Arc<dyn Mechanism>, challenge: &[u8]) -> conduit_shields::Result<()> {
//! let manager = CredentialManager::new(mechanism, Role::Initiator, IdentitySource::Ccache);
//! let (mut handshake, token) = manager.initiate("HTTP@dir.local")?;
//! // send `token`, read the peer's challenge, then
//! handshake.complete(challenge)?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod handshake;
pub mod manager;
pub mod mechanism;

#[cfg(feature = "gssapi")]
pub mod krb5;

#[cfg(feature = "testing")]
pub mod testing;

// Re-exports for convenience
pub use error::{Error, Result};
pub use handshake::{Accepted, Handshake, HandshakeState};
pub use manager::{CredentialManager, MIN_LIFETIME};
pub use mechanism::{Credential, IdentitySource, Mechanism, Role, SecurityContext};

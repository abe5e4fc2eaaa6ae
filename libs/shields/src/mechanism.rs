use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;

/// Which side of a handshake a credential is used for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Client side, proves our identity to a service
    Initiator,
    /// Server side, verifies a client's identity
    Acceptor,
}

/// Where the long-term identity comes from
#[derive(Clone, PartialEq, Eq)]
pub enum IdentitySource {
    /// Tickets already present in the local credential cache
    Ccache,
    /// A long-term key file for a named principal
    Keytab { principal: String, keytab: PathBuf },
    /// A static username and password
    Password { username: String, password: String },
}

impl fmt::Debug for IdentitySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ccache => f.write_str("Ccache"),
            Self::Keytab { principal, keytab } => f
                .debug_struct("Keytab")
                .field("principal", principal)
                .field("keytab", keytab)
                .finish(),
            Self::Password { username, .. } => f
                .debug_struct("Password")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
        }
    }
}

/// A security mechanism able to turn an identity source into a credential
///
/// Implementations may block; callers run them off the async reactor.
pub trait Mechanism: Send + Sync {
    fn acquire(&self, role: Role, source: &IdentitySource) -> Result<Arc<dyn Credential>>;
}

/// A logged-in identity
pub trait Credential: Send + Sync {
    fn principal(&self) -> String;

    /// Time left before the underlying tickets expire
    fn remaining_lifetime(&self) -> Result<Duration>;

    /// Start a client context towards `target`, e.g. `HTTP@host`
    fn initiate(&self, target: &str) -> Result<Box<dyn SecurityContext>>;

    /// Start a server context waiting for a client token
    fn accept(&self) -> Result<Box<dyn SecurityContext>>;
}

/// One side of a single authentication exchange
pub trait SecurityContext: Send {
    /// Feed the peer's token (none for the first initiator step) and get
    /// the token to send back, if any
    fn step(&mut self, token: Option<&[u8]>) -> Result<Option<Vec<u8>>>;

    fn is_established(&self) -> bool;

    /// The authenticated peer, once established
    fn peer_name(&self) -> Option<String>;
}

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::handshake::{Accepted, Handshake};
use crate::mechanism::{Credential, IdentitySource, Mechanism, Role};

/// Credentials with less time left than this are replaced before use
pub const MIN_LIFETIME: Duration = Duration::from_secs(5);

/// Owns the process identity for one role
///
/// Logs in lazily, replaces credentials that are about to expire and
/// re-logs in once when the mechanism reports an error. All of that
/// happens under a single lock, so only one login runs at a time. The
/// methods block; async callers use the `*_blocking` variants or run them
/// on the blocking pool themselves.
pub struct CredentialManager {
    mechanism: Arc<dyn Mechanism>,
    role: Role,
    source: IdentitySource,
    current: Mutex<Option<Arc<dyn Credential>>>,
}

impl CredentialManager {
    pub fn new(mechanism: Arc<dyn Mechanism>, role: Role, source: IdentitySource) -> Self {
        Self {
            mechanism,
            role,
            source,
            current: Mutex::new(None),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn source(&self) -> &IdentitySource {
        &self.source
    }

    /// Discard any current credential and log in afresh
    pub fn login(&self) -> Result<Arc<dyn Credential>> {
        let mut current = self.current.lock();
        *current = None;
        self.login_locked(&mut current)
    }

    /// A credential with at least [`MIN_LIFETIME`] left
    pub fn credential(&self) -> Result<Arc<dyn Credential>> {
        let mut current = self.current.lock();
        self.valid_locked(&mut current)
    }

    /// Run `f` with a valid credential
    ///
    /// If `f` fails the credential is dropped, a fresh login is made and
    /// `f` runs once more. A failure of that login or of the second call
    /// is returned as is.
    pub fn with_credential<T>(&self, f: impl Fn(&dyn Credential) -> Result<T>) -> Result<T> {
        let mut current = self.current.lock();
        let credential = self.valid_locked(&mut current)?;

        match f(credential.as_ref()) {
            Ok(value) => Ok(value),
            Err(err) => {
                warn!(
                    error = %err,
                    principal = %credential.principal(),
                    "credential failed, logging in again"
                );
                *current = None;
                let credential = self.login_locked(&mut current)?;
                f(credential.as_ref())
            }
        }
    }

    /// Start an initiator handshake towards `target` and produce its first token
    pub fn initiate(&self, target: &str) -> Result<(Handshake, Vec<u8>)> {
        self.require(Role::Initiator)?;
        self.with_credential(|credential| {
            let mut handshake = Handshake::new(credential.initiate(target)?, Role::Initiator);
            let token = handshake.initial_token()?;
            Ok((handshake, token))
        })
    }

    /// Authenticate a client from its initial token
    pub fn accept(&self, token: &[u8]) -> Result<Accepted> {
        self.require(Role::Acceptor)?;
        self.with_credential(|credential| {
            Handshake::new(credential.accept()?, Role::Acceptor).accept(token)
        })
    }

    /// [`CredentialManager::initiate`] on the blocking pool
    pub async fn initiate_blocking(self: &Arc<Self>, target: &str) -> Result<(Handshake, Vec<u8>)> {
        let manager = Arc::clone(self);
        let target = target.to_string();
        tokio::task::spawn_blocking(move || manager.initiate(&target))
            .await
            .map_err(|err| Error::Task(err.to_string()))?
    }

    /// [`CredentialManager::accept`] on the blocking pool
    pub async fn accept_blocking(self: &Arc<Self>, token: Vec<u8>) -> Result<Accepted> {
        let manager = Arc::clone(self);
        tokio::task::spawn_blocking(move || manager.accept(&token))
            .await
            .map_err(|err| Error::Task(err.to_string()))?
    }

    fn valid_locked(
        &self,
        current: &mut Option<Arc<dyn Credential>>,
    ) -> Result<Arc<dyn Credential>> {
        if let Some(credential) = current.as_ref() {
            match credential.remaining_lifetime() {
                Ok(left) if left >= MIN_LIFETIME => return Ok(Arc::clone(credential)),
                Ok(left) => debug!(?left, "credential about to expire"),
                Err(err) => debug!(error = %err, "credential lifetime unavailable"),
            }
        }
        *current = None;
        self.login_locked(current)
    }

    fn login_locked(
        &self,
        current: &mut Option<Arc<dyn Credential>>,
    ) -> Result<Arc<dyn Credential>> {
        let credential = self.mechanism.acquire(self.role, &self.source).map_err(|err| {
            warn!(error = %err, source = ?self.source, "login failed");
            match err {
                Error::Login(_) | Error::Unsupported(_) => err,
                other => Error::Login(other.to_string()),
            }
        })?;
        info!(principal = %credential.principal(), role = ?self.role, "logged in");
        *current = Some(Arc::clone(&credential));
        Ok(credential)
    }

    fn require(&self, role: Role) -> Result<()> {
        if self.role == role {
            Ok(())
        } else {
            Err(Error::Handshake(format!(
                "credential manager holds a {:?} identity",
                self.role
            )))
        }
    }
}

impl std::fmt::Debug for CredentialManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialManager")
            .field("role", &self.role)
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

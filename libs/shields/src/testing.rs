//! An in-memory mechanism for exercising code that authenticates
//!
//! The initiator opens with [`CLIENT_TOKEN`], the acceptor answers with
//! [`SERVER_TOKEN`], and the exchange is then established. Logins, context
//! creation and lifetimes can be scripted to fail or expire.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::mechanism::{Credential, IdentitySource, Mechanism, Role, SecurityContext};

pub const CLIENT_TOKEN: &[u8] = b"client-token";
pub const SERVER_TOKEN: &[u8] = b"server-token";
pub const CLIENT_PRINCIPAL: &str = "client@TEST";

struct FakeState {
    principal: String,
    lifetime: Mutex<Duration>,
    logins: AtomicUsize,
    contexts: AtomicUsize,
    failing_logins: AtomicUsize,
    failing_contexts: AtomicUsize,
    second_round: AtomicBool,
}

/// Cloning shares the script and counters
#[derive(Clone)]
pub struct FakeMechanism {
    state: Arc<FakeState>,
}

impl Default for FakeMechanism {
    fn default() -> Self {
        Self::new("service@TEST")
    }
}

impl FakeMechanism {
    pub fn new(principal: impl Into<String>) -> Self {
        Self {
            state: Arc::new(FakeState {
                principal: principal.into(),
                lifetime: Mutex::new(Duration::from_secs(3600)),
                logins: AtomicUsize::new(0),
                contexts: AtomicUsize::new(0),
                failing_logins: AtomicUsize::new(0),
                failing_contexts: AtomicUsize::new(0),
                second_round: AtomicBool::new(false),
            }),
        }
    }

    /// Lifetime given to credentials from later logins
    pub fn set_lifetime(&self, lifetime: Duration) {
        *self.state.lifetime.lock() = lifetime;
    }

    pub fn fail_next_logins(&self, count: usize) {
        self.state.failing_logins.store(count, Ordering::SeqCst);
    }

    pub fn fail_next_contexts(&self, count: usize) {
        self.state.failing_contexts.store(count, Ordering::SeqCst);
    }

    /// Make initiators ask for another round after the challenge
    pub fn require_second_round(&self, enabled: bool) {
        self.state.second_round.store(enabled, Ordering::SeqCst);
    }

    pub fn logins(&self) -> usize {
        self.state.logins.load(Ordering::SeqCst)
    }

    pub fn contexts(&self) -> usize {
        self.state.contexts.load(Ordering::SeqCst)
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Mechanism for FakeMechanism {
    fn acquire(&self, _role: Role, source: &IdentitySource) -> Result<Arc<dyn Credential>> {
        if Self::take_failure(&self.state.failing_logins) {
            return Err(Error::Login("scripted login failure".to_string()));
        }
        self.state.logins.fetch_add(1, Ordering::SeqCst);

        let principal = match source {
            IdentitySource::Keytab { principal, .. } => principal.clone(),
            IdentitySource::Password { username, .. } => username.clone(),
            IdentitySource::Ccache => self.state.principal.clone(),
        };
        Ok(Arc::new(FakeCredential {
            principal,
            lifetime: *self.state.lifetime.lock(),
            state: Arc::clone(&self.state),
        }))
    }
}

struct FakeCredential {
    principal: String,
    lifetime: Duration,
    state: Arc<FakeState>,
}

impl FakeCredential {
    fn context(&self, role: Role) -> Result<Box<dyn SecurityContext>> {
        if FakeMechanism::take_failure(&self.state.failing_contexts) {
            return Err(Error::mechanism("scripted context failure"));
        }
        self.state.contexts.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeContext {
            role,
            stage: 0,
            established: false,
            second_round: self.state.second_round.load(Ordering::SeqCst),
            peer: None,
        }))
    }
}

impl Credential for FakeCredential {
    fn principal(&self) -> String {
        self.principal.clone()
    }

    fn remaining_lifetime(&self) -> Result<Duration> {
        Ok(self.lifetime)
    }

    fn initiate(&self, _target: &str) -> Result<Box<dyn SecurityContext>> {
        self.context(Role::Initiator)
    }

    fn accept(&self) -> Result<Box<dyn SecurityContext>> {
        self.context(Role::Acceptor)
    }
}

struct FakeContext {
    role: Role,
    stage: u8,
    established: bool,
    second_round: bool,
    peer: Option<String>,
}

impl SecurityContext for FakeContext {
    fn step(&mut self, token: Option<&[u8]>) -> Result<Option<Vec<u8>>> {
        self.stage += 1;
        match (self.role, self.stage, token) {
            (Role::Initiator, 1, None) => Ok(Some(CLIENT_TOKEN.to_vec())),
            (Role::Initiator, 2, Some(t)) if t == SERVER_TOKEN && self.second_round => {
                Ok(Some(b"another-round".to_vec()))
            }
            (Role::Initiator, 2, Some(t)) if t == SERVER_TOKEN => {
                self.established = true;
                self.peer = Some("HTTP@TEST".to_string());
                Ok(None)
            }
            (Role::Acceptor, 1, Some(t)) if t == CLIENT_TOKEN => {
                self.established = true;
                self.peer = Some(CLIENT_PRINCIPAL.to_string());
                Ok(Some(SERVER_TOKEN.to_vec()))
            }
            _ => Err(Error::mechanism("unexpected token")),
        }
    }

    fn is_established(&self) -> bool {
        self.established
    }

    fn peer_name(&self) -> Option<String> {
        self.peer.clone()
    }
}

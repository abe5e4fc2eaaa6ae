use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::mechanism::{Role, SecurityContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    NotStarted,
    AwaitingChallenge,
    Established,
    Failed,
}

/// The outcome of accepting a client token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accepted {
    /// Token to return to the client, if the mechanism produced one
    pub reply: Option<Vec<u8>>,
    /// The authenticated client principal
    pub peer: String,
}

/// A single-use, single-round mutual authentication exchange
///
/// An initiator goes `NotStarted -> AwaitingChallenge -> Established`; an
/// acceptor goes straight from `NotStarted` to `Established`. Any error
/// moves it to `Failed` for good. Owned by one task at a time.
pub struct Handshake {
    context: Box<dyn SecurityContext>,
    role: Role,
    state: HandshakeState,
}

impl Handshake {
    pub fn new(context: Box<dyn SecurityContext>, role: Role) -> Self {
        Self {
            context,
            role,
            state: HandshakeState::NotStarted,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_established(&self) -> bool {
        self.state == HandshakeState::Established
    }

    pub fn peer_name(&self) -> Option<String> {
        self.context.peer_name()
    }

    /// Produce the initiator's opening token
    pub fn initial_token(&mut self) -> Result<Vec<u8>> {
        self.expect(Role::Initiator, HandshakeState::NotStarted)?;

        match self.step(None)? {
            Some(token) => {
                trace!(len = token.len(), "produced initial token");
                self.state = HandshakeState::AwaitingChallenge;
                Ok(token)
            }
            None => self.fail(Error::mechanism("mechanism produced no initial token")),
        }
    }

    /// Verify the acceptor's reply
    ///
    /// The context must be established after this one token; a request for
    /// a further round fails the handshake.
    pub fn complete(&mut self, challenge: &[u8]) -> Result<()> {
        self.expect(Role::Initiator, HandshakeState::AwaitingChallenge)?;

        if let Some(token) = self.step(Some(challenge))? {
            if !token.is_empty() {
                return self.fail(Error::ContinueNeeded);
            }
        }
        if !self.context.is_established() {
            return self.fail(Error::NotEstablished);
        }

        debug!("handshake established");
        self.state = HandshakeState::Established;
        Ok(())
    }

    /// Consume a client's token as the acceptor
    pub fn accept(&mut self, token: &[u8]) -> Result<Accepted> {
        self.expect(Role::Acceptor, HandshakeState::NotStarted)?;

        let reply = self.step(Some(token))?;
        if !self.context.is_established() {
            return self.fail(Error::ContinueNeeded);
        }
        let Some(peer) = self.context.peer_name() else {
            return self.fail(Error::mechanism("established context has no peer name"));
        };

        debug!(%peer, "accepted client");
        self.state = HandshakeState::Established;
        Ok(Accepted { reply, peer })
    }

    /// [`Handshake::complete`] on the blocking pool
    pub async fn finish(mut self, challenge: Vec<u8>) -> Result<Self> {
        tokio::task::spawn_blocking(move || self.complete(&challenge).map(|()| self))
            .await
            .map_err(|err| Error::Task(err.to_string()))?
    }

    fn step(&mut self, token: Option<&[u8]>) -> Result<Option<Vec<u8>>> {
        match self.context.step(token) {
            Ok(reply) => Ok(reply),
            Err(err) => self.fail(err),
        }
    }

    fn expect(&self, role: Role, state: HandshakeState) -> Result<()> {
        if self.role != role {
            return Err(Error::Handshake(format!(
                "operation needs the {role:?} role, context is {:?}",
                self.role
            )));
        }
        if self.state != state {
            return Err(Error::Handshake(format!(
                "expected state {state:?}, handshake is {:?}",
                self.state
            )));
        }
        Ok(())
    }

    fn fail<T>(&mut self, err: Error) -> Result<T> {
        self.state = HandshakeState::Failed;
        Err(err)
    }
}

impl std::fmt::Debug for Handshake {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handshake")
            .field("role", &self.role)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

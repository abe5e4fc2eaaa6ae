use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Login failed: {0}")]
    Login(String),

    #[error("Security mechanism error: {0}")]
    Mechanism(String),

    #[error("Handshake needs another round, only one is supported")]
    ContinueNeeded,

    #[error("Handshake finished without establishing a context")]
    NotEstablished,

    #[error("Handshake misuse: {0}")]
    Handshake(String),

    #[error("Unsupported identity source: {0}")]
    Unsupported(String),

    #[error("Blocking task failed: {0}")]
    Task(String),
}

impl Error {
    pub fn mechanism(msg: impl Into<String>) -> Self {
        Self::Mechanism(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

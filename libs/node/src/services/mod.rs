//! Typed interfaces to the core services

pub mod auth;
pub mod configdb;
pub mod directory;

pub use auth::{Auth, Grant};
pub use configdb::ConfigDb;
pub use directory::Directory;

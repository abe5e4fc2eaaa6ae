use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use conduit_shields::IdentitySource;
use serde::Deserialize;
use url::Url;

use crate::error::{Error, Result};

/// Connection settings for a [`crate::ServiceClient`]
///
/// Every field is optional. Preset URLs skip discovery for that service;
/// the Directory URL is needed to find anything else.
#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub directory_url: Option<Url>,
    pub authn_url: Option<Url>,
    pub configdb_url: Option<Url>,
    pub principal: Option<String>,
    pub keytab: Option<PathBuf>,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Request timeout in seconds
    pub http_timeout: Option<u64>,
}

/// How the client proves who it is
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    /// Mutual authentication from a keytab or the ticket cache
    Negotiate(IdentitySource),
    /// A static username and password exchanged for tokens
    Basic { username: String, password: String },
}

impl ClientConfig {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    /// Read the standard environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// As [`ClientConfig::from_env`], reading variables through `lookup`
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |name: &str| lookup(name).filter(|value| !value.is_empty());
        let url = |name: &str| -> Result<Option<Url>> {
            var(name)
                .map(|value| {
                    Url::parse(&value).map_err(|err| Error::config(format!("{name}: {err}")))
                })
                .transpose()
        };
        let http_timeout = var("HTTP_TIMEOUT")
            .map(|value| {
                value
                    .parse()
                    .map_err(|_| Error::config(format!("HTTP_TIMEOUT: not a number: {value}")))
            })
            .transpose()?;

        Ok(Self {
            directory_url: url("DIRECTORY_URL")?,
            authn_url: url("AUTHN_URL")?,
            configdb_url: url("CONFIGDB_URL")?,
            principal: var("SERVICE_PRINCIPAL"),
            keytab: var("CLIENT_KEYTAB").map(PathBuf::from),
            username: var("SERVICE_USERNAME"),
            password: var("SERVICE_PASSWORD"),
            http_timeout,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.http_timeout
            .map_or(Self::DEFAULT_TIMEOUT, Duration::from_secs)
    }

    /// Keytab and principal first, then username and password, then the
    /// ticket cache
    pub fn identity(&self) -> Identity {
        if let (Some(principal), Some(keytab)) = (&self.principal, &self.keytab) {
            return Identity::Negotiate(IdentitySource::Keytab {
                principal: principal.clone(),
                keytab: keytab.clone(),
            });
        }
        if let (Some(username), Some(password)) = (&self.username, &self.password) {
            return Identity::Basic {
                username: username.clone(),
                password: password.clone(),
            };
        }
        Identity::Negotiate(IdentitySource::Ccache)
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("directory_url", &self.directory_url)
            .field("authn_url", &self.authn_url)
            .field("configdb_url", &self.configdb_url)
            .field("principal", &self.principal)
            .field("keytab", &self.keytab)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("http_timeout", &self.http_timeout)
            .finish()
    }
}

use std::sync::{Arc, OnceLock};

use conduit_core::{services, ServiceId};
use conduit_fabric::transport::Connector;
use conduit_fabric::{HttpBackend, HttpClient};
use conduit_shields::{CredentialManager, Mechanism, Role};
use tracing::info;
use url::Url;

use crate::config::{ClientConfig, Identity};
use crate::error::Result;
use crate::notify::NotifyV2;
use crate::services::{Auth, ConfigDb, Directory};

struct Inner {
    config: ClientConfig,
    http: HttpClient,
    directory: OnceLock<Directory>,
    configdb: OnceLock<ConfigDb>,
    auth: OnceLock<Auth>,
}

/// Entry point to the services
///
/// Owns the process identity and the HTTP client. Service interfaces are
/// created on first use and shared by every clone.
#[derive(Clone)]
pub struct ServiceClient {
    inner: Arc<Inner>,
}

impl ServiceClient {
    pub fn builder() -> ServiceClientBuilder {
        ServiceClientBuilder::default()
    }

    /// Build from the environment with the default mechanism
    pub fn from_env() -> Result<Self> {
        Self::builder().config(ClientConfig::from_env()?).build()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn http(&self) -> &HttpClient {
        &self.inner.http
    }

    /// Resolve a service's base URL
    pub async fn service_url(&self, service: ServiceId) -> Result<Url> {
        Ok(self.inner.http.discovery().get(service).await?)
    }

    /// Preset a service's base URL
    pub fn set_service_url(&self, service: ServiceId, url: Url) {
        self.inner.http.discovery().set_service_url(service, url);
    }

    pub fn directory(&self) -> &Directory {
        self.inner
            .directory
            .get_or_init(|| Directory::new(self.inner.http.clone()))
    }

    pub fn configdb(&self) -> &ConfigDb {
        self.inner
            .configdb
            .get_or_init(|| ConfigDb::new(self.inner.http.clone()))
    }

    pub fn auth(&self) -> &Auth {
        self.inner
            .auth
            .get_or_init(|| Auth::new(self.inner.http.clone()))
    }

    /// A notify client for any service
    ///
    /// Each call opens its own socket; the typed interfaces keep theirs.
    pub fn notify(&self, service: ServiceId) -> NotifyV2 {
        NotifyV2::new(self.inner.http.clone(), service)
    }
}

/// Builder for configuring a [`ServiceClient`]
#[derive(Default)]
pub struct ServiceClientBuilder {
    config: ClientConfig,
    mechanism: Option<Arc<dyn Mechanism>>,
    credentials: Option<Arc<CredentialManager>>,
    backend: Option<Arc<dyn HttpBackend>>,
    connector: Option<Arc<dyn Connector>>,
}

impl ServiceClientBuilder {
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Security mechanism used to log in from the configured identity
    pub fn mechanism(mut self, mechanism: Arc<dyn Mechanism>) -> Self {
        self.mechanism = Some(mechanism);
        self
    }

    /// Use an existing credential manager, ignoring the configured identity
    pub fn credentials(mut self, credentials: Arc<CredentialManager>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn backend(mut self, backend: Arc<dyn HttpBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn build(self) -> Result<ServiceClient> {
        let config = self.config;
        let mut http = HttpClient::builder().timeout(config.timeout());

        http = match (self.credentials, config.identity()) {
            (Some(credentials), _) => http.negotiate(credentials),
            (None, Identity::Basic { username, password }) => {
                info!(%username, "using password authentication");
                http.basic(username, password)
            }
            (None, Identity::Negotiate(source)) => {
                let mechanism = match self.mechanism {
                    Some(mechanism) => mechanism,
                    None => default_mechanism()?,
                };
                info!(?source, "using mutual authentication");
                http.negotiate(Arc::new(CredentialManager::new(
                    mechanism,
                    Role::Initiator,
                    source,
                )))
            }
        };

        let presets = [
            (services::DIRECTORY, &config.directory_url),
            (services::AUTHENTICATION, &config.authn_url),
            (services::CONFIGDB, &config.configdb_url),
        ];
        for (service, url) in presets {
            if let Some(url) = url {
                http = http.service_url(service, url.clone());
            }
        }
        if let Some(backend) = self.backend {
            http = http.backend(backend);
        }
        if let Some(connector) = self.connector {
            http = http.connector(connector);
        }

        Ok(ServiceClient {
            inner: Arc::new(Inner {
                http: http.build()?,
                config,
                directory: OnceLock::new(),
                configdb: OnceLock::new(),
                auth: OnceLock::new(),
            }),
        })
    }
}

#[cfg(feature = "gssapi")]
fn default_mechanism() -> Result<Arc<dyn Mechanism>> {
    Ok(Arc::new(conduit_shields::krb5::Krb5Mechanism))
}

#[cfg(not(feature = "gssapi"))]
fn default_mechanism() -> Result<Arc<dyn Mechanism>> {
    Err(crate::Error::config(
        "no security mechanism: enable the gssapi feature or supply one",
    ))
}

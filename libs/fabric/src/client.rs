use std::sync::{Arc, Weak};
use std::time::Duration;

use conduit_core::{path, services, Response, ServiceError, ServiceId};
use conduit_databank::RequestCache;
use conduit_shields::CredentialManager;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use crate::auth::Authenticator;
use crate::discovery::{Discovery, Locator};
use crate::duplex::Duplex;
use crate::error::{Error, Result};
use crate::http::{HttpBackend, HttpRequest, HttpResponse, ReqwestBackend, DEFAULT_TIMEOUT};
use crate::transport::{Connector, WebSocketConnector};

/// Retries after a rejected bearer token
pub const MAX_TOKEN_RETRIES: usize = 2;

struct ClientInner {
    backend: Arc<dyn HttpBackend>,
    connector: Arc<dyn Connector>,
    timeout: Duration,
    discovery: Discovery,
    tokens: RequestCache<Url, String, Error>,
}

/// Authenticated HTTP and WebSocket access to services by [`ServiceId`]
///
/// Each call resolves the service's base URL, attaches a cached bearer
/// token for it, and retries with a fresh token when the old one is
/// rejected. Cloning shares the caches.
#[derive(Clone)]
pub struct HttpClient {
    inner: Arc<ClientInner>,
}

impl HttpClient {
    pub fn builder() -> HttpClientBuilder {
        HttpClientBuilder::new()
    }

    pub fn discovery(&self) -> &Discovery {
        &self.inner.discovery
    }

    /// Start a request to a service
    pub fn request(&self, service: ServiceId, method: Method) -> RequestBuilder {
        RequestBuilder {
            client: self.clone(),
            service,
            method,
            path: Vec::new(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn get(&self, service: ServiceId) -> RequestBuilder {
        self.request(service, Method::GET)
    }

    pub fn post(&self, service: ServiceId) -> RequestBuilder {
        self.request(service, Method::POST)
    }

    pub fn put(&self, service: ServiceId) -> RequestBuilder {
        self.request(service, Method::PUT)
    }

    pub fn delete(&self, service: ServiceId) -> RequestBuilder {
        self.request(service, Method::DELETE)
    }

    /// A bearer token for `base`, fetched once and shared
    pub async fn token(&self, base: &Url) -> Result<String> {
        self.inner.tokens.get(base.clone()).await
    }

    /// Forget `token` for `base` unless it has already been replaced
    pub fn invalidate_token(&self, base: &Url, token: &str) {
        if self.inner.tokens.invalidate(base, &token.to_string()) {
            info!(%base, "invalidated token");
        }
    }

    /// Send a request relative to the service's base URL
    ///
    /// A 401 drops the token and starts over, at most
    /// [`MAX_TOKEN_RETRIES`] times. Other statuses are returned as is.
    pub async fn execute(
        &self,
        service: ServiceId,
        method: Method,
        path: &str,
        query: &[(String, String)],
        body: Option<&Value>,
    ) -> Result<HttpResponse> {
        let mut retries = 0;
        loop {
            let base = self.inner.discovery.get(service).await?;
            let mut url = base.join(path)?;
            if !query.is_empty() {
                url.query_pairs_mut().extend_pairs(query);
            }
            let token = self.token(&base).await?;

            let mut request = HttpRequest::new(method.clone(), url)
                .header("Authorization", format!("Bearer {token}"));
            request.body = body.cloned();

            debug!(%service, method = %request.method, url = %request.url, "sending request");
            let response = self.inner.backend.execute(request).await?;
            if response.status != 401 {
                return Ok(response);
            }

            self.invalidate_token(&base, &token);
            if retries == MAX_TOKEN_RETRIES {
                warn!(%service, "token still rejected after retries");
                return Err(ServiceError::new(service, 401, "bearer token rejected").into());
            }
            retries += 1;
        }
    }

    /// Ask the Directory which URLs `service` advertises
    ///
    /// A service the Directory does not know advertises nothing. This
    /// always asks; [`Discovery`] caches its answers.
    pub async fn advertised_urls(&self, service: ServiceId) -> Result<Vec<Url>> {
        let response = self
            .get(services::DIRECTORY)
            .segments(["v1", "service"])
            .segment(service)
            .fetch()
            .await?;
        match response {
            Response::Success { body, .. } => Ok(parse_service_urls(&body)),
            Response::Empty => Ok(Vec::new()),
            Response::Failure { status } => Err(ServiceError::new(
                services::DIRECTORY,
                status,
                format!("looking up service {service}"),
            )
            .into()),
        }
    }

    /// Open an authenticated text socket to `path` on a service
    ///
    /// The first frame sent is the bearer token; the server answers with
    /// a status, `200` meaning the socket is ready. A `401` is retried
    /// with a fresh token like an HTTP request. Connecting and the token
    /// exchange together must finish within the client timeout.
    pub async fn websocket(&self, service: ServiceId, path: &str) -> Result<Duplex> {
        let mut retries = 0;
        loop {
            let base = self.inner.discovery.get(service).await?;
            let url = websocket_url(&base, path)?;
            let token = self.token(&base).await?;

            info!(%service, %url, "opening websocket");
            let handshake = async {
                let mut transport = self.inner.connector.connect(&url).await?;
                transport.send(format!("Bearer {token}")).await?;
                let reply = transport.receive().await?;
                Ok::<_, Error>((transport, reply))
            };
            let (mut transport, reply) = tokio::time::timeout(self.inner.timeout, handshake)
                .await
                .map_err(|_| {
                    warn!(%service, timeout = ?self.inner.timeout, "websocket handshake timed out");
                    Error::Timeout
                })??;

            let status = match reply.as_deref().map(str::trim) {
                Some("200") => {
                    debug!(%service, "websocket authenticated");
                    return Ok(Duplex::open(transport));
                }
                Some(code) if code.len() == 3 => code.parse().unwrap_or(0),
                _ => 0,
            };
            if let Err(err) = transport.close().await {
                debug!(error = %err, "closing rejected websocket failed");
            }

            if status != 401 {
                return Err(
                    ServiceError::new(service, status, "failed to authenticate websocket").into(),
                );
            }
            self.invalidate_token(&base, &token);
            if retries == MAX_TOKEN_RETRIES {
                return Err(ServiceError::new(service, 401, "websocket token rejected").into());
            }
            retries += 1;
        }
    }
}

fn websocket_url(base: &Url, path: &str) -> Result<Url> {
    let mut url = base.join(path)?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(Error::custom(format!("cannot open a websocket over {other}"))),
    };
    url.set_scheme(scheme)
        .map_err(|()| Error::custom(format!("cannot open a websocket to {base}")))?;
    Ok(url)
}

/// Looks services up through the Directory
///
/// Holds the client weakly, as the client owns the discovery that owns
/// this locator.
struct DirectoryLocator {
    client: Weak<ClientInner>,
}

#[async_trait::async_trait]
impl Locator for DirectoryLocator {
    async fn locate(&self, service: ServiceId) -> Result<Vec<Url>> {
        let inner = self.client.upgrade().ok_or(Error::ConnectionClosed)?;
        HttpClient { inner }.advertised_urls(service).await
    }
}

/// Directory advertisements are `[{"url": ...}, ...]`; anything else is none
fn parse_service_urls(body: &Value) -> Vec<Url> {
    body.as_array()
        .map(|ads| {
            ads.iter()
                .filter_map(|ad| ad.get("url")?.as_str())
                .filter_map(|url| Url::parse(url).ok())
                .collect()
        })
        .unwrap_or_default()
}

/// A request under construction
#[must_use]
pub struct RequestBuilder {
    client: HttpClient,
    service: ServiceId,
    method: Method,
    path: Vec<String>,
    query: Vec<(String, String)>,
    body: Option<Value>,
}

impl RequestBuilder {
    /// Append a path segment, percent-encoded
    pub fn segment(mut self, segment: impl std::fmt::Display) -> Self {
        self.path.push(path::encode_component(&segment.to_string()));
        self
    }

    pub fn segments<I>(mut self, segments: I) -> Self
    where
        I: IntoIterator,
        I::Item: std::fmt::Display,
    {
        for segment in segments {
            self = self.segment(segment);
        }
        self
    }

    /// Append an already encoded path, which may contain `/`
    pub fn raw_path(mut self, path: &str) -> Self {
        self.path.extend(
            path.trim_matches('/')
                .split('/')
                .filter(|s| !s.is_empty())
                .map(str::to_string),
        );
        self
    }

    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn json<T: Serialize>(mut self, body: &T) -> Result<Self> {
        self.body = Some(serde_json::to_value(body)?);
        Ok(self)
    }

    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Send and return the raw response
    pub async fn send(self) -> Result<HttpResponse> {
        let path = self.path.join("/");
        self.client
            .execute(
                self.service,
                self.method,
                &path,
                &self.query,
                self.body.as_ref(),
            )
            .await
    }

    /// Send and classify the response by status
    pub async fn fetch(self) -> Result<Response<Value>> {
        Ok(self.send().await?.into_response())
    }

    /// As [`RequestBuilder::fetch`], decoding a successful body as `T`
    pub async fn fetch_as<T: DeserializeOwned>(self) -> Result<Response<T>> {
        match self.fetch().await? {
            Response::Success { status, body } => {
                Ok(Response::of(status, serde_json::from_value(body)?))
            }
            Response::Empty => Ok(Response::Empty),
            Response::Failure { status } => Ok(Response::Failure { status }),
        }
    }
}

/// Builder for configuring an [`HttpClient`]
#[derive(Default)]
pub struct HttpClientBuilder {
    backend: Option<Arc<dyn HttpBackend>>,
    connector: Option<Arc<dyn Connector>>,
    authenticator: Option<Authenticator>,
    timeout: Option<Duration>,
    service_urls: Vec<(ServiceId, Url)>,
}

impl HttpClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Send requests through `backend` instead of `reqwest`
    pub fn backend(mut self, backend: Arc<dyn HttpBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Open sockets through `connector` instead of `tokio-tungstenite`
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Obtain tokens by mutual authentication
    pub fn negotiate(mut self, credentials: Arc<CredentialManager>) -> Self {
        self.authenticator = Some(Authenticator::Negotiate(credentials));
        self
    }

    /// Obtain tokens with a username and password
    pub fn basic(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.authenticator = Some(Authenticator::Basic {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    /// Bound HTTP requests of the default backend and socket handshakes
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Preset the base URL of a service
    pub fn service_url(mut self, service: ServiceId, url: Url) -> Self {
        self.service_urls.push((service, url));
        self
    }

    pub fn build(self) -> Result<HttpClient> {
        let authenticator = self
            .authenticator
            .ok_or_else(|| Error::custom("no authentication configured"))?;
        let timeout = self.timeout.unwrap_or(DEFAULT_TIMEOUT);
        let backend = match self.backend {
            Some(backend) => backend,
            None => Arc::new(ReqwestBackend::new(timeout)?),
        };
        let connector = self.connector.unwrap_or_else(|| {
            Arc::new(WebSocketConnector::builder().connect_timeout(timeout).build())
        });

        let token_backend = Arc::clone(&backend);
        let tokens = RequestCache::new(move |base: Url| {
            let backend = Arc::clone(&token_backend);
            let authenticator = authenticator.clone();
            async move { authenticator.token_for(backend.as_ref(), &base).await }
        });

        let inner = Arc::new_cyclic(|weak| ClientInner {
            backend,
            connector,
            timeout,
            discovery: Discovery::new(Arc::new(DirectoryLocator {
                client: weak.clone(),
            })),
            tokens,
        });
        for (service, url) in self.service_urls {
            inner.discovery.set_service_url(service, url);
        }

        Ok(HttpClient { inner })
    }
}

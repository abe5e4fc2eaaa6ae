use std::sync::Arc;

use conduit_core::ServiceId;
use conduit_databank::RequestCache;
use parking_lot::RwLock;
use tracing::{debug, info};
use url::Url;

use crate::error::{Error, Result};

/// Finds the advertised base URLs of a service
#[async_trait::async_trait]
pub trait Locator: Send + Sync {
    async fn locate(&self, service: ServiceId) -> Result<Vec<Url>>;
}

/// A locator that knows nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLocator;

#[async_trait::async_trait]
impl Locator for NoLocator {
    async fn locate(&self, service: ServiceId) -> Result<Vec<Url>> {
        Err(Error::NoServiceUrl(service))
    }
}

/// Resolves services to base URLs
///
/// Explicit URLs from [`Discovery::set_service_url`] win; anything else is
/// asked of the locator (normally the Directory). Results stay cached for
/// the life of the process. Cloning shares the cache.
#[derive(Clone)]
pub struct Discovery {
    cache: RequestCache<ServiceId, Vec<Url>, Error>,
    locator: Arc<RwLock<Arc<dyn Locator>>>,
}

impl Discovery {
    pub fn new(locator: Arc<dyn Locator>) -> Self {
        let locator = Arc::new(RwLock::new(locator));
        let source = Arc::clone(&locator);

        let cache = RequestCache::new(move |service: ServiceId| {
            let locator = Arc::clone(&*source.read());
            async move {
                let urls = locator.locate(service).await?;
                if urls.is_empty() {
                    return Err(Error::NoServiceUrl(service));
                }
                debug!(%service, ?urls, "located service");
                Ok(urls)
            }
        });

        Self { cache, locator }
    }

    /// Replace the lookup used for services without a cached URL
    pub fn set_locator(&self, locator: Arc<dyn Locator>) {
        *self.locator.write() = locator;
    }

    /// Use `url` for `service` from now on
    pub fn set_service_url(&self, service: ServiceId, url: Url) {
        info!(%service, %url, "service URL set");
        self.cache.put(service, vec![url]);
    }

    /// All known base URLs of a service
    pub async fn lookup(&self, service: ServiceId) -> Result<Vec<Url>> {
        self.cache.get(service).await
    }

    /// The base URL to use for a service
    pub async fn get(&self, service: ServiceId) -> Result<Url> {
        let urls = self.lookup(service).await?;
        urls.into_iter()
            .next()
            .map(normalize)
            .ok_or(Error::NoServiceUrl(service))
    }

    /// Report a URL as not working
    ///
    /// Resolutions are currently permanent, so this only logs.
    pub fn remove(&self, service: ServiceId, url: &Url) {
        debug!(%service, %url, "ignoring report of bad service URL");
    }
}

/// An empty path would make relative joins replace the last segment
fn normalize(mut url: Url) -> Url {
    if url.path().is_empty() {
        url.set_path("/");
    }
    url
}

use conduit_core::{services, ServiceError, ServiceId};
use conduit_fabric::HttpClient;
use serde_json::json;
use tracing::info;
use url::Url;

use crate::error::Result;

const SERVICE: ServiceId = services::DIRECTORY;

/// The Directory, mapping services to the URLs they advertise
#[derive(Clone)]
pub struct Directory {
    http: HttpClient,
}

impl Directory {
    pub fn new(http: HttpClient) -> Self {
        Self { http }
    }

    /// Every URL currently advertised for `service`
    ///
    /// Asks the Directory each time, unlike [`HttpClient::discovery`].
    pub async fn service_urls(&self, service: ServiceId) -> Result<Vec<Url>> {
        Ok(self.http.advertised_urls(service).await?)
    }

    /// Advertise `url` as a location of `service`
    pub async fn register_service_url(&self, service: ServiceId, url: &Url) -> Result<()> {
        let status = self
            .http
            .put(SERVICE)
            .segments(["v1", "service"])
            .segment(service)
            .segment("advertisment")
            .body(json!({ "url": url }))
            .send()
            .await?
            .status;
        if status >= 300 {
            return Err(ServiceError::new(
                SERVICE,
                status,
                format!("can't register URL for service {service}"),
            )
            .into());
        }
        info!(%service, %url, "registered service URL");
        Ok(())
    }
}

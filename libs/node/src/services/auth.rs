use std::collections::BTreeSet;
use std::time::Duration;

use conduit_core::{path, services, Response, ServiceError, ServiceId};
use conduit_databank::{CachedStream, StreamCache};
use conduit_fabric::HttpClient;
use futures::stream::{BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::notify::NotifyV2;

const SERVICE: ServiceId = services::AUTHENTICATION;

/// How long an unwatched ACL is kept up to date
pub const ACL_LINGER: Duration = Duration::from_secs(30 * 60);

/// A permission granted on a target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Grant {
    pub permission: Uuid,
    pub target: Uuid,
}

pub type Acl = BTreeSet<Grant>;

/// The Authentication service
#[derive(Clone)]
pub struct Auth {
    http: HttpClient,
    acls: StreamCache<String, Result<Response<Acl>>>,
}

impl Auth {
    pub fn new(http: HttpClient) -> Self {
        let notify = NotifyV2::new(http.clone(), SERVICE);
        Self::with_notify(http, notify)
    }

    pub fn with_notify(http: HttpClient, notify: NotifyV2) -> Self {
        let acls = StreamCache::builder(move |path: &String| watch_acl(&notify, path))
            .with_replay()
            .with_timeout(ACL_LINGER)
            .build();
        Self { http, acls }
    }

    /// Fetch the grants held by a principal over HTTP
    ///
    /// Makes a fresh request every time. `permission` names the permission
    /// group, which current servers ignore.
    pub async fn get_acl(
        &self,
        principal: &str,
        permission: Uuid,
    ) -> Result<Vec<Map<String, Value>>> {
        let response = self
            .http
            .get(SERVICE)
            .segments(["authz", "acl"])
            .query("principal", principal)
            .query("permission", permission.to_string())
            .fetch()
            .await?;
        let acl = match response {
            Response::Success {
                body: Value::Array(acl),
                ..
            } => acl,
            other => {
                return Err(ServiceError::new(
                    SERVICE,
                    other.status(),
                    format!("can't fetch ACL for {principal}"),
                )
                .into())
            }
        };
        info!(%principal, grants = acl.len(), "fetched ACL");

        Ok(acl
            .into_iter()
            .filter_map(|grant| match grant {
                Value::Object(grant) => Some(grant),
                _ => None,
            })
            .collect())
    }

    /// Follow a Kerberos principal's grants over notify
    ///
    /// Shared between callers and kept live for [`ACL_LINGER`] after the
    /// last one goes away.
    pub fn watch_acl(&self, principal: &str) -> CachedStream<Result<Response<Acl>>> {
        self.acls.get(path::join(["v2", "acl", "kerberos", principal]))
    }

    /// The current grants of a principal, through the shared watch
    ///
    /// `None` if the principal has no ACL or the watch ended first.
    pub async fn fetch_acl(&self, principal: &str) -> Result<Option<Acl>> {
        let Some(first) = self.watch_acl(principal).next().await else {
            return Ok(None);
        };
        let acl = first?.into_service_result(SERVICE, format!("fetching ACL for {principal}"))?;
        Ok(acl)
    }
}

fn watch_acl(notify: &NotifyV2, path: &str) -> BoxStream<'static, Result<Response<Acl>>> {
    let path = path.to_string();
    notify
        .watch_full(&path)
        .map(move |response| {
            response.map(|response| {
                response.and_then(|grants| match serde_json::from_value::<Acl>(grants) {
                    Ok(acl) => Response::ok(acl),
                    Err(err) => {
                        warn!(%path, error = %err, "ignoring malformed ACL");
                        Response::Empty
                    }
                })
            })
        })
        .boxed()
}

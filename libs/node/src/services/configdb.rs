use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Display;

use conduit_core::{path, services, Response, ServiceError, ServiceId};
use conduit_databank::{CachedStream, StreamCache};
use conduit_fabric::HttpClient;
use futures::future;
use futures::stream::{BoxStream, StreamExt};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::Result;
use crate::notify::NotifyV2;

const SERVICE: ServiceId = services::CONFIGDB;

pub type UuidSet = BTreeSet<Uuid>;

/// The ConfigDB
///
/// Set-valued watches are shared: every caller watching the same path
/// gets the same upstream subscription and the latest set straight away.
#[derive(Clone)]
pub struct ConfigDb {
    http: HttpClient,
    notify: NotifyV2,
    sets: StreamCache<String, Result<UuidSet>>,
}

impl ConfigDb {
    pub fn new(http: HttpClient) -> Self {
        let notify = NotifyV2::new(http.clone(), SERVICE);
        Self::with_notify(http, notify)
    }

    pub fn with_notify(http: HttpClient, notify: NotifyV2) -> Self {
        let watcher = notify.clone();
        let sets = StreamCache::builder(move |path: &String| watch_uuid_set(&watcher, path))
            .with_replay()
            .build();
        Self { http, notify, sets }
    }

    pub fn notify(&self) -> &NotifyV2 {
        &self.notify
    }

    /// Fetch one config entry, which must be a JSON object
    pub async fn get_config(&self, app: Uuid, obj: Uuid) -> Result<Map<String, Value>> {
        let response = self
            .http
            .get(SERVICE)
            .segments(["v1", "app"])
            .segment(app)
            .segment("object")
            .segment(obj)
            .fetch()
            .await?;
        match response {
            Response::Success {
                body: Value::Object(entry),
                ..
            } => Ok(entry),
            other => Err(ServiceError::new(
                SERVICE,
                other.status(),
                format!("can't fetch ConfigDB entry {app}/{obj}"),
            )
            .into()),
        }
    }

    /// Follow a config entry; `None` while it is missing
    ///
    /// Not shared between callers.
    pub fn watch_config(&self, app: Uuid, obj: Uuid) -> BoxStream<'static, Result<Option<Value>>> {
        self.notify.watch(&format!("v2/app/{app}/object/{obj}"))
    }

    /// Follow a path whose value is a list of UUIDs
    ///
    /// A trailing `/` is added to the path. Missing or malformed values are
    /// seen as the empty set, entries that are not UUIDs are ignored, and
    /// repeats of the same set are suppressed.
    pub fn watch_set<I>(&self, parts: I) -> CachedStream<Result<UuidSet>>
    where
        I: IntoIterator,
        I::Item: Display,
    {
        self.sets.get(path::join_dir(parts))
    }

    /// The objects that have an entry for `app`
    pub fn watch_list(&self, app: Uuid) -> CachedStream<Result<UuidSet>> {
        let app = app.to_string();
        self.watch_set(["v1", "app", app.as_str(), "object"])
    }

    pub fn watch_members(&self, class: Uuid) -> CachedStream<Result<UuidSet>> {
        self.watch_class(class, &["member"])
    }

    pub fn watch_subclasses(&self, class: Uuid) -> CachedStream<Result<UuidSet>> {
        self.watch_class(class, &["subclass"])
    }

    pub fn watch_direct_members(&self, class: Uuid) -> CachedStream<Result<UuidSet>> {
        self.watch_class(class, &["direct", "member"])
    }

    pub fn watch_direct_subclasses(&self, class: Uuid) -> CachedStream<Result<UuidSet>> {
        self.watch_class(class, &["direct", "subclass"])
    }

    fn watch_class(&self, class: Uuid, relation: &[&str]) -> CachedStream<Result<UuidSet>> {
        let mut parts = vec!["v2".to_string(), "class".into(), class.to_string()];
        parts.extend(relation.iter().map(|part| part.to_string()));
        self.watch_set(parts)
    }

    /// Every entry for `app`, re-emitted whole whenever one changes
    ///
    /// Not shared between callers.
    pub fn search_app(&self, app: Uuid) -> BoxStream<'static, Result<BTreeMap<Uuid, Value>>> {
        self.notify
            .search(&format!("v1/app/{app}/object"))
            .map(|entries| {
                entries.map(|entries| {
                    entries
                        .into_iter()
                        .filter_map(|(name, value)| Some((name.parse().ok()?, value)))
                        .collect()
                })
            })
            .boxed()
    }
}

fn watch_uuid_set(notify: &NotifyV2, path: &str) -> BoxStream<'static, Result<UuidSet>> {
    notify
        .watch(path)
        .map(|value| value.map(|value| value.map(|value| uuid_set(&value)).unwrap_or_default()))
        .scan(None, |last: &mut Option<UuidSet>, item| {
            let item = match item {
                Ok(set) if last.as_ref() == Some(&set) => None,
                Ok(set) => {
                    *last = Some(set.clone());
                    Some(Ok(set))
                }
                Err(err) => {
                    *last = None;
                    Some(Err(err))
                }
            };
            future::ready(Some(item))
        })
        .filter_map(future::ready)
        .boxed()
}

/// Parse a JSON array of UUID strings, skipping anything else
pub fn uuid_set(value: &Value) -> UuidSet {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .filter_map(|item| item.parse().ok())
                .collect()
        })
        .unwrap_or_default()
}

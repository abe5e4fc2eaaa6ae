//! The notify/v2 subscription protocol
//!
//! Many requests share one [`ReconnectingSocket`] per service. Each
//! request gets a fresh correlation id every time it is issued on a
//! connection, and only updates carrying that id are delivered to it.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use conduit_core::{Response, ServiceId};
use conduit_fabric::channel::Receiver;
use conduit_fabric::codec::JsonCodec;
use conduit_fabric::{Attachment, Channel, Duplex, HttpClient, ReconnectingSocket, ServiceDialer};
use futures::future;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Socket path of the notify interface on a service
pub const NOTIFY_PATH: &str = "notify/v2";

/// Status that ends a subscription without error
pub const GONE: u16 = 410;

/// Children of a searched parent, by name
pub type ChildMap = BTreeMap<String, Response<Value>>;

/// What a subscription asks the server for
#[derive(Debug, Clone, PartialEq)]
pub enum NotifyRequest {
    /// Changes to a single resource
    Watch { url: String },
    /// The full set of children under `parent`
    Search {
        parent: String,
        filter: Option<Value>,
    },
}

impl NotifyRequest {
    pub fn watch(url: impl Into<String>) -> Self {
        Self::Watch { url: url.into() }
    }

    /// Search under `parent`, which is given a trailing `/` if missing
    pub fn search(parent: impl Into<String>) -> Self {
        let mut parent = parent.into();
        if !parent.ends_with('/') {
            parent.push('/');
        }
        Self::Search {
            parent,
            filter: None,
        }
    }

    /// Restrict a search; has no effect on a watch
    pub fn with_filter(self, filter: Value) -> Self {
        match self {
            Self::Search { parent, .. } => Self::Search {
                parent,
                filter: Some(filter),
            },
            watch => watch,
        }
    }

    fn message(&self, uuid: Uuid) -> Message<'_> {
        match self {
            Self::Watch { url } => Message::Watch {
                uuid,
                request: Target { url },
            },
            Self::Search { parent, filter } => Message::Search {
                uuid,
                parent,
                filter: filter.as_ref(),
            },
        }
    }
}

impl fmt::Display for NotifyRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Watch { url } => write!(f, "WATCH {url}"),
            Self::Search {
                parent,
                filter: None,
            } => write!(f, "SEARCH {parent}"),
            Self::Search {
                parent,
                filter: Some(filter),
            } => write!(f, "SEARCH {parent} filter {filter}"),
        }
    }
}

/// Frames sent to the server
#[derive(Debug, Serialize)]
#[serde(tag = "method", rename_all = "UPPERCASE")]
enum Message<'a> {
    Watch {
        uuid: Uuid,
        request: Target<'a>,
    },
    Search {
        uuid: Uuid,
        parent: &'a str,
        #[serde(skip_serializing_if = "Option::is_none")]
        filter: Option<&'a Value>,
    },
    Close {
        uuid: Uuid,
    },
}

#[derive(Debug, Serialize)]
struct Target<'a> {
    url: &'a str,
}

/// One update from the server
///
/// `content` holds every field other than `uuid` and `status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotifyUpdate {
    pub uuid: Uuid,
    pub status: u16,
    #[serde(flatten)]
    pub content: Map<String, Value>,
}

impl NotifyUpdate {
    pub fn is_ok(&self) -> bool {
        self.status < 300
    }

    /// The resource response carried by this update
    ///
    /// Read from the nested `response` object when there is one, otherwise
    /// from the update's own status and `body`.
    pub fn response(&self) -> Response<Value> {
        match self.content.get("response") {
            Some(response) => Response::from_json(response),
            None => Response::of(
                self.status,
                self.content.get("body").cloned().unwrap_or(Value::Null),
            ),
        }
    }

    /// The child a partial search update is about
    pub fn child(&self) -> Option<&str> {
        self.content.get("child").and_then(Value::as_str)
    }

    /// The complete child map of a full search update
    pub fn children(&self) -> Option<ChildMap> {
        let children = self.content.get("children")?.as_object()?;
        Some(
            children
                .iter()
                .map(|(name, response)| (name.clone(), Response::from_json(response)))
                .collect(),
        )
    }
}

/// Fold one search update into the materialized child map
///
/// A full update replaces the map; a partial one edits a single child,
/// removing it when its response is empty.
pub fn apply_search_update(state: &mut Response<ChildMap>, update: &NotifyUpdate) {
    let response = update.response();
    match update.child() {
        Some(child) => {
            if let Response::Success { body: children, .. } = state {
                if response.is_empty() {
                    children.remove(child);
                } else {
                    children.insert(child.to_string(), response);
                }
            }
        }
        None => *state = response.and_then(|_| Response::from_option(update.children())),
    }
}

/// Client for the notify/v2 interface of one service
#[derive(Clone)]
pub struct NotifyV2 {
    service: ServiceId,
    socket: ReconnectingSocket,
}

impl NotifyV2 {
    pub fn new(client: HttpClient, service: ServiceId) -> Self {
        let dialer = ServiceDialer::new(client, service, NOTIFY_PATH);
        Self::with_socket(service, ReconnectingSocket::new(Arc::new(dialer)))
    }

    /// Use an already configured socket
    pub fn with_socket(service: ServiceId, socket: ReconnectingSocket) -> Self {
        Self { service, socket }
    }

    pub fn service(&self) -> ServiceId {
        self.service
    }

    pub fn socket(&self) -> &ReconnectingSocket {
        &self.socket
    }

    /// Issue a request and stream its successful updates
    ///
    /// Nothing is sent until the stream is first polled. The request is
    /// reissued under a new id whenever the socket reconnects, and when
    /// updates were lost because the stream was not read fast enough;
    /// either way it starts over from the current state. A 410 ends
    /// the stream; any other failure status is yielded as an error, after
    /// which the stream ends. Dropping the stream sends a CLOSE.
    pub fn request(&self, request: NotifyRequest) -> BoxStream<'static, Result<NotifyUpdate>> {
        let subscription = Subscription {
            service: self.service,
            socket: self.socket.clone(),
            request,
            attachment: None,
            active: None,
            finished: false,
        };
        stream::unfold(subscription, |mut subscription| async move {
            let item = subscription.next().await?;
            Some((item, subscription))
        })
        .boxed()
    }

    /// Watch a resource, yielding each of its responses
    pub fn watch_full(&self, url: &str) -> BoxStream<'static, Result<Response<Value>>> {
        self.request(NotifyRequest::watch(url))
            .map(|update| update.map(|update| update.response()))
            .boxed()
    }

    /// Watch a resource's value
    ///
    /// A missing resource yields `None`. A failure response is yielded as
    /// an error and ends the stream.
    pub fn watch(&self, url: &str) -> BoxStream<'static, Result<Option<Value>>> {
        let service = self.service;
        let url = url.to_string();
        let values = self.watch_full(&url).map(move |item| {
            item.and_then(|response| {
                response
                    .into_service_result(service, format!("watching {url}"))
                    .map_err(Error::from)
            })
        });
        end_after_error(values.boxed())
    }

    /// Search under a parent, yielding the whole child map after each update
    pub fn search_full(
        &self,
        request: NotifyRequest,
    ) -> BoxStream<'static, Result<Response<ChildMap>>> {
        self.request(request)
            .scan(Response::<ChildMap>::Empty, |state, update| {
                let item = update.map(|update| {
                    apply_search_update(state, &update);
                    state.clone()
                });
                future::ready(Some(item))
            })
            .boxed()
    }

    /// The successful children under `parent`, by name
    ///
    /// Updates made while the parent itself is missing or failing are
    /// skipped.
    pub fn search(&self, parent: &str) -> BoxStream<'static, Result<BTreeMap<String, Value>>> {
        self.search_request(NotifyRequest::search(parent))
    }

    /// As [`NotifyV2::search`], with a server-side filter
    pub fn search_filtered(
        &self,
        parent: &str,
        filter: Value,
    ) -> BoxStream<'static, Result<BTreeMap<String, Value>>> {
        self.search_request(NotifyRequest::search(parent).with_filter(filter))
    }

    fn search_request(
        &self,
        request: NotifyRequest,
    ) -> BoxStream<'static, Result<BTreeMap<String, Value>>> {
        self.search_full(request)
            .filter_map(|item| {
                future::ready(match item {
                    Ok(Response::Success { body, .. }) => Some(Ok(body
                        .into_iter()
                        .filter_map(|(name, response)| Some((name, response.into_option()?)))
                        .collect())),
                    Ok(_) => None,
                    Err(err) => Some(Err(err)),
                })
            })
            .boxed()
    }
}

fn end_after_error<T: Send + 'static>(
    stream: BoxStream<'static, Result<T>>,
) -> BoxStream<'static, Result<T>> {
    stream
        .scan(false, |failed, item| {
            if *failed {
                return future::ready(None);
            }
            *failed = item.is_err();
            future::ready(Some(item))
        })
        .boxed()
}

/// State behind a request stream
struct Subscription {
    service: ServiceId,
    socket: ReconnectingSocket,
    request: NotifyRequest,
    attachment: Option<Attachment>,
    active: Option<Active>,
    finished: bool,
}

impl Subscription {
    async fn next(&mut self) -> Option<Result<NotifyUpdate>> {
        if self.finished {
            return None;
        }
        let attachment = self.attachment.get_or_insert_with(|| self.socket.attach());

        loop {
            if self.active.is_none() {
                let duplex = attachment.next_connection().await?;
                match Active::open(duplex, &self.request).await {
                    Ok(active) => self.active = Some(active),
                    Err(err) => {
                        debug!(request = %self.request, error = %err, "notify request not sent");
                        continue;
                    }
                }
            }
            let Some(active) = self.active.as_mut() else {
                continue;
            };

            let update = match active.updates.receive::<NotifyUpdate>().await {
                Ok(Some(update)) => update,
                Ok(None) => {
                    debug!(uuid = %active.uuid, "notify connection lost");
                    self.active = None;
                    continue;
                }
                Err(err) => {
                    // Updates were lost; a new request starts from the current state
                    warn!(uuid = %active.uuid, error = %err, "notify request fell behind");
                    let duplex = active.channel.duplex().clone();
                    self.active = None;
                    match Active::open(duplex, &self.request).await {
                        Ok(active) => self.active = Some(active),
                        Err(err) => debug!(
                            request = %self.request,
                            error = %err,
                            "notify request not reissued"
                        ),
                    }
                    continue;
                }
            };
            if update.uuid != active.uuid {
                continue;
            }

            if update.status == GONE {
                debug!(uuid = %update.uuid, "notify request finished");
                self.finish();
                return None;
            }
            if !update.is_ok() {
                warn!(uuid = %update.uuid, status = update.status, "notify error");
                let err = Error::Notify {
                    service: self.service,
                    status: update.status,
                    request: self.request.clone(),
                };
                self.finish();
                return Some(Err(err));
            }
            return Some(Ok(update));
        }
    }

    fn finish(&mut self) {
        self.finished = true;
        // Close on the live connection before detaching from it
        self.active = None;
        self.attachment = None;
    }
}

/// A request as issued on one connection
struct Active {
    uuid: Uuid,
    channel: Channel<JsonCodec>,
    updates: Receiver<JsonCodec>,
}

impl Active {
    async fn open(duplex: Duplex, request: &NotifyRequest) -> conduit_fabric::Result<Self> {
        let uuid = Uuid::new_v4();
        let channel = Channel::new(duplex, JsonCodec);
        // Subscribe before sending so the first reply cannot be missed
        let updates = channel.subscribe();
        info!(%uuid, %request, "notify request");
        channel.send(&request.message(uuid)).await?;
        Ok(Self {
            uuid,
            channel,
            updates,
        })
    }
}

impl Drop for Active {
    fn drop(&mut self) {
        info!(uuid = %self.uuid, "notify close");
        if let Err(err) = self.channel.try_send(&Message::Close { uuid: self.uuid }) {
            debug!(uuid = %self.uuid, error = %err, "notify close not sent");
        }
    }
}

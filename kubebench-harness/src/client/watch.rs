use std::fmt::Debug;

use futures::StreamExt;
use kube::Api;
use kube::api::{ListParams, WatchEvent, WatchParams};
use serde::de::DeserializeOwned;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::Object;
use crate::error::{Error, Result};

/// A change notification delivered by a watch.
#[derive(Clone, Debug)]
pub enum Event {
    /// An object was created.
    Added(Object),
    /// An object was updated.
    Modified(Object),
    /// An object was deleted.
    Deleted(Object),
    /// A progress marker without an object change.
    Bookmark,
}

impl Event {
    fn from_watch<K>(event: WatchEvent<K>, wrap: impl Fn(K) -> Object) -> Result<Self> {
        Ok(match event {
            WatchEvent::Added(object) => Self::Added(wrap(object)),
            WatchEvent::Modified(object) => Self::Modified(wrap(object)),
            WatchEvent::Deleted(object) => Self::Deleted(wrap(object)),
            WatchEvent::Bookmark(_) => Self::Bookmark,
            WatchEvent::Error(response) => return Err(kube::Error::Api(response).into()),
        })
    }
}

/// A pull-based stream of watch events.
///
/// Events are received by a background task. Calling [`stop`](Self::stop) or dropping the stream
/// terminates the subscription.
#[derive(Debug)]
pub struct EventStream {
    events: mpsc::UnboundedReceiver<Result<Event>>,
    task: JoinHandle<()>,
}

impl EventStream {
    /// Waits for the next event.
    ///
    /// Returns `None` once the server has closed the watch.
    pub async fn next(&mut self) -> Option<Result<Event>> {
        self.events.recv().await
    }

    /// Terminates the subscription.
    pub fn stop(self) {
        self.task.abort();
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Resolves the resource version a new watch should start from.
///
/// A one-item consistent list returns the collection's current version, so the watch only
/// delivers changes that happen after it was opened. The bound list options are not used here: a
/// list answered from the watch cache may report a stale version, and watching from it would
/// replay earlier creations.
pub(super) async fn start_version<K>(api: &Api<K>) -> Result<String>
where
    K: Clone + DeserializeOwned + Debug,
{
    let list = api.list(&ListParams::default().limit(1)).await?;
    Ok(list
        .metadata
        .resource_version
        .unwrap_or_else(|| "0".to_owned()))
}

/// Opens a watch on `api` and forwards its events into an [`EventStream`].
pub(super) async fn open<K, F>(api: Api<K>, version: String, wrap: F) -> Result<EventStream>
where
    K: Clone + DeserializeOwned + Debug + Send + 'static,
    F: Fn(K) -> Object + Send + Sync + 'static,
{
    let (ready_tx, ready_rx) = oneshot::channel();
    let (events_tx, events) = mpsc::unbounded_channel();

    let task = tokio::spawn(async move {
        let params = WatchParams::default();
        let stream = match api.watch(&params, &version).await {
            Ok(stream) => stream,
            Err(error) => {
                ready_tx.send(Err(error)).ok();
                return;
            }
        };
        if ready_tx.send(Ok(())).is_err() {
            return;
        }

        let mut stream = std::pin::pin!(stream);
        while let Some(event) = stream.next().await {
            let event = event
                .map_err(Error::from)
                .and_then(|event| Event::from_watch(event, &wrap));
            if events_tx.send(event).is_err() {
                break;
            }
        }
    });

    match ready_rx.await {
        Ok(Ok(())) => Ok(EventStream { events, task }),
        Ok(Err(error)) => Err(error.into()),
        Err(_) => Err(Error::TaskPanicked(
            "watch task exited before subscribing".to_owned(),
        )),
    }
}

//! Backend-pushed event streams and scoped listener handles.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::{trace, warn};

use crate::model::DownloadProgress;

pub const PROGRESS_EVENT: &str = "updater-progress";
pub const FINISHED_EVENT: &str = "updater-finished";

/// Capacity of the broadcast channel behind an [`EventHub`].
/// A slow listener skips ahead instead of blocking emitters.
const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload")]
pub enum BackendEvent {
    #[serde(rename = "updater-progress")]
    Progress(DownloadProgress),
    #[serde(rename = "updater-finished")]
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Progress,
    Finished,
}

impl EventKind {
    pub fn name(self) -> &'static str {
        match self {
            EventKind::Progress => PROGRESS_EVENT,
            EventKind::Finished => FINISHED_EVENT,
        }
    }
}

impl BackendEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            BackendEvent::Progress(_) => EventKind::Progress,
            BackendEvent::Finished => EventKind::Finished,
        }
    }
}

/// Fan-out point for backend events.
///
/// Backends emit into the hub, views attach listeners with [`EventHub::listen`].
/// Cloning the hub shares the underlying channel.
#[derive(Debug, Clone)]
pub struct EventHub {
    tx: broadcast::Sender<BackendEvent>,
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    /// Publish an event to every live listener. Having no listeners is not an error.
    pub fn emit(&self, event: BackendEvent) {
        trace!(event = event.kind().name(), "emitting backend event");
        let _ = self.tx.send(event);
    }

    /// Raw receiver over every event kind, used when forwarding events as a whole.
    pub fn subscribe(&self) -> broadcast::Receiver<BackendEvent> {
        self.tx.subscribe()
    }

    /// Run `handler` for each event of `kind` until the returned [`Subscription`] is dropped.
    ///
    /// The receiver is attached before this returns, so no event emitted afterwards is missed.
    /// Must be called from within a tokio runtime.
    pub fn listen<F>(&self, kind: EventKind, mut handler: F) -> Subscription
    where
        F: FnMut(BackendEvent) + Send + 'static,
    {
        let mut stream = BroadcastStream::new(self.tx.subscribe());
        let task = tokio::spawn(async move {
            while let Some(item) = stream.next().await {
                match item {
                    Ok(event) if event.kind() == kind => handler(event),
                    Ok(_) => {}
                    Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                        warn!(event = kind.name(), skipped, "listener fell behind, events dropped");
                    }
                }
            }
        });

        Subscription { kind, task: Some(task) }
    }

    /// Number of receivers currently attached, including raw ones.
    pub fn listener_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Handle to an active listener. Dropping it stops the listener.
#[derive(Debug)]
pub struct Subscription {
    kind: EventKind,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Stop the listener and wait until its receiver has been released.
    pub async fn unsubscribe(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            // the task only ends by cancellation here, the error carries nothing of interest
            let _ = task.await;
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[test]
    fn events_use_backend_names_on_the_wire() {
        let progress = BackendEvent::Progress(DownloadProgress::new(3, Some(9)));
        let json = serde_json::to_value(&progress).unwrap();
        assert_eq!(json["event"], PROGRESS_EVENT);
        assert_eq!(json["payload"]["chunk_length"], 3);

        let finished = serde_json::to_value(&BackendEvent::Finished).unwrap();
        assert_eq!(finished["event"], FINISHED_EVENT);

        let parsed: BackendEvent = serde_json::from_str(r#"{"event":"updater-finished"}"#).unwrap();
        assert_eq!(parsed, BackendEvent::Finished);
    }

    #[tokio::test]
    async fn listener_only_sees_its_kind() {
        let hub = EventHub::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (done_tx, mut done_rx) = tokio::sync::mpsc::unbounded_channel();

        let _sub = hub.listen(EventKind::Finished, {
            let seen = seen.clone();
            move |event| {
                seen.lock().unwrap().push(event);
                let _ = done_tx.send(());
            }
        });

        hub.emit(BackendEvent::Progress(DownloadProgress::new(1, None)));
        hub.emit(BackendEvent::Finished);
        done_rx.recv().await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![BackendEvent::Finished]);
    }

    #[tokio::test]
    async fn unsubscribe_releases_the_receiver() {
        let hub = EventHub::new();
        let sub = hub.listen(EventKind::Progress, |_| {});
        assert_eq!(hub.listener_count(), 1);

        sub.unsubscribe().await;
        assert_eq!(hub.listener_count(), 0);

        // emitting with nobody listening is fine
        hub.emit(BackendEvent::Finished);
    }
}

use super::types::SyncOutputEvent;
use crate::error::Error;
use futures::StreamExt;
use reqwest_eventsource::{Event, EventSource};
use tokio::sync::mpsc;

/// One message from the owner SSE subscription (spec.md §6, §9 "SSE as a
/// lazy sequence"): a delivered output, the upstream's `done` signal
/// (catch-up reached), or a transport error.
#[derive(Debug)]
pub enum StreamMessage {
    Output(SyncOutputEvent),
    Done,
    Error(Error),
}

/// A cancellable handle onto a running SSE subscription. Dropping it or
/// calling `close` tears down the underlying connection — a scoped
/// resource per the design note in spec.md §9.
pub struct OwnerSyncSubscription {
    rx: mpsc::Receiver<StreamMessage>,
    closer: Option<tokio::task::JoinHandle<()>>,
}

impl OwnerSyncSubscription {
    pub(super) fn spawn(mut source: EventSource) -> Self {
        let (tx, rx) = mpsc::channel(256);
        let closer = tokio::spawn(async move {
            while let Some(event) = source.next().await {
                let msg = match event {
                    Ok(Event::Open) => continue,
                    Ok(Event::Message(m)) if m.event == "done" => StreamMessage::Done,
                    Ok(Event::Message(m)) => match serde_json::from_str::<SyncOutputEvent>(&m.data) {
                        Ok(parsed) => StreamMessage::Output(parsed),
                        Err(e) => StreamMessage::Error(Error::Stream(format!("bad SSE payload: {e}"))),
                    },
                    Err(e) => StreamMessage::Error(Error::Stream(e.to_string())),
                };
                let is_terminal = matches!(msg, StreamMessage::Done | StreamMessage::Error(_));
                if tx.send(msg).await.is_err() || is_terminal {
                    break;
                }
            }
            source.close();
        });
        OwnerSyncSubscription { rx, closer: Some(closer) }
    }

    /// Awaits the next message. Returns `None` once the subscription has
    /// been closed and drained.
    pub async fn next(&mut self) -> Option<StreamMessage> {
        self.rx.recv().await
    }

    /// Cooperatively tears down the subscription (spec.md §4.5 `stopSync`).
    pub async fn close(mut self) {
        self.rx.close();
        if let Some(handle) = self.closer.take() {
            handle.abort();
        }
    }
}

impl Drop for OwnerSyncSubscription {
    fn drop(&mut self) {
        if let Some(handle) = self.closer.take() {
            handle.abort();
        }
    }
}

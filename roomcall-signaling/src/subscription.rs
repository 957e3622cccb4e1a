use crate::store::RelayChannel;
use roomcall_protocol::RoomDocument;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, instrument};

/// Listens for changes of a room document and hands every new state to a callback.
///
/// The relay only guarantees the latest state, so the callback may see the same fields several
/// times and has to skip what it consumed before.
#[derive(Debug)]
pub struct RelaySubscription {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl RelaySubscription {
    #[instrument(level = "debug", skip(relay, on_document), err)]
    pub async fn start<R, F>(relay: &R, room_id: &str, on_document: F) -> anyhow::Result<Self>
    where
        R: RelayChannel + ?Sized,
        F: Fn(RoomDocument) + Send + 'static,
    {
        let mut rx = relay.subscribe(room_id).await?;
        let cancel = CancellationToken::new();

        let task_cancel = cancel.clone();
        let task = tokio::spawn(
            async move {
                tracing::debug!("Starting relay reader task");
                loop {
                    let doc = rx.borrow_and_update().clone();
                    match doc {
                        Some(doc) => on_document(doc),
                        None => tracing::trace!("Room document does not exist"),
                    }

                    tokio::select! {
                        biased;

                        _ = task_cancel.cancelled() => {
                            tracing::debug!("Stop signal received, exiting relay reader task");
                            break;
                        }

                        changed = rx.changed() => {
                            if changed.is_err() {
                                tracing::debug!("Relay closed, exiting relay reader task");
                                break;
                            }
                        }
                    }
                }
            }
            .instrument(tracing::Span::current()),
        );

        Ok(Self {
            cancel,
            task: Some(task),
        })
    }

    #[instrument(level = "debug", skip(self))]
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take()
            && let Err(err) = task.await
        {
            tracing::warn!(?err, "Relay reader task failed");
        }
    }
}

impl Drop for RelaySubscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use pretty_assertions::assert_eq;
    use serde_json::{Value, json};
    use test_log::test;
    use tokio::sync::mpsc;

    #[test(tokio::test)]
    async fn forwards_documents_until_stopped() {
        let store = MemoryStore::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let subscription = RelaySubscription::start(&store, "room", move |doc| {
            tx.send(doc).ok();
        })
        .await
        .unwrap();

        let mut patch = RoomDocument::new();
        patch.insert("sdpOffer".to_string(), json!("v=0"));
        store.publish("room", patch.clone()).await.unwrap();

        let doc = rx.recv().await.unwrap();
        assert_eq!(Value::Object(doc), json!({"sdpOffer": "v=0"}));

        subscription.stop().await;
        store.publish("room", patch).await.unwrap();
        assert_eq!(rx.recv().await, None);
    }

    #[test(tokio::test)]
    async fn existing_document_delivered_on_start() {
        let store = MemoryStore::new();
        let mut patch = RoomDocument::new();
        patch.insert("participantCount".to_string(), json!(1));
        store.publish("room", patch.clone()).await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let subscription = RelaySubscription::start(&store, "room", move |doc| {
            tx.send(doc).ok();
        })
        .await
        .unwrap();

        assert_eq!(rx.recv().await, Some(patch));
        subscription.stop().await;
    }
}

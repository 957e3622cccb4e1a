use crate::codec;
use crate::error::NegotiationError;
use crate::store::RelayChannel;
use roomcall_protocol::SignalingMessage;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, instrument};

/// Queues signaling messages for the relay writer.
///
/// Publishing never blocks the caller. Messages are written in the order they were published, so
/// later writes to the same field always win.
#[derive(Debug, Clone)]
pub struct Publisher {
    tx: mpsc::UnboundedSender<SignalingMessage>,
}

impl Publisher {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SignalingMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn publish(&self, message: SignalingMessage) {
        tracing::trace!(kind = message.kind(), "Queueing signaling message");
        if let Err(err) = self.tx.send(message) {
            tracing::debug!(kind = err.0.kind(), "Relay writer stopped, dropping message");
        }
    }
}

/// Task writing published messages into the room document.
///
/// A failed write is logged and dropped. Every field is rewritten by the next message touching
/// it, so a failure never stops the negotiation.
#[derive(Debug)]
pub struct RelayWriter {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl RelayWriter {
    pub fn spawn<R: RelayChannel + ?Sized>(
        relay: Arc<R>,
        room_id: String,
        rx: mpsc::UnboundedReceiver<SignalingMessage>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(
            Self::writer_task(relay, room_id, rx, cancel.clone())
                .instrument(tracing::Span::current()),
        );
        Self {
            cancel,
            task: Some(task),
        }
    }

    #[instrument(level = "debug", skip(self))]
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take()
            && let Err(err) = task.await
        {
            tracing::warn!(?err, "Relay writer task failed");
        }
    }

    async fn writer_task<R: RelayChannel + ?Sized>(
        relay: Arc<R>,
        room_id: String,
        mut rx: mpsc::UnboundedReceiver<SignalingMessage>,
        cancel: CancellationToken,
    ) {
        tracing::debug!("Starting relay writer task");

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    tracing::debug!("Stop signal received, exiting relay writer task");
                    break;
                }

                message = rx.recv() => {
                    let Some(message) = message else {
                        tracing::debug!("All publishers dropped, exiting relay writer task");
                        break;
                    };

                    tracing::debug!(kind = message.kind(), "Publishing signaling message");
                    if let Err(err) = relay.publish(&room_id, codec::encode(&message)).await {
                        let err = NegotiationError::RelayPublish {
                            kind: message.kind(),
                            reason: err.to_string(),
                        };
                        tracing::warn!(?err, "Failed to publish signaling message, dropping it");
                    }
                }
            }
        }
    }
}

impl Drop for RelayWriter {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use pretty_assertions::assert_eq;
    use roomcall_protocol::{SessionDescription, SignalingKey};
    use serde_json::json;
    use test_log::test;

    #[test(tokio::test)]
    async fn writes_in_publish_order() {
        let store = Arc::new(MemoryStore::new());
        let (publisher, rx) = Publisher::channel();
        let writer = RelayWriter::spawn(Arc::clone(&store), "room".to_string(), rx);

        let mut watch = store.subscribe("room").await.unwrap();
        publisher.publish(SignalingMessage::Offer(SessionDescription::offer("v=0")));
        publisher.publish(SignalingMessage::Clear(SignalingKey::SdpOffer));

        watch
            .wait_for(|doc| {
                doc.as_ref()
                    .is_some_and(|doc| doc.get("sdpOffer") == Some(&serde_json::Value::Null))
            })
            .await
            .unwrap();
        assert_eq!(
            serde_json::Value::Object(store.document("room").unwrap()),
            json!({"type": "offer", "sdpOffer": null})
        );

        writer.stop().await;
        publisher.publish(SignalingMessage::Clear(SignalingKey::IceOffer));
        assert_eq!(store.revision(), 2);
    }

    #[test(tokio::test)]
    async fn publish_failure_does_not_stop_writer() {
        let store = Arc::new(MemoryStore::new());
        let (publisher, rx) = Publisher::channel();
        let writer = RelayWriter::spawn(Arc::clone(&store), "room".to_string(), rx);

        let mut watch = store.subscribe("room").await.unwrap();
        store.set_available(false);
        publisher.publish(SignalingMessage::Offer(SessionDescription::offer("v=0 lost")));
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(store.revision(), 0);
        assert_eq!(store.document("room"), None);

        store.set_available(true);
        publisher.publish(SignalingMessage::Offer(SessionDescription::offer("v=0 retry")));
        watch
            .wait_for(|doc| {
                doc.as_ref()
                    .is_some_and(|doc| doc.get("sdpOffer") == Some(&json!("v=0 retry")))
            })
            .await
            .unwrap();
        assert_eq!(store.revision(), 1);

        writer.stop().await;
    }
}

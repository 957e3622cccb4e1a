use crate::transport::{OnPeerEventCb, PeerEvent};
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::instrument;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::track::track_remote::TrackRemote;

type SharedSink = Arc<Mutex<Option<mpsc::Sender<Bytes>>>>;

/// Announces tracks added by the remote peer and forwards their payloads to the remote sink.
///
/// Payloads arriving before a sink is attached are dropped.
pub struct Receiver {
    cancel: CancellationToken,
    sink: SharedSink,
}

impl Receiver {
    #[instrument(level = "trace", skip_all)]
    pub fn new(peer_connection: &RTCPeerConnection, on_event: OnPeerEventCb) -> Self {
        let cancel = CancellationToken::new();
        let sink = SharedSink::default();

        let (track_cancel, track_sink) = (cancel.clone(), Arc::clone(&sink));
        peer_connection.on_track(Box::new(move |track, _, _| {
            let stream_id = track.stream_id();
            tracing::debug!(%stream_id, kind = %track.kind(), "Remote track added");
            on_event(PeerEvent::RemoteStreamAdded(stream_id));

            Box::pin(Self::forward(
                track,
                Arc::clone(&track_sink),
                track_cancel.clone(),
            ))
        }));

        Self { cancel, sink }
    }

    async fn forward(track: Arc<TrackRemote>, sink: SharedSink, cancel: CancellationToken) {
        loop {
            let packet = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                packet = track.read_rtp() => packet,
            };

            let payload = match packet {
                Ok((packet, _)) => packet.payload,
                Err(err) => {
                    tracing::debug!(?err, "Remote track ended");
                    break;
                }
            };

            let sink = sink.lock().clone();
            if let Some(sink) = sink
                && sink.send(payload).await.is_err()
            {
                tracing::trace!("Remote sink closed");
                break;
            }
        }
    }

    pub fn attach_sink(&self, sink: mpsc::Sender<Bytes>) {
        *self.sink.lock() = Some(sink);
    }

    pub fn shutdown(&self) {
        self.sink.lock().take();
        self.cancel.cancel();
    }
}

impl Drop for Receiver {
    fn drop(&mut self) {
        self.shutdown();
    }
}

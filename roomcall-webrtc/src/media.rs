use crate::config::MEDIA_FRAME_CHANNEL_CAPACITY;
use crate::error::WebrtcError;
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::instrument;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Audio,
    Video,
}

/// A local stream handed to [`crate::PeerTransport::add_stream`].
#[derive(Debug)]
pub struct LocalStream {
    pub stream_id: String,
    pub track_id: String,
    pub kind: MediaKind,
    /// Encoded frames captured locally, written to the local track.
    pub frames: Option<mpsc::Receiver<Bytes>>,
    /// Receives the payloads of tracks added by the remote peer.
    pub remote_sink: Option<mpsc::Sender<Bytes>>,
}

impl LocalStream {
    pub fn new(kind: MediaKind) -> Self {
        let id = uuid::Uuid::new_v4().to_string();
        Self {
            stream_id: format!("stream-{id}"),
            track_id: format!("track-{id}"),
            kind,
            frames: None,
            remote_sink: None,
        }
    }
}

/// Local capture and rendering owned by a session.
///
/// Capturing and rendering themselves happen outside this crate, the pipeline only hands a stream
/// to the peer and releases its ends on teardown.
#[async_trait]
pub trait MediaPipeline: Send + 'static {
    /// Produces the local stream to attach to the peer. Can only be called once.
    fn local_stream(&mut self) -> Result<LocalStream, WebrtcError>;

    /// Stops feeding local frames and rendering remote ones.
    async fn stop_sinks(&mut self);

    async fn release_render_context(&mut self);
}

/// A [`MediaPipeline`] exchanging encoded frames through channels.
///
/// Capture writes into [`FramePipeline::source`], rendering reads from
/// [`FramePipeline::take_remote`]. Stopping the sinks closes both channels, which ends the peer's
/// media pumps.
#[derive(Debug)]
pub struct FramePipeline {
    kind: MediaKind,
    source_tx: Option<mpsc::Sender<Bytes>>,
    source_rx: Option<mpsc::Receiver<Bytes>>,
    remote_tx: Option<mpsc::Sender<Bytes>>,
    remote_rx: Option<mpsc::Receiver<Bytes>>,
}

impl FramePipeline {
    pub fn new(kind: MediaKind) -> Self {
        let (source_tx, source_rx) = mpsc::channel(MEDIA_FRAME_CHANNEL_CAPACITY);
        let (remote_tx, remote_rx) = mpsc::channel(MEDIA_FRAME_CHANNEL_CAPACITY);
        Self {
            kind,
            source_tx: Some(source_tx),
            source_rx: Some(source_rx),
            remote_tx: Some(remote_tx),
            remote_rx: Some(remote_rx),
        }
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    /// Sender for locally captured frames, `None` once the sinks have been stopped.
    pub fn source(&self) -> Option<mpsc::Sender<Bytes>> {
        self.source_tx.clone()
    }

    /// Takes the receiver of remote frames for rendering.
    pub fn take_remote(&mut self) -> Option<mpsc::Receiver<Bytes>> {
        self.remote_rx.take()
    }
}

#[async_trait]
impl MediaPipeline for FramePipeline {
    #[instrument(level = "debug", skip(self), err)]
    fn local_stream(&mut self) -> Result<LocalStream, WebrtcError> {
        let frames = self.source_rx.take().ok_or(WebrtcError::StreamAttached)?;

        let mut stream = LocalStream::new(self.kind);
        stream.frames = Some(frames);
        stream.remote_sink = self.remote_tx.take();

        tracing::trace!(stream_id = %stream.stream_id, "Created local stream");
        Ok(stream)
    }

    #[instrument(level = "debug", skip(self))]
    async fn stop_sinks(&mut self) {
        tracing::trace!("Closing media channels");
        self.source_tx = None;
        self.remote_rx = None;
    }

    #[instrument(level = "debug", skip(self))]
    async fn release_render_context(&mut self) {
        tracing::trace!("Releasing render context");
        self.source_rx = None;
        self.remote_tx = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_matches;
    use test_log::test;

    #[test(tokio::test)]
    async fn local_stream_once() {
        let mut pipeline = FramePipeline::new(MediaKind::Video);

        let stream = pipeline.local_stream().unwrap();
        assert_eq!(stream.kind, MediaKind::Video);
        assert!(stream.frames.is_some());
        assert!(stream.remote_sink.is_some());
        assert_ne!(stream.stream_id, stream.track_id);

        assert_matches!(pipeline.local_stream(), Err(WebrtcError::StreamAttached));
    }

    #[test(tokio::test)]
    async fn frames_flow_until_sinks_stopped() {
        let mut pipeline = FramePipeline::new(MediaKind::Audio);
        let mut stream = pipeline.local_stream().unwrap();
        let mut frames = stream.frames.take().unwrap();

        let source = pipeline.source().unwrap();
        source.send(Bytes::from_static(b"frame")).await.unwrap();
        assert_eq!(frames.recv().await, Some(Bytes::from_static(b"frame")));

        drop(source);
        pipeline.stop_sinks().await;
        assert!(pipeline.source().is_none());
        assert_eq!(frames.recv().await, None);
    }

    #[test(tokio::test)]
    async fn remote_sink_closed_after_stop() {
        let mut pipeline = FramePipeline::new(MediaKind::Video);
        let stream = pipeline.local_stream().unwrap();
        let sink = stream.remote_sink.unwrap();

        pipeline.stop_sinks().await;
        assert!(sink.send(Bytes::from_static(b"rtp")).await.is_err());
    }
}

use anyhow::Context;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, instrument};
use webrtc::media::Sample;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

/// Writes locally captured frames to a local track until the source closes or it is stopped.
pub struct Sender {
    cancel: CancellationToken,
    pump: JoinHandle<u64>,
}

impl Sender {
    #[instrument(level = "trace", skip(track, frames))]
    pub fn new(
        track: Arc<TrackLocalStaticSample>,
        frames: mpsc::Receiver<Bytes>,
        frame_duration: Duration,
    ) -> Self {
        let cancel = CancellationToken::new();
        let pump = tokio::spawn(
            Self::pump(track, frames, frame_duration, cancel.clone())
                .instrument(tracing::Span::current()),
        );
        Self { cancel, pump }
    }

    async fn pump(
        track: Arc<TrackLocalStaticSample>,
        mut frames: mpsc::Receiver<Bytes>,
        frame_duration: Duration,
        cancel: CancellationToken,
    ) -> u64 {
        let mut written = 0u64;
        loop {
            let frame = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                frame = frames.recv() => frame,
            };
            let Some(data) = frame else {
                tracing::trace!("Frame source closed");
                break;
            };

            let sample = Sample {
                data,
                duration: frame_duration,
                ..Default::default()
            };
            match track.write_sample(&sample).await {
                Ok(()) => written += 1,
                Err(err) => tracing::warn!(?err, "Dropping frame, track write failed"),
            }
        }
        written
    }

    /// Signals the pump to stop without waiting for it.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Stops the pump and returns the number of frames written.
    #[instrument(level = "trace", skip(self), err)]
    pub async fn stop(self) -> anyhow::Result<u64> {
        self.cancel.cancel();
        let written = self.pump.await.context("Frame pump panicked")?;
        tracing::trace!(?written, "Frame pump stopped");
        Ok(written)
    }
}

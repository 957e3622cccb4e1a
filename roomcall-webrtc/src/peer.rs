use crate::config::{
    AUDIO_CHANNELS, AUDIO_CLOCK_RATE, AUDIO_FRAME_DURATION, IceConfig, IntoRtc,
    VIDEO_CLOCK_RATE, VIDEO_FRAME_DURATION,
};
use crate::error::WebrtcError;
use crate::media::{LocalStream, MediaKind};
use crate::receiver::Receiver;
use crate::sender::Sender;
use crate::transport::{
    DescriptionSide, OnPeerEventCb, PeerEvent, PeerTransport, TransportEngine,
};
use anyhow::Context;
use async_trait::async_trait;
use parking_lot::Mutex;
use roomcall_protocol::{CandidateRecord, SdpType, SessionDescription};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, instrument};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8, MediaEngine};
use webrtc::api::{API, APIBuilder};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

/// [`TransportEngine`] backed by the `webrtc` crate.
pub struct RtcEngine {
    config: IceConfig,
    api: Option<API>,
}

impl RtcEngine {
    pub fn new(config: IceConfig) -> Self {
        Self { config, api: None }
    }
}

#[async_trait]
impl TransportEngine for RtcEngine {
    type Peer = Peer;

    #[instrument(level = "debug", skip(self), err)]
    async fn init(&mut self) -> Result<(), WebrtcError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .context("Failed to register default codecs")?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .context("Failed to register default interceptors")?;

        self.api = Some(
            APIBuilder::new()
                .with_media_engine(media_engine)
                .with_interceptor_registry(registry)
                .build(),
        );

        tracing::trace!("Initialized transport engine");
        Ok(())
    }

    #[instrument(level = "debug", skip_all, err)]
    async fn create_peer(&self, on_event: OnPeerEventCb) -> Result<Peer, WebrtcError> {
        let api = self.api.as_ref().ok_or(WebrtcError::NotInitialized)?;
        Peer::new(api, self.config.clone(), on_event).await
    }

    #[instrument(level = "debug", skip(self))]
    async fn dispose(&mut self) {
        if self.api.take().is_some() {
            tracing::trace!("Disposed transport engine");
        }
    }
}

enum PeerOp {
    CreateOffer,
    CreateAnswer,
    SetLocalDescription(SessionDescription),
    SetRemoteDescription(SessionDescription),
    AddIceCandidate(CandidateRecord),
    AddStream(LocalStream),
}

/// A peer connection executing its operations one after another on a dedicated task.
pub struct Peer {
    peer_connection: Arc<RTCPeerConnection>,
    ops_tx: mpsc::UnboundedSender<PeerOp>,
    ops_task: Mutex<Option<JoinHandle<()>>>,
    sender: Arc<Mutex<Option<Sender>>>,
    receiver: Arc<Receiver>,
    cancel: CancellationToken,
}

impl Peer {
    #[instrument(level = "debug", skip_all, err)]
    pub async fn new(
        api: &API,
        config: IceConfig,
        on_event: OnPeerEventCb,
    ) -> Result<Self, WebrtcError> {
        let peer_connection = Arc::new(
            api.new_peer_connection(config.into_rtc())
                .await
                .context("Failed to create peer connection")?,
        );

        {
            let on_event = Arc::clone(&on_event);
            peer_connection.on_peer_connection_state_change(Box::new(
                move |state: RTCPeerConnectionState| {
                    tracing::trace!(?state, "Peer connection state changed");
                    on_event(PeerEvent::ConnectionState(state));
                    Box::pin(async {})
                },
            ));
        }

        {
            let on_event = Arc::clone(&on_event);
            peer_connection.on_ice_candidate(Box::new(
                move |candidate: Option<RTCIceCandidate>| {
                    tracing::trace!(?candidate, "ICE candidate gathered");
                    if let Some(candidate) = candidate {
                        match candidate.to_json() {
                            Ok(init) => on_event(PeerEvent::IceCandidate(CandidateRecord::new(
                                init.sdp_mid.unwrap_or_default(),
                                init.sdp_mline_index.unwrap_or_default(),
                                init.candidate,
                            ))),
                            Err(err) => {
                                tracing::warn!(?err, "Failed to serialize ICE candidate");
                            }
                        }
                    }
                    Box::pin(async {})
                },
            ));
        }

        let receiver = Arc::new(Receiver::new(&peer_connection, Arc::clone(&on_event)));
        let sender = Arc::new(Mutex::new(None));
        let cancel = CancellationToken::new();

        let (ops_tx, ops_rx) = mpsc::unbounded_channel();
        let ops_task = tokio::runtime::Handle::current().spawn(
            Self::ops_task(
                Arc::clone(&peer_connection),
                ops_rx,
                on_event,
                Arc::clone(&sender),
                Arc::clone(&receiver),
                cancel.clone(),
            )
            .instrument(tracing::Span::current()),
        );

        Ok(Self {
            peer_connection,
            ops_tx,
            ops_task: Mutex::new(Some(ops_task)),
            sender,
            receiver,
            cancel,
        })
    }

    fn enqueue(&self, op: PeerOp) {
        if self.ops_tx.send(op).is_err() {
            tracing::warn!("Peer already disposed, dropping operation");
        }
    }

    async fn ops_task(
        peer_connection: Arc<RTCPeerConnection>,
        mut ops_rx: mpsc::UnboundedReceiver<PeerOp>,
        on_event: OnPeerEventCb,
        sender: Arc<Mutex<Option<Sender>>>,
        receiver: Arc<Receiver>,
        cancel: CancellationToken,
    ) {
        loop {
            let op = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::trace!("Peer disposed, stopping operations");
                    break;
                }
                op = ops_rx.recv() => match op {
                    Some(op) => op,
                    None => break,
                },
            };

            let event = match op {
                PeerOp::CreateOffer => {
                    Self::created(peer_connection.create_offer(None).await, "offer")
                }
                PeerOp::CreateAnswer => {
                    Self::created(peer_connection.create_answer(None).await, "answer")
                }
                PeerOp::SetLocalDescription(description) => {
                    let applied = Self::apply_description(
                        &peer_connection,
                        description,
                        DescriptionSide::Local,
                    )
                    .await;
                    match applied {
                        Ok(()) => PeerEvent::LocalDescriptionSet,
                        Err(err) => PeerEvent::DescriptionSetFailed {
                            side: DescriptionSide::Local,
                            reason: format!("{err:#}"),
                        },
                    }
                }
                PeerOp::SetRemoteDescription(description) => {
                    let applied = Self::apply_description(
                        &peer_connection,
                        description,
                        DescriptionSide::Remote,
                    )
                    .await;
                    match applied {
                        Ok(()) => PeerEvent::RemoteDescriptionSet,
                        Err(err) => PeerEvent::DescriptionSetFailed {
                            side: DescriptionSide::Remote,
                            reason: format!("{err:#}"),
                        },
                    }
                }
                PeerOp::AddIceCandidate(candidate) => {
                    let init = RTCIceCandidateInit {
                        candidate: candidate.sdp.clone(),
                        sdp_mid: Some(candidate.sdp_mid.clone()),
                        sdp_mline_index: Some(candidate.sdp_mline_index),
                        ..Default::default()
                    };
                    match peer_connection.add_ice_candidate(init).await {
                        Ok(()) => {
                            tracing::trace!("Added remote ICE candidate");
                            continue;
                        }
                        Err(err) => PeerEvent::CandidateRejected {
                            candidate,
                            reason: err.to_string(),
                        },
                    }
                }
                PeerOp::AddStream(stream) => {
                    if let Err(err) =
                        Self::attach_stream(&peer_connection, stream, &sender, &receiver).await
                    {
                        tracing::warn!(?err, "Failed to add local stream");
                    }
                    continue;
                }
            };

            on_event(event);
        }
    }

    fn created(
        result: Result<RTCSessionDescription, webrtc::Error>,
        kind: &'static str,
    ) -> PeerEvent {
        match result {
            Ok(description) => match description.sdp_type {
                RTCSdpType::Offer => {
                    PeerEvent::DescriptionCreated(SessionDescription::offer(description.sdp))
                }
                RTCSdpType::Answer => {
                    PeerEvent::DescriptionCreated(SessionDescription::answer(description.sdp))
                }
                other => PeerEvent::DescriptionCreateFailed(format!(
                    "Unexpected description type {other} while creating {kind}"
                )),
            },
            Err(err) => {
                tracing::warn!(?err, kind, "Failed to create description");
                PeerEvent::DescriptionCreateFailed(err.to_string())
            }
        }
    }

    async fn apply_description(
        peer_connection: &RTCPeerConnection,
        description: SessionDescription,
        side: DescriptionSide,
    ) -> anyhow::Result<()> {
        let description = match description.sdp_type {
            SdpType::Offer => RTCSessionDescription::offer(description.sdp),
            SdpType::Answer => RTCSessionDescription::answer(description.sdp),
        }
        .context("Failed to parse session description")?;

        match side {
            DescriptionSide::Local => peer_connection
                .set_local_description(description)
                .await
                .context("Failed to set local description"),
            DescriptionSide::Remote => peer_connection
                .set_remote_description(description)
                .await
                .context("Failed to set remote description"),
        }
    }

    async fn attach_stream(
        peer_connection: &RTCPeerConnection,
        stream: LocalStream,
        sender: &Mutex<Option<Sender>>,
        receiver: &Receiver,
    ) -> anyhow::Result<()> {
        let (capability, frame_duration) = match stream.kind {
            MediaKind::Audio => (
                RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_OPUS.to_owned(),
                    clock_rate: AUDIO_CLOCK_RATE,
                    channels: AUDIO_CHANNELS,
                    ..Default::default()
                },
                AUDIO_FRAME_DURATION,
            ),
            MediaKind::Video => (
                RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_VP8.to_owned(),
                    clock_rate: VIDEO_CLOCK_RATE,
                    ..Default::default()
                },
                VIDEO_FRAME_DURATION,
            ),
        };

        let track = Arc::new(TrackLocalStaticSample::new(
            capability,
            stream.track_id.clone(),
            stream.stream_id.clone(),
        ));

        peer_connection
            .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .context("Failed to add track to peer connection")?;

        if let Some(remote_sink) = stream.remote_sink {
            receiver.attach_sink(remote_sink);
        }

        if let Some(frames) = stream.frames {
            let previous = sender.lock().replace(Sender::new(track, frames, frame_duration));
            if let Some(previous) = previous {
                previous.shutdown();
            }
        }

        tracing::trace!(stream_id = %stream.stream_id, "Added local stream");
        Ok(())
    }
}

#[async_trait]
impl PeerTransport for Peer {
    fn create_offer(&self) {
        tracing::trace!("Queueing create offer");
        self.enqueue(PeerOp::CreateOffer);
    }

    fn create_answer(&self) {
        tracing::trace!("Queueing create answer");
        self.enqueue(PeerOp::CreateAnswer);
    }

    fn set_local_description(&self, description: SessionDescription) {
        self.enqueue(PeerOp::SetLocalDescription(description));
    }

    fn set_remote_description(&self, description: SessionDescription) {
        self.enqueue(PeerOp::SetRemoteDescription(description));
    }

    fn add_ice_candidate(&self, candidate: CandidateRecord) {
        self.enqueue(PeerOp::AddIceCandidate(candidate));
    }

    fn add_stream(&self, stream: LocalStream) {
        self.enqueue(PeerOp::AddStream(stream));
    }

    #[instrument(level = "debug", skip(self))]
    async fn dispose(&self) {
        tracing::debug!("Disposing peer");
        self.cancel.cancel();

        let ops_task = self.ops_task.lock().take();
        if let Some(ops_task) = ops_task
            && let Err(err) = ops_task.await
        {
            tracing::warn!(?err, "Failed to join peer operations task");
        }

        let sender = self.sender.lock().take();
        if let Some(sender) = sender
            && let Err(err) = sender.stop().await
        {
            tracing::warn!(?err, "Failed to stop sender");
        }
        self.receiver.shutdown();

        if let Err(err) = self.peer_connection.close().await {
            tracing::warn!(?err, "Failed to close peer connection");
        }

        tracing::trace!("Successfully disposed peer");
    }
}

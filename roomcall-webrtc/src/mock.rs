use crate::error::WebrtcError;
use crate::media::{LocalStream, MediaKind, MediaPipeline};
use crate::transport::{
    DescriptionSide, OnPeerEventCb, PeerEvent, PeerTransport, TransportEngine,
};
use anyhow::anyhow;
use async_trait::async_trait;
use parking_lot::Mutex;
use roomcall_protocol::{CandidateRecord, SdpType, SessionDescription};
use std::sync::Arc;

pub const MOCK_OFFER_SDP: &str = "v=0 mock-offer";
pub const MOCK_ANSWER_SDP: &str = "v=0 mock-answer";

/// Everything the mocks were asked to do, in call order.
#[derive(Debug, Clone, PartialEq)]
pub enum MockCall {
    EngineInit,
    CreatePeer,
    CreateOffer,
    CreateAnswer,
    SetLocalDescription(SessionDescription),
    SetRemoteDescription(SessionDescription),
    AddIceCandidate(CandidateRecord),
    AddStream(String),
    DisposePeer,
    DisposeEngine,
    StopSinks,
    ReleaseRenderContext,
}

/// Call log shared between all mocks of one test.
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<MockCall>>>);

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, call: MockCall) {
        self.0.lock().push(call);
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.0.lock().clone()
    }

    pub fn count(&self, predicate: impl Fn(&MockCall) -> bool) -> usize {
        self.0.lock().iter().filter(|call| predicate(call)).count()
    }

    pub fn position(&self, call: &MockCall) -> Option<usize> {
        self.0.lock().iter().position(|c| c == call)
    }

    pub fn candidates_added(&self) -> Vec<CandidateRecord> {
        self.0
            .lock()
            .iter()
            .filter_map(|call| match call {
                MockCall::AddIceCandidate(candidate) => Some(candidate.clone()),
                _ => None,
            })
            .collect()
    }
}

/// How a [`MockPeer`] reacts to operations.
#[derive(Debug, Clone, Copy, Default)]
pub struct MockBehavior {
    /// Immediately report successful completion of create and set operations.
    pub auto_complete: bool,
    /// Report create operations as failed.
    pub fail_create: bool,
    /// Report set operations as failed.
    pub fail_set: bool,
}

impl MockBehavior {
    pub fn manual() -> Self {
        Self::default()
    }

    pub fn auto() -> Self {
        Self {
            auto_complete: true,
            ..Default::default()
        }
    }
}

pub struct MockPeer {
    log: CallLog,
    behavior: MockBehavior,
    on_event: OnPeerEventCb,
}

impl MockPeer {
    pub fn new(log: CallLog, behavior: MockBehavior, on_event: OnPeerEventCb) -> Self {
        Self {
            log,
            behavior,
            on_event,
        }
    }

    /// Fires an event at the observer as if the transport had produced it.
    pub fn emit(&self, event: PeerEvent) {
        (self.on_event)(event);
    }

    fn created(&self, sdp_type: SdpType) {
        if self.behavior.fail_create {
            self.emit(PeerEvent::DescriptionCreateFailed(
                "mock create failure".to_string(),
            ));
        } else if self.behavior.auto_complete {
            self.emit(PeerEvent::DescriptionCreated(match sdp_type {
                SdpType::Offer => SessionDescription::offer(MOCK_OFFER_SDP),
                SdpType::Answer => SessionDescription::answer(MOCK_ANSWER_SDP),
            }));
        }
    }

    fn applied(&self, side: DescriptionSide) {
        if self.behavior.fail_set {
            self.emit(PeerEvent::DescriptionSetFailed {
                side,
                reason: "mock set failure".to_string(),
            });
        } else if self.behavior.auto_complete {
            self.emit(match side {
                DescriptionSide::Local => PeerEvent::LocalDescriptionSet,
                DescriptionSide::Remote => PeerEvent::RemoteDescriptionSet,
            });
        }
    }
}

#[async_trait]
impl PeerTransport for MockPeer {
    fn create_offer(&self) {
        self.log.record(MockCall::CreateOffer);
        self.created(SdpType::Offer);
    }

    fn create_answer(&self) {
        self.log.record(MockCall::CreateAnswer);
        self.created(SdpType::Answer);
    }

    fn set_local_description(&self, description: SessionDescription) {
        self.log.record(MockCall::SetLocalDescription(description));
        self.applied(DescriptionSide::Local);
    }

    fn set_remote_description(&self, description: SessionDescription) {
        self.log.record(MockCall::SetRemoteDescription(description));
        self.applied(DescriptionSide::Remote);
    }

    fn add_ice_candidate(&self, candidate: CandidateRecord) {
        self.log.record(MockCall::AddIceCandidate(candidate));
    }

    fn add_stream(&self, stream: LocalStream) {
        self.log.record(MockCall::AddStream(stream.stream_id));
    }

    async fn dispose(&self) {
        self.log.record(MockCall::DisposePeer);
    }
}

/// Gives a test access to the peer created by a [`MockEngine`] after the engine has been moved
/// into a session.
#[derive(Clone, Default)]
pub struct MockController {
    peer: Arc<Mutex<Option<Arc<MockPeer>>>>,
}

impl MockController {
    pub fn peer(&self) -> Option<Arc<MockPeer>> {
        self.peer.lock().clone()
    }

    pub fn emit(&self, event: PeerEvent) -> bool {
        match self.peer() {
            Some(peer) => {
                peer.emit(event);
                true
            }
            None => false,
        }
    }
}

pub struct MockEngine {
    log: CallLog,
    behavior: MockBehavior,
    controller: MockController,
    pub fail_init: bool,
    pub fail_create_peer: bool,
}

impl MockEngine {
    pub fn new(log: CallLog, behavior: MockBehavior) -> (Self, MockController) {
        let controller = MockController::default();
        (
            Self {
                log,
                behavior,
                controller: controller.clone(),
                fail_init: false,
                fail_create_peer: false,
            },
            controller,
        )
    }
}

#[async_trait]
impl TransportEngine for MockEngine {
    type Peer = Arc<MockPeer>;

    async fn init(&mut self) -> Result<(), WebrtcError> {
        self.log.record(MockCall::EngineInit);
        if self.fail_init {
            return Err(anyhow!("mock engine init failure").into());
        }
        Ok(())
    }

    async fn create_peer(&self, on_event: OnPeerEventCb) -> Result<Arc<MockPeer>, WebrtcError> {
        self.log.record(MockCall::CreatePeer);
        if self.fail_create_peer {
            return Err(anyhow!("mock peer creation failure").into());
        }
        let peer = Arc::new(MockPeer::new(self.log.clone(), self.behavior, on_event));
        *self.controller.peer.lock() = Some(Arc::clone(&peer));
        Ok(peer)
    }

    async fn dispose(&mut self) {
        self.log.record(MockCall::DisposeEngine);
    }
}

pub struct MockMedia {
    log: CallLog,
    pub fail_attach: bool,
}

impl MockMedia {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            fail_attach: false,
        }
    }
}

#[async_trait]
impl MediaPipeline for MockMedia {
    fn local_stream(&mut self) -> Result<LocalStream, WebrtcError> {
        if self.fail_attach {
            return Err(anyhow!("mock media failure").into());
        }
        let mut stream = LocalStream::new(MediaKind::Video);
        stream.stream_id = "mock-stream".to_string();
        Ok(stream)
    }

    async fn stop_sinks(&mut self) {
        self.log.record(MockCall::StopSinks);
    }

    async fn release_render_context(&mut self) {
        self.log.record(MockCall::ReleaseRenderContext);
    }
}

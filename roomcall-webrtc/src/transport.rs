use crate::error::WebrtcError;
use crate::media::LocalStream;
use async_trait::async_trait;
use roomcall_protocol::{CandidateRecord, SessionDescription};
use std::sync::Arc;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;

pub type PeerConnectionState = RTCPeerConnectionState;

/// Which description a set operation applied to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptionSide {
    Local,
    Remote,
}

/// Events emitted by a [`PeerTransport`] to its observer.
///
/// Every non-blocking transport operation reports its completion through exactly one of these.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    /// `create_offer`/`create_answer` completed.
    DescriptionCreated(SessionDescription),
    /// `create_offer`/`create_answer` failed.
    DescriptionCreateFailed(String),
    /// `set_local_description` completed.
    LocalDescriptionSet,
    /// `set_remote_description` completed.
    RemoteDescriptionSet,
    /// `set_local_description`/`set_remote_description` failed.
    DescriptionSetFailed { side: DescriptionSide, reason: String },
    /// The transport gathered a new local candidate.
    IceCandidate(CandidateRecord),
    /// `add_ice_candidate` failed for the given candidate.
    CandidateRejected {
        candidate: CandidateRecord,
        reason: String,
    },
    ConnectionState(PeerConnectionState),
    /// The remote peer added a stream with the given id.
    RemoteStreamAdded(String),
}

pub type OnPeerEventCb = Arc<dyn Fn(PeerEvent) + Send + Sync>;

/// The transport engine a peer object is created from.
#[async_trait]
pub trait TransportEngine: Send + Sync + 'static {
    type Peer: PeerTransport;

    async fn init(&mut self) -> Result<(), WebrtcError>;

    /// Creates a peer object with `on_event` attached as its observer.
    async fn create_peer(&self, on_event: OnPeerEventCb) -> Result<Self::Peer, WebrtcError>;

    async fn dispose(&mut self);
}

/// The peer-connection capability consumed by the negotiation.
///
/// Operations never block: they are executed in call order by the transport and their outcome is
/// delivered as a [`PeerEvent`].
#[async_trait]
pub trait PeerTransport: Send + Sync + 'static {
    fn create_offer(&self);
    fn create_answer(&self);
    fn set_local_description(&self, description: SessionDescription);
    fn set_remote_description(&self, description: SessionDescription);
    fn add_ice_candidate(&self, candidate: CandidateRecord);
    fn add_stream(&self, stream: LocalStream);

    /// Closes the peer. Operations queued but not yet executed are dropped.
    async fn dispose(&self);
}

#[async_trait]
impl<P: PeerTransport> PeerTransport for Arc<P> {
    fn create_offer(&self) {
        (**self).create_offer();
    }

    fn create_answer(&self) {
        (**self).create_answer();
    }

    fn set_local_description(&self, description: SessionDescription) {
        (**self).set_local_description(description);
    }

    fn set_remote_description(&self, description: SessionDescription) {
        (**self).set_remote_description(description);
    }

    fn add_ice_candidate(&self, candidate: CandidateRecord) {
        (**self).add_ice_candidate(candidate);
    }

    fn add_stream(&self, stream: LocalStream) {
        (**self).add_stream(stream);
    }

    async fn dispose(&self) {
        (**self).dispose().await;
    }
}

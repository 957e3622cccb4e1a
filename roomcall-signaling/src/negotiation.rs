use crate::admission::Admission;
use crate::codec::{self, DomainEvent};
use crate::error::NegotiationError;
use crate::publisher::Publisher;
use crate::queue::{CandidateQueue, OutgoingCandidates, Routed};
use roomcall_protocol::{
    CandidateRecord, Role, RoomDocument, SessionDescription, SignalingMessage,
};
use roomcall_webrtc::{PeerConnectionState, PeerEvent, PeerTransport};
use std::collections::HashSet;
use tokio::sync::{broadcast, watch};
use tracing::instrument;

/// Phase of a room session.
///
/// Phases only ever move forward. `Rejected`, `Failed` and `Closed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Idle,
    Admitting,
    /// The room was full.
    Rejected,
    /// Admission or acquiring the session's resources failed.
    Failed,
    Initializing,
    CreatingDescription,
    AwaitingLocalSet,
    OffererAwaitingAnswer,
    AnswererPublishing,
    RemoteDescriptionPending,
    CandidatesFlushed,
    Connected,
    Disposing,
    Closed,
}

impl Phase {
    fn rank(self) -> u8 {
        match self {
            Phase::Idle => 0,
            Phase::Admitting => 1,
            Phase::Initializing => 2,
            Phase::CreatingDescription => 3,
            Phase::AwaitingLocalSet => 4,
            Phase::OffererAwaitingAnswer | Phase::AnswererPublishing => 5,
            Phase::RemoteDescriptionPending => 6,
            Phase::CandidatesFlushed => 7,
            Phase::Connected => 8,
            Phase::Disposing => 9,
            Phase::Rejected | Phase::Failed | Phase::Closed => 10,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Rejected | Phase::Failed | Phase::Closed)
    }

    /// Whether the session can still negotiate.
    pub fn is_negotiating(self) -> bool {
        self.rank() < Phase::Disposing.rank()
    }
}

/// Events reported to the owner of a session.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    ConnectionState(PeerConnectionState),
    /// The remote peer added a stream with the given id.
    RemoteStreamAdded(String),
    /// The negotiation cannot progress anymore and the session should be released.
    Stalled(NegotiationError),
}

/// State of one participant in a room.
#[derive(Debug, Clone)]
pub struct RoomSession {
    room_id: String,
    role: Role,
    phase: Phase,
    participant_count: u32,
    local_description: Option<SessionDescription>,
    remote_description: Option<SessionDescription>,
}

impl RoomSession {
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Participant count right after admission.
    pub fn participant_count(&self) -> u32 {
        self.participant_count
    }

    pub fn local_description(&self) -> Option<&SessionDescription> {
        self.local_description.as_ref()
    }

    pub fn remote_description(&self) -> Option<&SessionDescription> {
        self.remote_description.as_ref()
    }
}

/// Offer/answer state machine of a single session.
///
/// Every input, be it a relay document or a transport event, is handled to completion before the
/// next one, so there is exactly one writer of the session state. Transport operations are only
/// issued here and report back through [`Negotiation::handle_peer_event`].
pub struct Negotiation<P: PeerTransport> {
    session: RoomSession,
    peer: P,
    publisher: Publisher,
    pending_remote: CandidateQueue,
    seen_remote: HashSet<CandidateRecord>,
    outgoing: OutgoingCandidates,
    phase_tx: watch::Sender<Phase>,
    events_tx: broadcast::Sender<SessionEvent>,
}

impl<P: PeerTransport> Negotiation<P> {
    pub fn new(
        room_id: impl Into<String>,
        admission: Admission,
        peer: P,
        publisher: Publisher,
        phase_tx: watch::Sender<Phase>,
        events_tx: broadcast::Sender<SessionEvent>,
    ) -> Self {
        let initial_phase = *phase_tx.borrow();
        let mut negotiation = Self {
            session: RoomSession {
                room_id: room_id.into(),
                role: admission.role,
                phase: initial_phase,
                participant_count: admission.participant_count,
                local_description: None,
                remote_description: None,
            },
            peer,
            publisher,
            pending_remote: CandidateQueue::new(),
            seen_remote: HashSet::new(),
            outgoing: OutgoingCandidates::new(admission.role),
            phase_tx,
            events_tx,
        };
        negotiation.advance(Phase::Initializing);
        negotiation
    }

    pub fn session(&self) -> &RoomSession {
        &self.session
    }

    pub fn phase(&self) -> Phase {
        self.session.phase
    }

    pub fn role(&self) -> Role {
        self.session.role
    }

    /// Number of remote candidates waiting for the remote description.
    pub fn queued_candidates(&self) -> usize {
        self.pending_remote.len()
    }

    fn advance(&mut self, phase: Phase) {
        let current = self.session.phase;
        if current.is_terminal() || phase.rank() <= current.rank() {
            tracing::trace!(?current, ?phase, "Not moving phase backwards");
            return;
        }
        tracing::debug!(from = ?current, to = ?phase, "Phase transition");
        self.session.phase = phase;
        self.phase_tx.send_replace(phase);
    }

    fn emit(&self, event: SessionEvent) {
        if self.events_tx.receiver_count() > 0 {
            if let Err(err) = self.events_tx.send(event) {
                tracing::warn!(?err, "Failed to broadcast session event");
            }
        } else {
            tracing::trace!(?event, "No receivers subscribed, not broadcasting session event");
        }
    }

    fn stall(&self, err: NegotiationError) {
        tracing::warn!(?err, "Negotiation stalled");
        self.emit(SessionEvent::Stalled(err));
    }

    /// Kicks off the negotiation. Only the offerer acts, the answerer waits for the offer.
    #[instrument(level = "debug", skip(self), fields(role = %self.session.role))]
    pub fn start(&mut self) {
        if !self.phase().is_negotiating() {
            return;
        }
        match self.session.role {
            Role::Offerer => {
                self.advance(Phase::CreatingDescription);
                self.peer.create_offer();
            }
            Role::Answerer => {
                tracing::debug!("Waiting for offer");
            }
        }
    }

    /// Consumes everything addressed to this participant in a room document.
    #[instrument(level = "trace", skip_all, fields(role = %self.session.role))]
    pub fn handle_relay_document(&mut self, doc: &RoomDocument) {
        if !self.phase().is_negotiating() {
            tracing::trace!(phase = ?self.phase(), "Ignoring relay document");
            return;
        }

        for event in codec::decode(doc, self.session.role) {
            let consumed = event.consumed_key(self.session.role);
            match event {
                DomainEvent::RemoteCandidates(candidates) => {
                    self.receive_candidates(candidates);
                    self.publisher.publish(SignalingMessage::Clear(consumed));
                }
                DomainEvent::RemoteDescription(description) => {
                    self.publisher.publish(SignalingMessage::Clear(consumed));
                    self.receive_description(description);
                }
            }
        }
    }

    fn receive_candidates(&mut self, candidates: Vec<CandidateRecord>) {
        for candidate in candidates {
            if !self.seen_remote.insert(candidate.clone()) {
                tracing::trace!(?candidate, "Skipping already received candidate");
                continue;
            }
            match self.pending_remote.route(candidate) {
                Routed::Queued => {
                    tracing::trace!(
                        queued = self.pending_remote.len(),
                        "Queued remote candidate until remote description is set"
                    );
                }
                Routed::Apply(candidate) => {
                    tracing::trace!(?candidate, "Applying remote candidate");
                    self.peer.add_ice_candidate(candidate);
                }
            }
        }
    }

    fn receive_description(&mut self, description: SessionDescription) {
        if let Some(existing) = &self.session.remote_description {
            if existing.sdp != description.sdp {
                tracing::warn!(
                    sdp_type = ?description.sdp_type,
                    "Ignoring different remote description, renegotiation is not supported"
                );
            } else {
                tracing::trace!("Remote description already applied");
            }
            return;
        }

        tracing::debug!(sdp_type = ?description.sdp_type, "Received remote description");
        self.session.remote_description = Some(description.clone());
        self.advance(Phase::RemoteDescriptionPending);
        self.peer.set_remote_description(description);

        if self.session.role == Role::Answerer {
            self.peer.create_answer();
        }
    }

    /// Reacts to the outcome of a transport operation or a transport notification.
    #[instrument(level = "trace", skip(self), fields(role = %self.session.role))]
    pub fn handle_peer_event(&mut self, event: PeerEvent) {
        if !self.phase().is_negotiating() {
            tracing::trace!(phase = ?self.phase(), "Ignoring peer event");
            return;
        }

        match event {
            PeerEvent::DescriptionCreated(description) => self.description_created(description),
            PeerEvent::DescriptionCreateFailed(reason) => {
                self.stall(NegotiationError::DescriptionCreate(reason));
            }
            PeerEvent::LocalDescriptionSet => self.local_description_set(),
            PeerEvent::RemoteDescriptionSet => self.remote_description_set(),
            PeerEvent::DescriptionSetFailed { side, reason } => {
                self.stall(NegotiationError::DescriptionSet { side, reason });
            }
            PeerEvent::IceCandidate(candidate) => {
                tracing::trace!(?candidate, "Publishing local candidate");
                let bundle = self.outgoing.push(candidate);
                self.publisher.publish(bundle);
            }
            PeerEvent::CandidateRejected { candidate, reason } => {
                tracing::warn!(?candidate, ?reason, "Transport rejected remote candidate");
            }
            PeerEvent::ConnectionState(state) => {
                tracing::info!(?state, "Peer connection state changed");
                if state == PeerConnectionState::Connected {
                    self.advance(Phase::Connected);
                }
                self.emit(SessionEvent::ConnectionState(state));
            }
            PeerEvent::RemoteStreamAdded(stream_id) => {
                tracing::debug!(?stream_id, "Remote stream added");
                self.emit(SessionEvent::RemoteStreamAdded(stream_id));
            }
        }
    }

    fn description_created(&mut self, description: SessionDescription) {
        let expected = self.session.role.local_sdp_type();
        if description.sdp_type != expected {
            tracing::warn!(
                ?expected,
                actual = ?description.sdp_type,
                "Ignoring local description of unexpected type"
            );
            return;
        }
        if self.session.local_description.is_some() {
            tracing::warn!(
                err = ?NegotiationError::DuplicateDescription(description.sdp_type),
                "Keeping first local description"
            );
            return;
        }

        tracing::debug!(sdp_type = ?description.sdp_type, "Created local description");
        self.session.local_description = Some(description.clone());
        self.advance(Phase::AwaitingLocalSet);
        self.peer.set_local_description(description);
    }

    fn local_description_set(&mut self) {
        let Some(local) = self.session.local_description.clone() else {
            tracing::warn!("Local description set without a created description");
            return;
        };

        match self.session.role {
            Role::Offerer => {
                if self.session.remote_description.is_some() {
                    tracing::trace!("Answer already received, not publishing offer again");
                    return;
                }
                self.publisher.publish(SignalingMessage::Offer(local));
                self.advance(Phase::OffererAwaitingAnswer);
            }
            Role::Answerer => {
                self.publisher.publish(SignalingMessage::Answer(local));
                self.advance(Phase::AnswererPublishing);
            }
        }
    }

    fn remote_description_set(&mut self) {
        let Some(candidates) = self.pending_remote.drain() else {
            tracing::trace!("Remote candidates already flushed");
            return;
        };

        tracing::debug!(count = candidates.len(), "Flushing queued remote candidates");
        for candidate in candidates {
            self.peer.add_ice_candidate(candidate);
        }
        self.advance(Phase::CandidatesFlushed);
    }

    /// Stops the negotiation, every later input is ignored.
    pub fn begin_disposing(&mut self) {
        self.advance(Phase::Disposing);
    }

    pub fn close(&mut self) {
        self.advance(Phase::Closed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::{assert_eq, assert_matches};
    use roomcall_protocol::SignalingKey;
    use roomcall_webrtc::DescriptionSide;
    use roomcall_webrtc::mock::{CallLog, MockBehavior, MockCall, MockPeer};
    use serde_json::{Value, json};
    use std::sync::Arc;
    use test_log::test;
    use tokio::sync::mpsc;

    struct Harness {
        negotiation: Negotiation<MockPeer>,
        log: CallLog,
        published: mpsc::UnboundedReceiver<SignalingMessage>,
        phase_rx: watch::Receiver<Phase>,
        events_rx: broadcast::Receiver<SessionEvent>,
    }

    impl Harness {
        fn new(role: Role) -> Self {
            let log = CallLog::new();
            let peer = MockPeer::new(
                log.clone(),
                MockBehavior::manual(),
                Arc::new(|_: PeerEvent| {}),
            );
            let (publisher, published) = Publisher::channel();
            let (phase_tx, phase_rx) = watch::channel(Phase::Admitting);
            let (events_tx, events_rx) = broadcast::channel(16);
            let admission = Admission {
                role,
                room_existed: role == Role::Answerer,
                participant_count: if role == Role::Offerer { 1 } else { 2 },
            };

            Self {
                negotiation: Negotiation::new(
                    "room", admission, peer, publisher, phase_tx, events_tx,
                ),
                log,
                published,
                phase_rx,
                events_rx,
            }
        }

        fn published(&mut self) -> Vec<SignalingMessage> {
            let mut messages = Vec::new();
            while let Ok(message) = self.published.try_recv() {
                messages.push(message);
            }
            messages
        }

        fn relay(&mut self, value: Value) {
            let Value::Object(doc) = value else {
                panic!("not an object");
            };
            self.negotiation.handle_relay_document(&doc);
        }
    }

    fn candidate(n: u16) -> CandidateRecord {
        CandidateRecord::new("0", 0, format!("candidate:{n}"))
    }

    fn candidates_json(candidates: &[CandidateRecord]) -> Value {
        serde_json::to_value(candidates).unwrap()
    }

    #[test]
    fn starts_initializing() {
        let harness = Harness::new(Role::Offerer);
        assert_eq!(harness.negotiation.phase(), Phase::Initializing);
        assert_eq!(*harness.phase_rx.borrow(), Phase::Initializing);
        assert_eq!(harness.negotiation.session().room_id(), "room");
        assert_eq!(harness.negotiation.session().participant_count(), 1);
    }

    #[test]
    fn offerer_publishes_offer_once_set() {
        let mut harness = Harness::new(Role::Offerer);
        harness.negotiation.start();
        assert_eq!(harness.log.calls(), vec![MockCall::CreateOffer]);
        assert_eq!(harness.negotiation.phase(), Phase::CreatingDescription);

        let offer = SessionDescription::offer("v=0 offer");
        harness
            .negotiation
            .handle_peer_event(PeerEvent::DescriptionCreated(offer.clone()));
        assert_eq!(harness.negotiation.phase(), Phase::AwaitingLocalSet);
        assert_eq!(harness.published(), vec![]);

        harness.negotiation.handle_peer_event(PeerEvent::LocalDescriptionSet);
        assert_eq!(harness.published(), vec![SignalingMessage::Offer(offer.clone())]);
        assert_eq!(harness.negotiation.phase(), Phase::OffererAwaitingAnswer);
        assert_eq!(
            harness.log.calls(),
            vec![MockCall::CreateOffer, MockCall::SetLocalDescription(offer)]
        );
    }

    #[test]
    fn duplicate_local_description_keeps_first() {
        let mut harness = Harness::new(Role::Offerer);
        harness.negotiation.start();

        let first = SessionDescription::offer("v=0 first");
        harness
            .negotiation
            .handle_peer_event(PeerEvent::DescriptionCreated(first.clone()));
        harness
            .negotiation
            .handle_peer_event(PeerEvent::DescriptionCreated(SessionDescription::offer(
                "v=0 second",
            )));

        assert_eq!(
            harness.negotiation.session().local_description(),
            Some(&first)
        );
        assert_eq!(
            harness
                .log
                .count(|call| matches!(call, MockCall::SetLocalDescription(_))),
            1
        );
    }

    #[test]
    fn candidates_queued_until_remote_description_set() {
        let mut harness = Harness::new(Role::Offerer);
        harness.negotiation.start();

        harness.relay(json!({"iceAnswer": candidates_json(&[candidate(1), candidate(2)])}));
        assert_eq!(harness.log.candidates_added(), vec![]);
        assert_eq!(harness.negotiation.queued_candidates(), 2);
        assert_eq!(
            harness.published(),
            vec![SignalingMessage::Clear(SignalingKey::IceAnswer)]
        );

        let answer = SessionDescription::answer("v=0 answer");
        harness.relay(json!({
            "type": "answer",
            "sdpAnswer": answer.sdp,
            "iceAnswer": candidates_json(&[candidate(1), candidate(2), candidate(3)]),
        }));
        assert_eq!(harness.negotiation.phase(), Phase::RemoteDescriptionPending);
        assert_eq!(harness.log.candidates_added(), vec![]);
        assert_eq!(harness.negotiation.queued_candidates(), 3);
        assert_eq!(
            harness.published(),
            vec![
                SignalingMessage::Clear(SignalingKey::IceAnswer),
                SignalingMessage::Clear(SignalingKey::SdpAnswer),
            ]
        );

        harness.negotiation.handle_peer_event(PeerEvent::RemoteDescriptionSet);
        assert_eq!(harness.negotiation.phase(), Phase::CandidatesFlushed);
        assert_eq!(
            harness.log.candidates_added(),
            vec![candidate(1), candidate(2), candidate(3)]
        );

        harness.relay(json!({"iceAnswer": candidates_json(&[candidate(4)])}));
        harness.negotiation.handle_peer_event(PeerEvent::RemoteDescriptionSet);
        assert_eq!(
            harness.log.candidates_added(),
            vec![candidate(1), candidate(2), candidate(3), candidate(4)]
        );
        assert_eq!(
            harness
                .log
                .count(|call| matches!(call, MockCall::SetRemoteDescription(_))),
            1
        );
    }

    #[test]
    fn redelivered_document_is_consumed_once() {
        let mut harness = Harness::new(Role::Answerer);
        let doc = json!({
            "participantCount": 2,
            "type": "offer",
            "sdpOffer": "v=0 offer",
            "iceOffer": candidates_json(&[candidate(1)]),
        });

        harness.relay(doc.clone());
        harness.relay(doc);
        harness.relay(json!({"participantCount": 2, "sdpOffer": null, "iceOffer": null}));

        assert_eq!(
            harness
                .log
                .count(|call| matches!(call, MockCall::SetRemoteDescription(_))),
            1
        );
        assert_eq!(harness.log.count(|call| *call == MockCall::CreateAnswer), 1);
        assert_eq!(harness.negotiation.queued_candidates(), 1);
    }

    #[test]
    fn answerer_flow() {
        let mut harness = Harness::new(Role::Answerer);
        harness.negotiation.start();
        assert_eq!(harness.log.calls(), vec![]);

        let offer = SessionDescription::offer("v=0 offer");
        harness.relay(json!({
            "participantCount": 2,
            "type": "offer",
            "sdpOffer": offer.sdp,
            "iceOffer": candidates_json(&[candidate(1)]),
        }));
        assert_eq!(
            harness.log.calls(),
            vec![
                MockCall::SetRemoteDescription(offer),
                MockCall::CreateAnswer
            ]
        );
        assert_eq!(
            harness.published(),
            vec![
                SignalingMessage::Clear(SignalingKey::IceOffer),
                SignalingMessage::Clear(SignalingKey::SdpOffer),
            ]
        );

        harness.negotiation.handle_peer_event(PeerEvent::RemoteDescriptionSet);
        assert_eq!(harness.negotiation.phase(), Phase::CandidatesFlushed);
        assert_eq!(harness.log.candidates_added(), vec![candidate(1)]);

        let answer = SessionDescription::answer("v=0 answer");
        harness
            .negotiation
            .handle_peer_event(PeerEvent::DescriptionCreated(answer.clone()));
        harness.negotiation.handle_peer_event(PeerEvent::LocalDescriptionSet);
        assert_eq!(harness.published(), vec![SignalingMessage::Answer(answer)]);
        assert_eq!(harness.negotiation.phase(), Phase::CandidatesFlushed);
    }

    #[test]
    fn local_candidates_published_cumulatively() {
        let mut harness = Harness::new(Role::Answerer);
        harness
            .negotiation
            .handle_peer_event(PeerEvent::IceCandidate(candidate(1)));
        harness
            .negotiation
            .handle_peer_event(PeerEvent::IceCandidate(candidate(2)));

        assert_eq!(
            harness.published(),
            vec![
                SignalingMessage::IceBundle {
                    role: Role::Answerer,
                    candidates: vec![candidate(1)],
                },
                SignalingMessage::IceBundle {
                    role: Role::Answerer,
                    candidates: vec![candidate(1), candidate(2)],
                },
            ]
        );
    }

    #[test(tokio::test)]
    async fn create_failure_stalls() {
        let mut harness = Harness::new(Role::Offerer);
        harness.negotiation.start();
        harness
            .negotiation
            .handle_peer_event(PeerEvent::DescriptionCreateFailed("boom".to_string()));

        assert_matches!(
            harness.events_rx.recv().await,
            Ok(SessionEvent::Stalled(NegotiationError::DescriptionCreate(reason)))
                if reason == "boom"
        );
        assert_eq!(harness.negotiation.phase(), Phase::CreatingDescription);
    }

    #[test(tokio::test)]
    async fn set_failure_stalls() {
        let mut harness = Harness::new(Role::Answerer);
        harness
            .negotiation
            .handle_peer_event(PeerEvent::DescriptionSetFailed {
                side: DescriptionSide::Remote,
                reason: "bad sdp".to_string(),
            });

        assert_matches!(
            harness.events_rx.recv().await,
            Ok(SessionEvent::Stalled(NegotiationError::DescriptionSet {
                side: DescriptionSide::Remote,
                ..
            }))
        );
    }

    #[test(tokio::test)]
    async fn connected_state() {
        let mut harness = Harness::new(Role::Offerer);
        harness
            .negotiation
            .handle_peer_event(PeerEvent::ConnectionState(PeerConnectionState::Connected));
        harness
            .negotiation
            .handle_peer_event(PeerEvent::RemoteStreamAdded("remote".to_string()));

        assert_eq!(harness.negotiation.phase(), Phase::Connected);
        assert_matches!(
            harness.events_rx.recv().await,
            Ok(SessionEvent::ConnectionState(PeerConnectionState::Connected))
        );
        assert_matches!(
            harness.events_rx.recv().await,
            Ok(SessionEvent::RemoteStreamAdded(id)) if id == "remote"
        );

        harness.negotiation.handle_peer_event(PeerEvent::ConnectionState(
            PeerConnectionState::Disconnected,
        ));
        assert_eq!(harness.negotiation.phase(), Phase::Connected);
    }

    #[test]
    fn inputs_ignored_after_disposing() {
        let mut harness = Harness::new(Role::Answerer);
        harness.negotiation.begin_disposing();
        assert_eq!(harness.negotiation.phase(), Phase::Disposing);

        harness.relay(json!({"sdpOffer": "v=0", "iceOffer": candidates_json(&[candidate(1)])}));
        harness
            .negotiation
            .handle_peer_event(PeerEvent::IceCandidate(candidate(2)));
        harness.negotiation.start();

        assert_eq!(harness.log.calls(), vec![]);
        assert_eq!(harness.published(), vec![]);

        harness.negotiation.close();
        harness.negotiation.handle_peer_event(PeerEvent::RemoteDescriptionSet);
        assert_eq!(harness.negotiation.phase(), Phase::Closed);
        assert_eq!(*harness.phase_rx.borrow(), Phase::Closed);
    }
}

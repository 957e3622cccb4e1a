//! Mapping between signaling messages and relay document fields.

use roomcall_protocol::{
    AdmissionFields, CandidateRecord, DESCRIPTION_TYPE, Role, RoomDocument, SessionDescription,
    SignalingKey, SignalingMessage,
};
use serde_json::{Value, json};

/// Something the peer published that the local negotiation has to consume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainEvent {
    RemoteCandidates(Vec<CandidateRecord>),
    RemoteDescription(SessionDescription),
}

impl DomainEvent {
    /// Key to clear once this event has been consumed by `role`.
    pub fn consumed_key(&self, role: Role) -> SignalingKey {
        match self {
            DomainEvent::RemoteCandidates(_) => role.peer().candidates_key(),
            DomainEvent::RemoteDescription(_) => role.peer().description_key(),
        }
    }
}

/// Encodes a message into the partial document that is merged into the room document.
pub fn encode(message: &SignalingMessage) -> RoomDocument {
    match message {
        SignalingMessage::RoomInit { participant_count } => AdmissionFields {
            participant_count: *participant_count,
        }
        .to_document(),
        SignalingMessage::Offer(description) => {
            encode_description(SignalingKey::SdpOffer, description)
        }
        SignalingMessage::Answer(description) => {
            encode_description(SignalingKey::SdpAnswer, description)
        }
        SignalingMessage::IceBundle { role, candidates } => {
            let mut doc = RoomDocument::new();
            doc.insert(
                role.candidates_key().to_string(),
                Value::Array(candidates.iter().map(encode_candidate).collect()),
            );
            doc
        }
        SignalingMessage::Clear(key) => {
            let mut doc = RoomDocument::new();
            doc.insert(key.to_string(), Value::Null);
            doc
        }
    }
}

fn encode_description(key: SignalingKey, description: &SessionDescription) -> RoomDocument {
    let mut doc = RoomDocument::new();
    doc.insert(
        DESCRIPTION_TYPE.to_string(),
        Value::from(description.sdp_type.as_str()),
    );
    doc.insert(key.to_string(), Value::from(description.sdp.as_str()));
    doc
}

fn encode_candidate(candidate: &CandidateRecord) -> Value {
    json!({
        "sdpMid": candidate.sdp_mid,
        "sdpMLineIndex": candidate.sdp_mline_index,
        "candidate": candidate.sdp,
    })
}

/// Decodes what `role` has to consume from a room document.
///
/// Candidates are reported before the description. Missing or cleared keys yield nothing, and
/// malformed entries are skipped with a warning.
pub fn decode(doc: &RoomDocument, role: Role) -> Vec<DomainEvent> {
    let peer = role.peer();
    let mut events = Vec::with_capacity(2);

    if let Some(candidates) = decode_candidates(doc, peer.candidates_key()) {
        events.push(DomainEvent::RemoteCandidates(candidates));
    }

    let key = peer.description_key();
    match doc.get(key.as_str()) {
        None | Some(Value::Null) => {}
        Some(Value::String(sdp)) => {
            events.push(DomainEvent::RemoteDescription(SessionDescription {
                sdp_type: peer.local_sdp_type(),
                sdp: sdp.clone(),
            }));
        }
        Some(other) => {
            tracing::warn!(%key, value = ?other, "Ignoring malformed session description");
        }
    }

    events
}

fn decode_candidates(doc: &RoomDocument, key: SignalingKey) -> Option<Vec<CandidateRecord>> {
    match doc.get(key.as_str())? {
        Value::Null => None,
        Value::Array(entries) => Some(
            entries
                .iter()
                .filter_map(
                    |entry| match serde_json::from_value::<CandidateRecord>(entry.clone()) {
                        Ok(candidate) => Some(candidate),
                        Err(err) => {
                            tracing::warn!(%key, ?entry, ?err, "Skipping malformed candidate");
                            None
                        }
                    },
                )
                .collect(),
        ),
        other => {
            tracing::warn!(%key, value = ?other, "Ignoring malformed candidate list");
            None
        }
    }
}

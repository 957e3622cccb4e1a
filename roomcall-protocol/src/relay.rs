use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// A room document as stored in the relay store.
///
/// Both peers write into the same document, so every write is a partial document that is merged
/// field by field into the stored one. A field set to `null` is considered cleared.
pub type RoomDocument = serde_json::Map<String, serde_json::Value>;

/// Name of the admission counter field.
pub const PARTICIPANT_COUNT: &str = "participantCount";
/// Name of the field carrying the type of the most recently published description.
pub const DESCRIPTION_TYPE: &str = "type";

/// The two fixed roles of a two-party negotiation.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// First participant of a room. Creates the offer.
    Offerer,
    /// Second participant of a room. Waits for the offer and replies with an answer.
    Answerer,
}

impl Role {
    /// The role of the other participant.
    pub fn peer(self) -> Role {
        match self {
            Role::Offerer => Role::Answerer,
            Role::Answerer => Role::Offerer,
        }
    }

    /// Type of the description this role creates.
    pub fn local_sdp_type(self) -> SdpType {
        match self {
            Role::Offerer => SdpType::Offer,
            Role::Answerer => SdpType::Answer,
        }
    }

    /// Key this role publishes its own description under.
    pub fn description_key(self) -> SignalingKey {
        match self {
            Role::Offerer => SignalingKey::SdpOffer,
            Role::Answerer => SignalingKey::SdpAnswer,
        }
    }

    /// Key this role publishes its own candidates under.
    pub fn candidates_key(self) -> SignalingKey {
        match self {
            Role::Offerer => SignalingKey::IceOffer,
            Role::Answerer => SignalingKey::IceAnswer,
        }
    }
}

impl Display for Role {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Offerer => f.write_str("offerer"),
            Role::Answerer => f.write_str("answerer"),
        }
    }
}

/// Negotiation type of a session description.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

impl SdpType {
    pub fn as_str(self) -> &'static str {
        match self {
            SdpType::Offer => "offer",
            SdpType::Answer => "answer",
        }
    }
}

/// A session description as created by a transport object.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    /// Whether this description is an offer or an answer.
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    /// Serialized SDP payload.
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// A single ICE candidate as exchanged through the relay document.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash)]
pub struct CandidateRecord {
    /// Media stream identification tag of the m-line this candidate belongs to.
    #[serde(rename = "sdpMid")]
    pub sdp_mid: String,
    /// Index of the m-line this candidate belongs to.
    #[serde(rename = "sdpMLineIndex")]
    pub sdp_mline_index: u16,
    /// The candidate attribute line.
    #[serde(rename = "candidate")]
    pub sdp: String,
}

impl CandidateRecord {
    pub fn new(sdp_mid: impl Into<String>, sdp_mline_index: u16, sdp: impl Into<String>) -> Self {
        Self {
            sdp_mid: sdp_mid.into(),
            sdp_mline_index,
            sdp: sdp.into(),
        }
    }
}

/// Keys of the signaling part of a room document.
///
/// Each role only ever writes its own description and candidate keys, the peer consumes them and
/// clears them again. This keeps concurrent writes of both peers on distinct fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalingKey {
    SdpOffer,
    SdpAnswer,
    IceOffer,
    IceAnswer,
}

impl SignalingKey {
    pub fn as_str(self) -> &'static str {
        match self {
            SignalingKey::SdpOffer => "sdpOffer",
            SignalingKey::SdpAnswer => "sdpAnswer",
            SignalingKey::IceOffer => "iceOffer",
            SignalingKey::IceAnswer => "iceAnswer",
        }
    }
}

impl Display for SignalingKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The admission part of a room document.
///
/// Only the participant counter lives here. It is written exclusively while admitting a
/// participant and never by the negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AdmissionFields {
    pub participant_count: u32,
}

impl AdmissionFields {
    /// Reads the admission fields of a document. A missing or malformed counter counts as zero.
    pub fn from_document(doc: &RoomDocument) -> Self {
        let participant_count = doc
            .get(PARTICIPANT_COUNT)
            .and_then(serde_json::Value::as_u64)
            .and_then(|count| u32::try_from(count).ok())
            .unwrap_or(0);
        Self { participant_count }
    }

    pub fn to_document(self) -> RoomDocument {
        let mut doc = RoomDocument::new();
        doc.insert(
            PARTICIPANT_COUNT.to_string(),
            serde_json::Value::from(self.participant_count),
        );
        doc
    }
}

/// A message written to the relay document.
///
/// Messages are never written as a whole document; each one only touches the fields it owns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalingMessage {
    /// Initial admission state of a freshly created room.
    RoomInit { participant_count: u32 },
    /// The offerer's local description.
    Offer(SessionDescription),
    /// The answerer's local description.
    Answer(SessionDescription),
    /// All local candidates gathered so far by `role`.
    ///
    /// Bundles are cumulative: every publish contains the full list, so a lost intermediate write
    /// is repaired by the next one.
    IceBundle {
        role: Role,
        candidates: Vec<CandidateRecord>,
    },
    /// Marks a key as consumed by setting it to `null`.
    Clear(SignalingKey),
}

impl SignalingMessage {
    /// Name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            SignalingMessage::RoomInit { .. } => "RoomInit",
            SignalingMessage::Offer(_) => "Offer",
            SignalingMessage::Answer(_) => "Answer",
            SignalingMessage::IceBundle { .. } => "IceBundle",
            SignalingMessage::Clear(_) => "Clear",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn candidate_wire_shape() {
        let candidate =
            CandidateRecord::new("0", 1, "candidate:1 1 udp 2122260223 10.0.0.1 5000 typ host");
        let value = serde_json::to_value(&candidate).unwrap();
        assert_eq!(
            value,
            json!({
                "sdpMid": "0",
                "sdpMLineIndex": 1,
                "candidate": "candidate:1 1 udp 2122260223 10.0.0.1 5000 typ host",
            })
        );

        let parsed: CandidateRecord = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, candidate);
    }

    #[test]
    fn description_wire_shape() {
        let description = SessionDescription::answer("v=0");
        assert_eq!(
            serde_json::to_value(&description).unwrap(),
            json!({"type": "answer", "sdp": "v=0"})
        );
    }

    #[test]
    fn role_keys_are_disjoint() {
        assert_eq!(Role::Offerer.candidates_key(), SignalingKey::IceOffer);
        assert_eq!(Role::Answerer.candidates_key(), SignalingKey::IceAnswer);
        assert_eq!(Role::Offerer.description_key(), SignalingKey::SdpOffer);
        assert_eq!(Role::Answerer.description_key(), SignalingKey::SdpAnswer);
        assert_eq!(Role::Offerer.peer(), Role::Answerer);
        assert_eq!(Role::Answerer.peer().local_sdp_type(), SdpType::Offer);
    }

    #[test]
    fn admission_fields_missing_counter() {
        let mut doc = RoomDocument::new();
        assert_eq!(AdmissionFields::from_document(&doc).participant_count, 0);

        doc.insert(PARTICIPANT_COUNT.to_string(), json!("two"));
        assert_eq!(AdmissionFields::from_document(&doc).participant_count, 0);

        doc.insert(PARTICIPANT_COUNT.to_string(), json!(2));
        assert_eq!(AdmissionFields::from_document(&doc).participant_count, 2);
    }

    #[test]
    fn admission_fields_to_document() {
        let doc = AdmissionFields {
            participant_count: 1,
        }
        .to_document();
        assert_eq!(serde_json::Value::Object(doc), json!({"participantCount": 1}));
    }
}

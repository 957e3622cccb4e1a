use crate::negotiation::Phase;
use roomcall_protocol::SdpType;
use roomcall_webrtc::DescriptionSide;
use roomcall_webrtc::error::WebrtcError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("room {room_id} is full")]
    RoomFull { room_id: String },
    #[error("admission store unavailable: {0}")]
    Unavailable(#[from] Box<anyhow::Error>),
}

impl From<anyhow::Error> for AdmissionError {
    fn from(err: anyhow::Error) -> Self {
        AdmissionError::Unavailable(Box::new(err))
    }
}

/// Anomalies during negotiation. None of them is fatal to the worker. They are logged, and only
/// the create and set failures that stall the negotiation are reported to the session owner.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum NegotiationError {
    #[error("failed to create session description: {0}")]
    DescriptionCreate(String),
    #[error("failed to set {side:?} session description: {reason}")]
    DescriptionSet {
        side: DescriptionSide,
        reason: String,
    },
    #[error("dropped duplicate {0:?} session description")]
    DuplicateDescription(SdpType),
    #[error("failed to publish {kind} to relay: {reason}")]
    RelayPublish { kind: &'static str, reason: String },
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Admission(#[from] AdmissionError),
    #[error("transport error: {0}")]
    Transport(#[from] Box<WebrtcError>),
    #[error("relay error: {0}")]
    Relay(#[from] Box<anyhow::Error>),
}

impl SessionError {
    /// Terminal phase of a session that failed to be acquired.
    pub fn phase(&self) -> Phase {
        match self {
            SessionError::Admission(AdmissionError::RoomFull { .. }) => Phase::Rejected,
            _ => Phase::Failed,
        }
    }
}

impl From<WebrtcError> for SessionError {
    fn from(err: WebrtcError) -> Self {
        SessionError::Transport(Box::new(err))
    }
}

impl From<anyhow::Error> for SessionError {
    fn from(err: anyhow::Error) -> Self {
        SessionError::Relay(Box::new(err))
    }
}

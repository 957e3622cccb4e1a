pub mod relay;

pub use relay::{
    AdmissionFields, CandidateRecord, DESCRIPTION_TYPE, PARTICIPANT_COUNT, Role, RoomDocument,
    SdpType, SessionDescription, SignalingKey, SignalingMessage,
};

pub mod config;
pub mod error;
pub mod media;
#[cfg(feature = "test-utils")]
pub mod mock;
mod peer;
mod receiver;
mod sender;
pub mod transport;

pub use media::{FramePipeline, LocalStream, MediaKind, MediaPipeline};
pub use peer::{Peer, RtcEngine};
pub use receiver::Receiver;
pub use sender::Sender;
pub use transport::{
    DescriptionSide, OnPeerEventCb, PeerConnectionState, PeerEvent, PeerTransport,
    TransportEngine,
};

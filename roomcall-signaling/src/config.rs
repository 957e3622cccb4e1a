use roomcall_webrtc::config::IceConfig;
use serde::{Deserialize, Serialize};

/// Maximum number of participants in a room.
pub const ROOM_CAPACITY: u32 = 2;
pub const SESSION_EVENTS_CAPACITY: usize = 100;

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct SessionConfig {
    pub admission: AdmissionConfig,
    pub ice: IceConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct AdmissionConfig {
    /// How often an admission is retried when another participant changed the room concurrently.
    pub max_attempts: u8,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self { max_attempts: 3 }
    }
}

use serde::{Deserialize, Serialize};
use std::time::Duration;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;

pub const AUDIO_CLOCK_RATE: u32 = 48_000;
pub const AUDIO_CHANNELS: u16 = 1;
pub const VIDEO_CLOCK_RATE: u32 = 90_000;
pub const AUDIO_FRAME_DURATION: Duration = Duration::from_millis(20);
pub const VIDEO_FRAME_DURATION: Duration = Duration::from_millis(33);
pub const MEDIA_FRAME_CHANNEL_CAPACITY: usize = 64;

pub const DEFAULT_STUN_SERVERS: [&str; 2] = [
    "stun:stun1.l.google.com:19302",
    "stun:stun2.l.google.com:19302",
];

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct IceConfig {
    pub ice_servers: Vec<IceServer>,
}

impl Default for IceConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec![IceServer {
                urls: DEFAULT_STUN_SERVERS.iter().map(|url| url.to_string()).collect(),
                username: None,
                credential: None,
            }],
        }
    }
}

pub trait IntoRtc<T> {
    fn into_rtc(self) -> T;
}

impl IntoRtc<RTCIceServer> for IceServer {
    fn into_rtc(self) -> RTCIceServer {
        RTCIceServer {
            urls: self.urls,
            username: self.username.unwrap_or_default(),
            credential: self.credential.unwrap_or_default(),
            ..Default::default()
        }
    }
}

impl IntoRtc<RTCConfiguration> for IceConfig {
    fn into_rtc(self) -> RTCConfiguration {
        RTCConfiguration {
            ice_servers: self
                .ice_servers
                .into_iter()
                .map(IntoRtc::into_rtc)
                .collect(),
            ..Default::default()
        }
    }
}

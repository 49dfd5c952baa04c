//! Mirroring server options
//!
//! Builds the `key=value` argument list the on-device server expects on its
//! command line, plus the abstract socket name derived from the instance id.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::{ServerConfig, VideoConfig};

/// Main class of the mirroring server inside the pushed jar
const SERVER_MAIN_CLASS: &str = "com.genymobile.scrcpy.Server";

/// Socket name prefix; the instance id is appended as 8 hex digits
const SOCKET_NAME_PREFIX: &str = "scrcpy";

/// Video codec requested from the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    /// H.264 / AVC
    H264,
    /// H.265 / HEVC
    H265,
}

impl VideoCodec {
    /// Name used on the server command line
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoCodec::H264 => "h264",
            VideoCodec::H265 => "h265",
        }
    }

    /// Codec id the server writes at the start of the video socket
    pub fn codec_id(&self) -> u32 {
        match self {
            VideoCodec::H264 => 0x6832_3634,
            VideoCodec::H265 => 0x6832_3635,
        }
    }

    /// Maps a codec id read from the video socket back to a codec
    pub fn from_codec_id(id: u32) -> Option<Self> {
        match id {
            0x6832_3634 => Some(VideoCodec::H264),
            0x6832_3635 => Some(VideoCodec::H265),
            _ => None,
        }
    }
}

impl fmt::Display for VideoCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Video orientation lock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrientationLock {
    /// Follow the device orientation
    Unlocked,
    /// Lock to a quarter-turn value (0-3)
    Fixed(u8),
}

impl OrientationLock {
    /// Value passed as `lock_video_orientation`
    fn as_arg(&self) -> i32 {
        match self {
            OrientationLock::Unlocked => -1,
            OrientationLock::Fixed(turns) => i32::from(*turns),
        }
    }
}

/// Random 31-bit identifier that keeps concurrent server instances apart
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstanceId(u32);

impl InstanceId {
    /// Generates a random instance id
    pub fn random() -> Self {
        Self(rand::thread_rng().gen_range(0..0x8000_0000))
    }

    /// Wraps a known id
    pub fn from_raw(id: u32) -> Self {
        Self(id & 0x7fff_ffff)
    }

    /// Raw numeric value
    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

/// Options the mirroring server is started with
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Server version; must match the pushed binary
    pub version: String,
    /// Where the binary lives on the device
    pub remote_path: String,
    /// Video codec
    pub video_codec: VideoCodec,
    /// Bit rate in bits per second
    pub video_bit_rate: u32,
    /// Longest side, 0 for native
    pub max_size: u16,
    /// Frame rate cap
    pub max_fps: u16,
    /// Orientation lock
    pub orientation_lock: OrientationLock,
    /// Display index
    pub display_id: u32,
    /// Wake the screen on connect
    pub power_on: bool,
    /// Instance id
    pub scid: InstanceId,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self::from_config(&VideoConfig::default(), &ServerConfig::default())
    }
}

impl ServerOptions {
    /// Builds options from the loaded configuration with a fresh instance id
    pub fn from_config(video: &VideoConfig, server: &ServerConfig) -> Self {
        Self {
            version: server.version.clone(),
            remote_path: server.remote_path.clone(),
            video_codec: video.codec,
            video_bit_rate: video.bit_rate,
            max_size: video.max_size,
            max_fps: video.max_fps,
            orientation_lock: video.orientation(),
            display_id: video.display_id,
            power_on: video.power_on,
            scid: InstanceId::random(),
        }
    }

    /// Sets the instance id
    pub fn with_scid(mut self, scid: InstanceId) -> Self {
        self.scid = scid;
        self
    }

    /// Abstract socket the server listens on
    pub fn socket_name(&self) -> String {
        format!("{}_{}", SOCKET_NAME_PREFIX, self.scid)
    }

    /// Server arguments in `key=value` form
    ///
    /// Audio is disabled and the device meta and dummy byte are suppressed,
    /// so the first bytes on the video socket are the codec metadata.
    pub fn to_args(&self) -> Vec<String> {
        vec![
            format!("scid={}", self.scid),
            "log_level=debug".to_string(),
            format!("video_codec={}", self.video_codec),
            format!("video_bit_rate={}", self.video_bit_rate),
            format!("max_size={}", self.max_size),
            format!("max_fps={}", self.max_fps),
            format!(
                "lock_video_orientation={}",
                self.orientation_lock.as_arg()
            ),
            format!("display_id={}", self.display_id),
            format!("power_on={}", self.power_on),
            "audio=false".to_string(),
            "tunnel_forward=true".to_string(),
            "send_device_meta=false".to_string(),
            "send_dummy_byte=false".to_string(),
        ]
    }

    /// Full shell command that launches the server
    pub fn command_line(&self) -> String {
        let mut parts = vec![
            format!("CLASSPATH={}", self.remote_path),
            "app_process".to_string(),
            "/".to_string(),
            SERVER_MAIN_CLASS.to_string(),
            self.version.clone(),
        ];
        parts.extend(self.to_args());
        parts.join(" ")
    }
}

//! Configuration management for DeviceMirror
//!
//! This module handles application configuration including:
//! - Loading and saving the TOML configuration file
//! - Managing the configuration directory
//! - Providing the mirroring defaults (h264, 8 Mbps, 1920 px, 30 fps)
//! - Configuration validation

use crate::error::{ConfigError, ConfigResult};
use crate::mirror::{OrientationLock, VideoCodec};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_FILE_NAME: &str = "config.toml";

const DEFAULT_BIT_RATE: u32 = 8_000_000;
const DEFAULT_MAX_SIZE: u16 = 1920;
const DEFAULT_MAX_FPS: u16 = 30;
const DEFAULT_DISPLAY_ID: u32 = 0;
const DEFAULT_BORDER_INSET: u32 = 6;

const DEFAULT_BRIDGE_HOST: &str = "127.0.0.1";
const DEFAULT_WEBSOCKET_PORT: u16 = 8080;
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5000;
const DEFAULT_TUNNEL_ATTEMPTS: u32 = 20;
const DEFAULT_TUNNEL_RETRY_DELAY_MS: u64 = 100;

const DEFAULT_SERVER_LOCAL_PATH: &str = "scrcpy-server";
const DEFAULT_SERVER_VERSION: &str = "2.6.1";
const DEFAULT_SERVER_REMOTE_PATH: &str = "/data/local/tmp/scrcpy-server.jar";

const MAX_FPS_LIMIT: u16 = 120;
const MAX_BORDER_INSET: u32 = 1000;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Video and display options sent to the device
    #[serde(default)]
    pub video: VideoConfig,

    /// How to reach the ADB server
    #[serde(default)]
    pub bridge: BridgeConfig,

    /// Mirroring server binary
    #[serde(default)]
    pub server: ServerConfig,
}

/// Video stream and presentation options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    /// Video codec requested from the device
    pub codec: VideoCodec,

    /// Encoder bit rate in bits per second
    pub bit_rate: u32,

    /// Longest side of the mirrored video, 0 for native size
    pub max_size: u16,

    /// Frame rate cap
    pub max_fps: u16,

    /// Fixed orientation (0-3 quarter turns); absent means unlocked
    #[serde(skip_serializing_if = "Option::is_none")]
    pub orientation_lock: Option<u8>,

    /// Display to mirror
    pub display_id: u32,

    /// Turn the device screen on when connecting
    pub power_on: bool,

    /// Inset in pixels kept between the container edge and the surface
    pub border_inset: u32,
}

/// Transport used to reach the ADB server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BridgeMode {
    /// ADB server exposed through a WebSocket-to-TCP bridge
    WebSocket,
    /// Direct TCP connection to the ADB server
    Tcp,
}

/// ADB server connection options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// WebSocket bridge or plain TCP
    pub mode: BridgeMode,

    /// Bridge or ADB server host
    pub host: String,

    /// Bridge or ADB server port
    pub port: u16,

    /// Device serial; the first listed device is used when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial: Option<String>,

    /// Timeout for opening one connection, in milliseconds
    pub connect_timeout_ms: u64,

    /// How many times to try the server's socket while it boots
    pub tunnel_attempts: u32,

    /// Delay between socket attempts, in milliseconds
    pub tunnel_retry_delay_ms: u64,
}

/// Location and version of the mirroring server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Local path of the server binary that gets pushed
    pub local_path: PathBuf,

    /// Server version string passed on its command line
    pub version: String,

    /// Destination path on the device
    pub remote_path: String,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            codec: VideoCodec::H264,
            bit_rate: DEFAULT_BIT_RATE,
            max_size: DEFAULT_MAX_SIZE,
            max_fps: DEFAULT_MAX_FPS,
            orientation_lock: None,
            display_id: DEFAULT_DISPLAY_ID,
            power_on: true,
            border_inset: DEFAULT_BORDER_INSET,
        }
    }
}

impl VideoConfig {
    /// Returns the orientation lock as the server understands it
    pub fn orientation(&self) -> OrientationLock {
        match self.orientation_lock {
            Some(turns) => OrientationLock::Fixed(turns),
            None => OrientationLock::Unlocked,
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            mode: BridgeMode::WebSocket,
            host: DEFAULT_BRIDGE_HOST.to_string(),
            port: DEFAULT_WEBSOCKET_PORT,
            serial: None,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            tunnel_attempts: DEFAULT_TUNNEL_ATTEMPTS,
            tunnel_retry_delay_ms: DEFAULT_TUNNEL_RETRY_DELAY_MS,
        }
    }
}

impl BridgeConfig {
    /// Connect timeout as a Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Delay between tunnel attempts as a Duration
    pub fn tunnel_retry_delay(&self) -> Duration {
        Duration::from_millis(self.tunnel_retry_delay_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            local_path: PathBuf::from(DEFAULT_SERVER_LOCAL_PATH),
            version: DEFAULT_SERVER_VERSION.to_string(),
            remote_path: DEFAULT_SERVER_REMOTE_PATH.to_string(),
        }
    }
}

/// Configuration manager
pub struct ConfigManager {
    config_dir: PathBuf,
    config_file: PathBuf,
}

impl ConfigManager {
    /// Creates a new ConfigManager rooted at the platform config directory
    ///
    /// # Errors
    ///
    /// Returns error if project directory cannot be determined
    pub fn new() -> ConfigResult<Self> {
        let config_dir = Self::get_config_directory()?;
        Ok(Self::with_directory(config_dir))
    }

    /// Creates a ConfigManager rooted at an explicit directory
    pub fn with_directory(config_dir: impl Into<PathBuf>) -> Self {
        let config_dir = config_dir.into();
        let config_file = config_dir.join(CONFIG_FILE_NAME);
        Self {
            config_dir,
            config_file,
        }
    }

    fn get_config_directory() -> ConfigResult<PathBuf> {
        ProjectDirs::from("com", "devicemirror", "DeviceMirror")
            .map(|dirs| dirs.config_dir().to_path_buf())
            .ok_or_else(|| {
                ConfigError::DirectoryNotFound(
                    "Could not determine configuration directory".to_string(),
                )
            })
    }

    fn ensure_config_directory(&self) -> ConfigResult<()> {
        if !self.config_dir.exists() {
            fs::create_dir_all(&self.config_dir).map_err(|e| {
                ConfigError::DirectoryCreationFailed(format!(
                    "Failed to create config directory at {:?}: {}",
                    self.config_dir, e
                ))
            })?;
        }
        Ok(())
    }

    /// Loads configuration from file, or creates default if it doesn't exist
    ///
    /// # Errors
    ///
    /// Returns error if configuration cannot be loaded or created
    pub fn load_or_create_default(&self) -> ConfigResult<Config> {
        self.ensure_config_directory()?;

        if self.config_file.exists() {
            self.load()
        } else {
            let config = Config::default();
            self.save(&config)?;
            Ok(config)
        }
    }

    fn load(&self) -> ConfigResult<Config> {
        let content = fs::read_to_string(&self.config_file).map_err(|e| {
            ConfigError::LoadFailed(format!("Failed to read config file: {}", e))
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| {
            ConfigError::LoadFailed(format!("Failed to parse config file: {}", e))
        })?;

        validate(&config)?;

        Ok(config)
    }

    /// Saves configuration to file
    ///
    /// # Errors
    ///
    /// Returns error if configuration is invalid or cannot be written
    pub fn save(&self, config: &Config) -> ConfigResult<()> {
        self.ensure_config_directory()?;
        validate(config)?;

        let content = toml::to_string_pretty(config).map_err(|e| {
            ConfigError::SaveFailed(format!("Failed to serialize config: {}", e))
        })?;

        fs::write(&self.config_file, content).map_err(|e| {
            ConfigError::SaveFailed(format!("Failed to write config file: {}", e))
        })?;

        Ok(())
    }

    /// Gets the configuration file path
    pub fn config_file(&self) -> &Path {
        &self.config_file
    }

    /// Gets the configuration directory path
    pub fn config_directory(&self) -> &Path {
        &self.config_dir
    }
}

/// Validates configuration values
///
/// # Errors
///
/// Returns `ConfigError::InvalidValue` naming the first offending field
pub fn validate(config: &Config) -> ConfigResult<()> {
    let video = &config.video;

    if video.bit_rate == 0 {
        return Err(ConfigError::InvalidValue(
            "Bit rate must be greater than 0".to_string(),
        ));
    }

    if video.max_fps == 0 || video.max_fps > MAX_FPS_LIMIT {
        return Err(ConfigError::InvalidValue(format!(
            "Max FPS must be between 1 and {}",
            MAX_FPS_LIMIT
        )));
    }

    if video.border_inset >= MAX_BORDER_INSET {
        return Err(ConfigError::InvalidValue(format!(
            "Border inset must be below {} pixels",
            MAX_BORDER_INSET
        )));
    }

    if let Some(turns) = video.orientation_lock {
        if turns > 3 {
            return Err(ConfigError::InvalidValue(
                "Orientation lock must be between 0 and 3".to_string(),
            ));
        }
    }

    if config.bridge.port == 0 {
        return Err(ConfigError::InvalidValue(
            "Bridge port must not be 0".to_string(),
        ));
    }

    if config.bridge.tunnel_attempts == 0 {
        return Err(ConfigError::InvalidValue(
            "Tunnel attempts must be at least 1".to_string(),
        ));
    }

    Ok(())
}

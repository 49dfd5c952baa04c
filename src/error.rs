//! Error types for DeviceMirror
//!
//! This module defines all error types used throughout the crate.
//! Each concern gets its own enum so callers can tell a failed connection
//! from a failed start or a malformed packet; `MirrorError` aggregates them.

use std::io;
use thiserror::Error;

/// Main error type for DeviceMirror
#[derive(Error, Debug)]
pub enum MirrorError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Transport and ADB connection errors
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// Session start errors
    #[error("Start error: {0}")]
    Start(#[from] StartError),

    /// Media stream errors
    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),

    /// Input injection errors
    #[error("Input error: {0}")]
    Input(#[from] InputError),

    /// Decoder and recorder errors
    #[error("Render error: {0}")]
    Render(#[from] RenderError),

    /// Session registry errors
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Generic error with context
    #[error("{0}")]
    Generic(String),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("Failed to save configuration: {0}")]
    SaveFailed(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    #[error("Configuration directory not found: {0}")]
    DirectoryNotFound(String),

    #[error("Failed to create configuration directory: {0}")]
    DirectoryCreationFailed(String),
}

/// Transport open/close failures and ADB protocol failures
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("Connection failed: {0}")]
    ConnectFailed(String),

    #[error("Connection timeout after {0:?}")]
    Timeout(std::time::Duration),

    #[error("WebSocket handshake failed: {0}")]
    Handshake(String),

    #[error("ADB request rejected: {0}")]
    Rejected(String),

    #[error("Unexpected ADB response: {0}")]
    Protocol(String),

    #[error("Connection closed")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Failures of `MirrorSession::start`
///
/// The session is fully disposed before any of these reach the caller.
#[derive(Error, Debug)]
pub enum StartError {
    #[error("No device was supplied")]
    MissingDevice,

    #[error("No render target is bound")]
    MissingRenderTarget,

    #[error("No decoder is attached to the render target")]
    MissingDecoder,

    #[error("Session is already running")]
    AlreadyRunning,

    #[error("Failed to read server binary: {0}")]
    ServerBinary(String),

    #[error("Failed to push server: {0}")]
    ServerPush(String),

    #[error("Failed to start mirroring client: {0}")]
    ClientStart(String),

    #[error("Start was cancelled by a concurrent stop")]
    Cancelled,
}

/// Malformed configuration records or metadata; recovered locally
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeParseError {
    #[error("No sequence parameter set found in configuration packet")]
    MissingSps,

    #[error("Configuration packet truncated at bit {0}")]
    Truncated(usize),

    #[error("Invalid exp-Golomb code at bit {0}")]
    InvalidExpGolomb(usize),

    #[error("Configuration parsing is not supported for {0}")]
    Unsupported(&'static str),

    #[error("Invalid {field}: {value}")]
    InvalidValue {
        /// Name of the offending field
        field: &'static str,
        /// Value that was read
        value: u32,
    },
}

/// A rotation listener reported a failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Listener failed: {0}")]
pub struct ListenerError(pub String);

/// Orientation values outside 0-3
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Invalid rotation {0}, expected 0-3")]
pub struct InvalidRotation(pub u8);

/// Fatal media stream errors that end the session pipeline
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Invalid packet kind in header {0:#018x}")]
    InvalidPacketKind(u64),

    #[error("Packet too large: {size} bytes (max {max})")]
    PacketTooLarge { size: usize, max: usize },

    #[error("Unknown video codec id {0:#010x}")]
    UnknownCodec(u32),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Input injection errors
#[derive(Error, Debug)]
pub enum InputError {
    #[error("Input injector has been disposed")]
    Disposed,

    #[error("Input queue full, event dropped")]
    QueueFull,
}

/// Failures reported by decoders, render targets and recorders
#[derive(Error, Debug)]
pub enum RenderError {
    #[error("Decoder error: {0}")]
    Decoder(String),

    #[error("Recorder error: {0}")]
    Recorder(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Session registry errors
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Session already exists: {0}")]
    SessionAlreadyExists(String),

    #[error(transparent)]
    Start(#[from] StartError),
}

/// Type alias for Results using MirrorError
pub type Result<T> = std::result::Result<T, MirrorError>;

/// Type alias for Config Results
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Type alias for Connection Results
pub type ConnectionResult<T> = std::result::Result<T, ConnectionError>;

/// Type alias for Session Results
pub type SessionResult<T> = std::result::Result<T, SessionError>;

impl From<toml::de::Error> for MirrorError {
    fn from(err: toml::de::Error) -> Self {
        MirrorError::Config(ConfigError::LoadFailed(err.to_string()))
    }
}

impl From<toml::ser::Error> for MirrorError {
    fn from(err: toml::ser::Error) -> Self {
        MirrorError::Config(ConfigError::SaveFailed(err.to_string()))
    }
}

impl From<ConnectionError> for StartError {
    fn from(err: ConnectionError) -> Self {
        StartError::ClientStart(err.to_string())
    }
}

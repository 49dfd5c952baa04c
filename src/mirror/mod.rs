//! Mirroring server contracts
//!
//! This module describes what the session needs from a device:
//! - Pushing the server binary and starting it with options
//! - The started client's video stream, control channel and stdout
//! - An exit signal and a graceful close

pub mod client;
pub mod options;

pub use client::{ClientHandle, MirrorClient, MirrorDevice, VideoMetadata, VideoStream};
pub use options::{InstanceId, OrientationLock, ServerOptions, VideoCodec};

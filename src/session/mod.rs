//! Mirroring session module
//!
//! This module handles the lifecycle of device mirroring sessions:
//! - The session controller (start, stop, dispose, layout, input)
//! - Device rotation tracking and its listeners
//! - The per-device session registry

pub mod controller;
pub mod manager;
pub mod rotation;

pub use controller::{MirrorSession, ServerBinary, SessionConfig, SessionMetrics};
pub use manager::{RecorderFactory, SessionManager};
pub use rotation::{ListenerId, Rotation, RotationListener, RotationTracker};

//! Input module
//!
//! This module handles input injection into the mirrored device:
//! - Control message types (key, touch, scroll, back-or-screen-on)
//! - Big-endian serialization of control messages
//! - A queued writer on the session's control channel

pub mod codec;
pub mod injector;
pub mod types;

// Re-export commonly used types
pub use codec::ControlMessageCodec;
pub use injector::InputInjector;
pub use types::{
    AndroidKeycode, ControlMessage, KeyAction, MotionAction, MouseButton, Position,
    POINTER_ID_GENERIC_FINGER, POINTER_ID_MOUSE,
};

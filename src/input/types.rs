//! Control message types
//!
//! This module defines the events the injector sends to the device, using
//! Android's key codes, motion actions and button masks.

/// Pointer id the device reserves for a mouse
pub const POINTER_ID_MOUSE: u64 = u64::MAX;

/// Pointer id for a generic finger
pub const POINTER_ID_GENERIC_FINGER: u64 = u64::MAX - 1;

/// Control message type tags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ControlMessageType {
    /// Key press or release
    InjectKeycode = 0,
    /// UTF-8 text
    InjectText = 1,
    /// Touch or mouse pointer event
    InjectTouchEvent = 2,
    /// Scroll wheel event
    InjectScrollEvent = 3,
    /// Back, or wake the screen if it is off
    BackOrScreenOn = 4,
}

/// Key action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum KeyAction {
    /// Key pressed
    Down = 0,
    /// Key released
    Up = 1,
}

/// Touch action (subset of Android `MotionEvent` actions)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MotionAction {
    /// Pointer pressed
    Down = 0,
    /// Pointer released
    Up = 1,
    /// Pointer moved while pressed
    Move = 2,
    /// Gesture aborted
    Cancel = 3,
    /// Pointer moved without being pressed
    HoverMove = 7,
}

/// Mouse buttons as an Android `MotionEvent` button mask
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum MouseButton {
    /// Left button
    Primary = 1 << 0,
    /// Right button
    Secondary = 1 << 1,
    /// Middle button
    Tertiary = 1 << 2,
    /// Back side button
    Back = 1 << 3,
    /// Forward side button
    Forward = 1 << 4,
}

impl MouseButton {
    /// Bit in the button mask
    pub fn mask(self) -> u32 {
        self as u32
    }
}

/// Common Android key codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum AndroidKeycode {
    Home = 3,
    Back = 4,
    DpadUp = 19,
    DpadDown = 20,
    DpadLeft = 21,
    DpadRight = 22,
    VolumeUp = 24,
    VolumeDown = 25,
    Power = 26,
    Tab = 61,
    Space = 62,
    Enter = 66,
    Del = 67,
    Escape = 111,
    ForwardDel = 112,
    MoveHome = 122,
    MoveEnd = 123,
    Menu = 82,
    AppSwitch = 187,
}

impl AndroidKeycode {
    /// Raw key code value
    pub fn code(self) -> u32 {
        self as u32
    }
}

/// A point in device pixels together with the frame size it refers to
///
/// The device discards events whose frame size does not match its current
/// video size, which protects against stale coordinates after a rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    /// Horizontal device pixel
    pub x: i32,
    /// Vertical device pixel
    pub y: i32,
    /// Frame width the point refers to
    pub screen_width: u16,
    /// Frame height the point refers to
    pub screen_height: u16,
}

impl Position {
    /// Point on a screen of the given size
    pub fn new(x: i32, y: i32, screen_width: u16, screen_height: u16) -> Self {
        Self {
            x,
            y,
            screen_width,
            screen_height,
        }
    }
}

/// A message on the control socket
#[derive(Debug, Clone, PartialEq)]
pub enum ControlMessage {
    /// Key press or release
    InjectKeycode {
        action: KeyAction,
        keycode: u32,
        repeat: u32,
        metastate: u32,
    },
    /// Touch or mouse pointer event
    InjectTouch {
        action: MotionAction,
        pointer_id: u64,
        position: Position,
        /// 0.0 to 1.0
        pressure: f32,
        action_button: u32,
        buttons: u32,
    },
    /// Wheel event; amounts are in notches
    InjectScroll {
        position: Position,
        hscroll: f32,
        vscroll: f32,
        buttons: u32,
    },
    /// Back key, or turn the screen on when it is off
    BackOrScreenOn { action: KeyAction },
}

impl ControlMessage {
    /// Key event without repeat or modifiers
    pub fn keycode(action: KeyAction, keycode: AndroidKeycode) -> Self {
        ControlMessage::InjectKeycode {
            action,
            keycode: keycode.code(),
            repeat: 0,
            metastate: 0,
        }
    }

    /// Single-finger touch event
    pub fn touch(action: MotionAction, position: Position) -> Self {
        let pressure = if action == MotionAction::Up { 0.0 } else { 1.0 };
        ControlMessage::InjectTouch {
            action,
            pointer_id: POINTER_ID_GENERIC_FINGER,
            position,
            pressure,
            action_button: 0,
            buttons: 0,
        }
    }

    /// Mouse button event
    pub fn mouse(action: MotionAction, position: Position, button: MouseButton, buttons: u32) -> Self {
        let pressure = if action == MotionAction::Up { 0.0 } else { 1.0 };
        ControlMessage::InjectTouch {
            action,
            pointer_id: POINTER_ID_MOUSE,
            position,
            pressure,
            action_button: button.mask(),
            buttons,
        }
    }

    /// Scroll event
    pub fn scroll(position: Position, hscroll: f32, vscroll: f32) -> Self {
        ControlMessage::InjectScroll {
            position,
            hscroll,
            vscroll,
            buttons: 0,
        }
    }

    /// Back-or-screen-on event
    pub fn back_or_screen_on(action: KeyAction) -> Self {
        ControlMessage::BackOrScreenOn { action }
    }

    /// Type tag written as the first byte
    pub fn message_type(&self) -> ControlMessageType {
        match self {
            ControlMessage::InjectKeycode { .. } => ControlMessageType::InjectKeycode,
            ControlMessage::InjectTouch { .. } => ControlMessageType::InjectTouchEvent,
            ControlMessage::InjectScroll { .. } => ControlMessageType::InjectScrollEvent,
            ControlMessage::BackOrScreenOn { .. } => ControlMessageType::BackOrScreenOn,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_touch_pressure_follows_action() {
        let position = Position::new(10, 20, 1080, 2400);

        match ControlMessage::touch(MotionAction::Down, position) {
            ControlMessage::InjectTouch {
                pressure,
                pointer_id,
                ..
            } => {
                assert_eq!(pressure, 1.0);
                assert_eq!(pointer_id, POINTER_ID_GENERIC_FINGER);
            }
            other => panic!("unexpected message {:?}", other),
        }

        match ControlMessage::touch(MotionAction::Up, position) {
            ControlMessage::InjectTouch { pressure, .. } => assert_eq!(pressure, 0.0),
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn test_mouse_message_sets_action_button() {
        let message = ControlMessage::mouse(
            MotionAction::Down,
            Position::new(1, 2, 3, 4),
            MouseButton::Secondary,
            MouseButton::Secondary.mask(),
        );
        assert!(matches!(
            message,
            ControlMessage::InjectTouch {
                pointer_id: POINTER_ID_MOUSE,
                action_button: 2,
                buttons: 2,
                ..
            }
        ));
        assert_eq!(message.message_type(), ControlMessageType::InjectTouchEvent);
    }

    #[test]
    fn test_keycode_values() {
        assert_eq!(AndroidKeycode::Back.code(), 4);
        assert_eq!(AndroidKeycode::AppSwitch.code(), 187);
        assert_eq!(
            ControlMessage::keycode(KeyAction::Down, AndroidKeycode::Home).message_type(),
            ControlMessageType::InjectKeycode
        );
    }
}

//! Control message serialization
//!
//! All multi-byte fields are big-endian:
//!
//! ```text
//! keycode:  type(1) action(1) keycode(4) repeat(4) metastate(4)
//! touch:    type(1) action(1) pointer_id(8) x(4) y(4) w(2) h(2)
//!           pressure(2) action_button(4) buttons(4)
//! scroll:   type(1) x(4) y(4) w(2) h(2) hscroll(2) vscroll(2) buttons(4)
//! back:     type(1) action(1)
//! ```

use bytes::{BufMut, BytesMut};
use std::io;
use tokio_util::codec::Encoder;

use crate::input::types::{ControlMessage, Position};

/// Scroll amounts are divided by this before fixed-point conversion
const SCROLL_DIVISOR: f32 = 16.0;

/// Encodes control messages for the control socket
#[derive(Debug, Clone, Copy, Default)]
pub struct ControlMessageCodec;

/// Converts a value in [0, 1] to unsigned 16-bit fixed point
fn to_u16_fixed(value: f32) -> u16 {
    let scaled = (value.clamp(0.0, 1.0) * 65536.0) as u32;
    scaled.min(0xffff) as u16
}

/// Converts a value in [-1, 1] to signed 16-bit fixed point
fn to_i16_fixed(value: f32) -> i16 {
    let scaled = (value.clamp(-1.0, 1.0) * 32768.0) as i32;
    scaled.clamp(-0x8000, 0x7fff) as i16
}

fn put_position(dst: &mut BytesMut, position: &Position) {
    dst.put_i32(position.x);
    dst.put_i32(position.y);
    dst.put_u16(position.screen_width);
    dst.put_u16(position.screen_height);
}

impl Encoder<ControlMessage> for ControlMessageCodec {
    type Error = io::Error;

    fn encode(&mut self, item: ControlMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.put_u8(item.message_type() as u8);

        match item {
            ControlMessage::InjectKeycode {
                action,
                keycode,
                repeat,
                metastate,
            } => {
                dst.put_u8(action as u8);
                dst.put_u32(keycode);
                dst.put_u32(repeat);
                dst.put_u32(metastate);
            }
            ControlMessage::InjectTouch {
                action,
                pointer_id,
                position,
                pressure,
                action_button,
                buttons,
            } => {
                dst.put_u8(action as u8);
                dst.put_u64(pointer_id);
                put_position(dst, &position);
                dst.put_u16(to_u16_fixed(pressure));
                dst.put_u32(action_button);
                dst.put_u32(buttons);
            }
            ControlMessage::InjectScroll {
                position,
                hscroll,
                vscroll,
                buttons,
            } => {
                put_position(dst, &position);
                dst.put_i16(to_i16_fixed(hscroll / SCROLL_DIVISOR));
                dst.put_i16(to_i16_fixed(vscroll / SCROLL_DIVISOR));
                dst.put_u32(buttons);
            }
            ControlMessage::BackOrScreenOn { action } => {
                dst.put_u8(action as u8);
            }
        }

        Ok(())
    }
}

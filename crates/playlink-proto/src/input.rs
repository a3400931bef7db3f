use serde::{Deserialize, Serialize};

use crate::wire::{
    Cursor, WireError, write_f32, write_var_i32, write_var_u32,
};

const EVENT_KEY_DOWN: u8 = 0;
const EVENT_KEY_UP: u8 = 1;
const EVENT_MOUSE_MOVE: u8 = 2;
const EVENT_MOUSE_KEY_DOWN: u8 = 3;
const EVENT_MOUSE_KEY_UP: u8 = 4;
const EVENT_MOUSE_WHEEL: u8 = 5;

/// One input action destined for the game host.
///
/// `key` is always a Linux input-event code (see `linux/input-event-codes.h`),
/// never the raw code reported by the local platform.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum InputEvent {
    KeyDown { key: u16 },
    KeyUp { key: u16 },
    MouseMove { dx: i32, dy: i32 },
    MouseKeyDown { key: u16 },
    MouseKeyUp { key: u16 },
    MouseWheel { dx: f32, dy: f32 },
}

impl InputEvent {
    pub fn name(&self) -> &'static str {
        match self {
            InputEvent::KeyDown { .. } => "KeyDown",
            InputEvent::KeyUp { .. } => "KeyUp",
            InputEvent::MouseMove { .. } => "MouseMove",
            InputEvent::MouseKeyDown { .. } => "MouseKeyDown",
            InputEvent::MouseKeyUp { .. } => "MouseKeyUp",
            InputEvent::MouseWheel { .. } => "MouseWheel",
        }
    }

    pub(crate) fn encode(&self, buf: &mut Vec<u8>) {
        match *self {
            InputEvent::KeyDown { key } => {
                buf.push(EVENT_KEY_DOWN);
                write_var_u32(buf, key as u32);
            }
            InputEvent::KeyUp { key } => {
                buf.push(EVENT_KEY_UP);
                write_var_u32(buf, key as u32);
            }
            InputEvent::MouseMove { dx, dy } => {
                buf.push(EVENT_MOUSE_MOVE);
                write_var_i32(buf, dx);
                write_var_i32(buf, dy);
            }
            InputEvent::MouseKeyDown { key } => {
                buf.push(EVENT_MOUSE_KEY_DOWN);
                write_var_u32(buf, key as u32);
            }
            InputEvent::MouseKeyUp { key } => {
                buf.push(EVENT_MOUSE_KEY_UP);
                write_var_u32(buf, key as u32);
            }
            InputEvent::MouseWheel { dx, dy } => {
                buf.push(EVENT_MOUSE_WHEEL);
                write_f32(buf, dx);
                write_f32(buf, dy);
            }
        }
    }

    pub(crate) fn decode(cursor: &mut Cursor<'_>) -> Result<Self, WireError> {
        let tag = cursor.read_u8()?;
        let event = match tag {
            EVENT_KEY_DOWN => InputEvent::KeyDown {
                key: read_key(cursor)?,
            },
            EVENT_KEY_UP => InputEvent::KeyUp {
                key: read_key(cursor)?,
            },
            EVENT_MOUSE_MOVE => InputEvent::MouseMove {
                dx: cursor.read_var_i32()?,
                dy: cursor.read_var_i32()?,
            },
            EVENT_MOUSE_KEY_DOWN => InputEvent::MouseKeyDown {
                key: read_key(cursor)?,
            },
            EVENT_MOUSE_KEY_UP => InputEvent::MouseKeyUp {
                key: read_key(cursor)?,
            },
            EVENT_MOUSE_WHEEL => InputEvent::MouseWheel {
                dx: cursor.read_f32()?,
                dy: cursor.read_f32()?,
            },
            other => return Err(WireError::UnknownEventTag(other)),
        };
        Ok(event)
    }
}

fn read_key(cursor: &mut Cursor<'_>) -> Result<u16, WireError> {
    let raw = cursor.read_var_u32()?;
    u16::try_from(raw).map_err(|_| WireError::InvalidData("key code out of range"))
}

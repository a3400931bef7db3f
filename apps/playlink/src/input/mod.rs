//! Local input capture: raw keyboard and pointer events in, traced wire
//! events out over the session's data channel.

pub mod capture;
pub mod keyboard;
pub mod keymap;
pub mod mouse;
pub mod sender;
pub mod terminal;

pub use capture::InputCapture;
pub use sender::InputSender;

/// Platform-neutral input as delivered by a front end.
#[derive(Debug, Clone, PartialEq)]
pub enum RawInput {
    /// Exclusive pointer capture was granted; input is forwarded from now on.
    CaptureAcquired,
    CaptureReleased,
    /// `code` is the W3C `KeyboardEvent.code` name of the physical key.
    Key {
        code: String,
        pressed: bool,
        repeat: bool,
    },
    MouseMotion {
        dx: i32,
        dy: i32,
    },
    /// `button` uses W3C numbering.
    MouseButton {
        button: u8,
        pressed: bool,
    },
    Wheel {
        dx: f32,
        dy: f32,
    },
}

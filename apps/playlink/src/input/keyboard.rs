use std::collections::HashSet;

use playlink_proto::InputEvent;

use super::keymap::linux_key_code;

/// Turns physical key transitions into key messages, one per press and one
/// per release. Auto-repeat presses are suppressed whether or not the
/// platform flags them.
#[derive(Debug, Default)]
pub struct KeyboardState {
    held: HashSet<String>,
}

impl KeyboardState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_key(&mut self, code: &str, pressed: bool, repeat: bool) -> Option<InputEvent> {
        let key = linux_key_code(code);
        if pressed {
            if repeat || !self.held.insert(code.to_string()) {
                return None;
            }
            Some(InputEvent::KeyDown { key })
        } else {
            self.held.remove(code);
            Some(InputEvent::KeyUp { key })
        }
    }

    pub fn held(&self) -> usize {
        self.held.len()
    }
}

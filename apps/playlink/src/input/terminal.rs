//! Terminal front end for the input pipeline. Focus stands in for pointer
//! capture and pointer positions are turned into relative motion.

use std::io::{self, Write};

use crossterm::event::{
    DisableFocusChange, DisableMouseCapture, EnableFocusChange, EnableMouseCapture, Event,
    EventStream, KeyCode, KeyEvent, KeyEventKind, KeyModifiers, KeyboardEnhancementFlags,
    MediaKeyCode, ModifierKeyCode, MouseButton, MouseEvent, MouseEventKind,
    PopKeyboardEnhancementFlags, PushKeyboardEnhancementFlags,
};
use crossterm::execute;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, supports_keyboard_enhancement};
use futures_util::StreamExt;
use tokio::sync::mpsc;

use super::RawInput;

/// Browser-style pixel delta for one wheel notch.
const WHEEL_STEP: f32 = 100.0;

/// Puts the terminal into raw mode with mouse and focus reporting and restores
/// it on drop.
pub struct TerminalGuard {
    enhanced_keys: bool,
}

impl TerminalGuard {
    pub fn enter() -> io::Result<Self> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnableMouseCapture, EnableFocusChange)?;
        let enhanced_keys = supports_keyboard_enhancement().unwrap_or(false);
        if enhanced_keys {
            execute!(
                stdout,
                PushKeyboardEnhancementFlags(KeyboardEnhancementFlags::REPORT_EVENT_TYPES)
            )?;
        }
        stdout.flush()?;
        Ok(Self { enhanced_keys })
    }

    /// Whether the terminal reports key releases and repeats.
    pub fn reports_key_releases(&self) -> bool {
        self.enhanced_keys
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let mut stdout = io::stdout();
        if self.enhanced_keys {
            let _ = execute!(stdout, PopKeyboardEnhancementFlags);
        }
        let _ = execute!(stdout, DisableFocusChange, DisableMouseCapture);
        let _ = disable_raw_mode();
    }
}

#[derive(Debug, PartialEq)]
pub enum Translated {
    Forward(Vec<RawInput>),
    Quit,
}

/// Stateful mapping from terminal events to [`RawInput`].
#[derive(Debug)]
pub struct TerminalTranslator {
    release_events: bool,
    last_pointer: Option<(u16, u16)>,
}

impl TerminalTranslator {
    /// Without release reporting every press is followed by a synthetic
    /// release.
    pub fn new(release_events: bool) -> Self {
        Self {
            release_events,
            last_pointer: None,
        }
    }

    pub fn translate(&mut self, event: Event) -> Translated {
        match event {
            Event::FocusGained => Translated::Forward(vec![RawInput::CaptureAcquired]),
            Event::FocusLost => {
                self.last_pointer = None;
                Translated::Forward(vec![RawInput::CaptureReleased])
            }
            Event::Key(key) => self.key(key),
            Event::Mouse(mouse) => Translated::Forward(self.mouse(mouse)),
            _ => Translated::Forward(Vec::new()),
        }
    }

    fn key(&self, key: KeyEvent) -> Translated {
        if is_quit(&key) {
            return Translated::Quit;
        }
        let Some(code) = w3c_code(key.code) else {
            return Translated::Forward(Vec::new());
        };
        let code = code.to_string();
        let events = match key.kind {
            KeyEventKind::Press if self.release_events => vec![RawInput::Key {
                code,
                pressed: true,
                repeat: false,
            }],
            KeyEventKind::Press => vec![
                RawInput::Key {
                    code: code.clone(),
                    pressed: true,
                    repeat: false,
                },
                RawInput::Key {
                    code,
                    pressed: false,
                    repeat: false,
                },
            ],
            KeyEventKind::Repeat => vec![RawInput::Key {
                code,
                pressed: true,
                repeat: true,
            }],
            KeyEventKind::Release => vec![RawInput::Key {
                code,
                pressed: false,
                repeat: false,
            }],
        };
        Translated::Forward(events)
    }

    fn mouse(&mut self, mouse: MouseEvent) -> Vec<RawInput> {
        let position = (mouse.column, mouse.row);
        let mut events = Vec::new();
        if let Some((column, row)) = self.last_pointer.replace(position) {
            let dx = i32::from(position.0) - i32::from(column);
            let dy = i32::from(position.1) - i32::from(row);
            if dx != 0 || dy != 0 {
                events.push(RawInput::MouseMotion { dx, dy });
            }
        }
        match mouse.kind {
            MouseEventKind::Down(button) => events.push(RawInput::MouseButton {
                button: w3c_button(button),
                pressed: true,
            }),
            MouseEventKind::Up(button) => events.push(RawInput::MouseButton {
                button: w3c_button(button),
                pressed: false,
            }),
            MouseEventKind::ScrollUp => events.push(RawInput::Wheel {
                dx: 0.0,
                dy: -WHEEL_STEP,
            }),
            MouseEventKind::ScrollDown => events.push(RawInput::Wheel {
                dx: 0.0,
                dy: WHEEL_STEP,
            }),
            MouseEventKind::ScrollLeft => events.push(RawInput::Wheel {
                dx: -WHEEL_STEP,
                dy: 0.0,
            }),
            MouseEventKind::ScrollRight => events.push(RawInput::Wheel {
                dx: WHEEL_STEP,
                dy: 0.0,
            }),
            MouseEventKind::Moved | MouseEventKind::Drag(_) => {}
        }
        events
    }
}

/// Ctrl+] ends the session. Most terminals deliver it as Ctrl+5.
fn is_quit(key: &KeyEvent) -> bool {
    key.kind != KeyEventKind::Release
        && key.modifiers.contains(KeyModifiers::CONTROL)
        && matches!(key.code, KeyCode::Char(']') | KeyCode::Char('5'))
}

fn w3c_button(button: MouseButton) -> u8 {
    match button {
        MouseButton::Left => 0,
        MouseButton::Middle => 1,
        MouseButton::Right => 2,
    }
}

fn w3c_code(code: KeyCode) -> Option<&'static str> {
    let name = match code {
        KeyCode::Char(c) => return char_code(c),
        KeyCode::F(n) => return function_key(n),
        KeyCode::Backspace => "Backspace",
        KeyCode::Enter => "Enter",
        KeyCode::Left => "ArrowLeft",
        KeyCode::Right => "ArrowRight",
        KeyCode::Up => "ArrowUp",
        KeyCode::Down => "ArrowDown",
        KeyCode::Home => "Home",
        KeyCode::End => "End",
        KeyCode::PageUp => "PageUp",
        KeyCode::PageDown => "PageDown",
        KeyCode::Tab | KeyCode::BackTab => "Tab",
        KeyCode::Delete => "Delete",
        KeyCode::Insert => "Insert",
        KeyCode::Esc => "Escape",
        KeyCode::CapsLock => "CapsLock",
        KeyCode::ScrollLock => "ScrollLock",
        KeyCode::NumLock => "NumLock",
        KeyCode::PrintScreen => "PrintScreen",
        KeyCode::Pause => "Pause",
        KeyCode::Menu => "ContextMenu",
        KeyCode::Media(media) => match media {
            MediaKeyCode::PlayPause | MediaKeyCode::Play | MediaKeyCode::Pause => {
                "MediaPlayPause"
            }
            MediaKeyCode::Stop => "MediaStop",
            MediaKeyCode::TrackNext => "MediaTrackNext",
            MediaKeyCode::TrackPrevious => "MediaTrackPrevious",
            MediaKeyCode::LowerVolume => "AudioVolumeDown",
            MediaKeyCode::RaiseVolume => "AudioVolumeUp",
            MediaKeyCode::MuteVolume => "AudioVolumeMute",
            _ => return None,
        },
        KeyCode::Modifier(modifier) => match modifier {
            ModifierKeyCode::LeftShift => "ShiftLeft",
            ModifierKeyCode::RightShift => "ShiftRight",
            ModifierKeyCode::LeftControl => "ControlLeft",
            ModifierKeyCode::RightControl => "ControlRight",
            ModifierKeyCode::LeftAlt => "AltLeft",
            ModifierKeyCode::RightAlt => "AltRight",
            ModifierKeyCode::LeftSuper | ModifierKeyCode::LeftMeta => "MetaLeft",
            ModifierKeyCode::RightSuper | ModifierKeyCode::RightMeta => "MetaRight",
            _ => return None,
        },
        _ => return None,
    };
    Some(name)
}

fn function_key(n: u8) -> Option<&'static str> {
    const NAMES: [&str; 24] = [
        "F1", "F2", "F3", "F4", "F5", "F6", "F7", "F8", "F9", "F10", "F11", "F12", "F13", "F14",
        "F15", "F16", "F17", "F18", "F19", "F20", "F21", "F22", "F23", "F24",
    ];
    NAMES.get(usize::from(n).checked_sub(1)?).copied()
}

fn char_code(c: char) -> Option<&'static str> {
    const LETTERS: [&str; 26] = [
        "KeyA", "KeyB", "KeyC", "KeyD", "KeyE", "KeyF", "KeyG", "KeyH", "KeyI", "KeyJ", "KeyK",
        "KeyL", "KeyM", "KeyN", "KeyO", "KeyP", "KeyQ", "KeyR", "KeyS", "KeyT", "KeyU", "KeyV",
        "KeyW", "KeyX", "KeyY", "KeyZ",
    ];
    const DIGITS: [&str; 10] = [
        "Digit0", "Digit1", "Digit2", "Digit3", "Digit4", "Digit5", "Digit6", "Digit7", "Digit8",
        "Digit9",
    ];
    if c.is_ascii_alphabetic() {
        let index = (c.to_ascii_lowercase() as u8 - b'a') as usize;
        return Some(LETTERS[index]);
    }
    if let Some(digit) = c.to_digit(10) {
        return DIGITS.get(digit as usize).copied();
    }
    let name = match c {
        ' ' => "Space",
        '-' | '_' => "Minus",
        '=' | '+' => "Equal",
        '[' | '{' => "BracketLeft",
        ']' | '}' => "BracketRight",
        '\\' | '|' => "Backslash",
        ';' | ':' => "Semicolon",
        '\'' | '"' => "Quote",
        ',' | '<' => "Comma",
        '.' | '>' => "Period",
        '/' | '?' => "Slash",
        '`' | '~' => "Backquote",
        '!' => "Digit1",
        '@' => "Digit2",
        '#' => "Digit3",
        '$' => "Digit4",
        '%' => "Digit5",
        '^' => "Digit6",
        '&' => "Digit7",
        '*' => "Digit8",
        '(' => "Digit9",
        ')' => "Digit0",
        _ => return None,
    };
    Some(name)
}

/// Read terminal events and forward them until the user quits or the
/// receiver goes away. Capture starts held since focus reporting is not
/// universally supported.
pub async fn forward_terminal_input(tx: mpsc::Sender<RawInput>) -> io::Result<()> {
    let guard = TerminalGuard::enter()?;
    let mut translator = TerminalTranslator::new(guard.reports_key_releases());
    let mut events = EventStream::new();

    if tx.send(RawInput::CaptureAcquired).await.is_err() {
        return Ok(());
    }
    while let Some(event) = events.next().await {
        match translator.translate(event?) {
            Translated::Quit => {
                tracing::info!(target: "playlink::input", "quit requested from terminal");
                break;
            }
            Translated::Forward(raw) => {
                for input in raw {
                    if tx.send(input).await.is_err() {
                        return Ok(());
                    }
                }
            }
        }
    }
    let _ = tx.send(RawInput::CaptureReleased).await;
    drop(guard);
    Ok(())
}

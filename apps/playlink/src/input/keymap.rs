//! Physical key and pointer button codes mapped to Linux input-event codes
//! (`linux/input-event-codes.h`). Keys are identified by their W3C
//! `KeyboardEvent.code` name, which is layout independent.

/// Sent for any key or button without a mapping.
pub const KEY_UNKNOWN: u16 = 240;

/// `Home` is reserved by the host as its escape key.
pub const KEY_HOME_ESCAPE: u16 = 1;

pub const BTN_LEFT: u16 = 0x110;
pub const BTN_RIGHT: u16 = 0x111;
pub const BTN_MIDDLE: u16 = 0x112;
pub const BTN_SIDE: u16 = 0x113;
pub const BTN_EXTRA: u16 = 0x114;

/// Linux code for a physical key, or [`KEY_UNKNOWN`].
pub fn linux_key_code(code: &str) -> u16 {
    lookup(code).unwrap_or(KEY_UNKNOWN)
}

/// Linux code for a pointer button in W3C numbering (0 primary, 1 auxiliary,
/// 2 secondary, 3 back, 4 forward).
pub fn mouse_button_code(button: u8) -> u16 {
    match button {
        0 => BTN_LEFT,
        1 => BTN_MIDDLE,
        2 => BTN_RIGHT,
        3 => BTN_SIDE,
        4 => BTN_EXTRA,
        _ => KEY_UNKNOWN,
    }
}

fn lookup(code: &str) -> Option<u16> {
    if let Some(letter) = code.strip_prefix("Key") {
        return letter_code(letter);
    }
    if let Some(digit) = code.strip_prefix("Digit") {
        return digit_code(digit);
    }
    if let Some(rest) = code.strip_prefix("Numpad") {
        return numpad_code(rest);
    }
    if let Some(n) = code.strip_prefix('F').and_then(|n| n.parse::<u8>().ok()) {
        return function_code(n);
    }
    let mapped = match code {
        "Home" => KEY_HOME_ESCAPE,
        "Escape" => 1,
        "Minus" => 12,
        "Equal" => 13,
        "Backspace" => 14,
        "Tab" => 15,
        "BracketLeft" => 26,
        "BracketRight" => 27,
        "Enter" => 28,
        "ControlLeft" => 29,
        "Semicolon" => 39,
        "Quote" => 40,
        "Backquote" => 41,
        "ShiftLeft" => 42,
        "Backslash" => 43,
        "Comma" => 51,
        "Period" => 52,
        "Slash" => 53,
        "ShiftRight" => 54,
        "AltLeft" => 56,
        "Space" => 57,
        "CapsLock" => 58,
        "NumLock" => 69,
        "ScrollLock" => 70,
        "IntlBackslash" => 86,
        "IntlRo" => 89,
        "ControlRight" => 97,
        "PrintScreen" => 99,
        "AltRight" => 100,
        "ArrowUp" => 103,
        "PageUp" => 104,
        "ArrowLeft" => 105,
        "ArrowRight" => 106,
        "End" => 107,
        "ArrowDown" => 108,
        "PageDown" => 109,
        "Insert" => 110,
        "Delete" => 111,
        "AudioVolumeMute" => 113,
        "AudioVolumeDown" => 114,
        "AudioVolumeUp" => 115,
        "Power" => 116,
        "Pause" => 119,
        "IntlYen" => 124,
        "MetaLeft" => 125,
        "MetaRight" => 126,
        "ContextMenu" => 127,
        "BrowserStop" => 128,
        "Help" => 138,
        "LaunchApp1" => 144,
        "LaunchApp2" => 140,
        "LaunchMail" => 155,
        "BrowserBack" => 158,
        "BrowserForward" => 159,
        "MediaTrackNext" => 163,
        "MediaPlayPause" => 164,
        "MediaTrackPrevious" => 165,
        "MediaStop" => 166,
        "BrowserHome" => 172,
        "BrowserRefresh" => 173,
        "BrowserSearch" => 217,
        "BrowserFavorites" => 156,
        "MediaSelect" => 226,
        _ => return None,
    };
    Some(mapped)
}

fn letter_code(letter: &str) -> Option<u16> {
    let code = match letter {
        "Q" => 16,
        "W" => 17,
        "E" => 18,
        "R" => 19,
        "T" => 20,
        "Y" => 21,
        "U" => 22,
        "I" => 23,
        "O" => 24,
        "P" => 25,
        "A" => 30,
        "S" => 31,
        "D" => 32,
        "F" => 33,
        "G" => 34,
        "H" => 35,
        "J" => 36,
        "K" => 37,
        "L" => 38,
        "Z" => 44,
        "X" => 45,
        "C" => 46,
        "V" => 47,
        "B" => 48,
        "N" => 49,
        "M" => 50,
        _ => return None,
    };
    Some(code)
}

fn digit_code(digit: &str) -> Option<u16> {
    match digit {
        "0" => Some(11),
        d if d.len() == 1 => d.parse::<u16>().ok().filter(|n| *n >= 1).map(|n| n + 1),
        _ => None,
    }
}

fn numpad_code(rest: &str) -> Option<u16> {
    let code = match rest {
        "7" => 71,
        "8" => 72,
        "9" => 73,
        "Subtract" => 74,
        "4" => 75,
        "5" => 76,
        "6" => 77,
        "Add" => 78,
        "1" => 79,
        "2" => 80,
        "3" => 81,
        "0" => 82,
        "Decimal" => 83,
        "Enter" => 96,
        "Divide" => 98,
        "Equal" => 117,
        "Comma" => 121,
        "Multiply" => 55,
        _ => return None,
    };
    Some(code)
}

fn function_code(n: u8) -> Option<u16> {
    match n {
        1..=10 => Some(58 + n as u16),
        11 => Some(87),
        12 => Some(88),
        13..=24 => Some(183 + (n as u16 - 13)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_timeout::timeout]
    fn home_is_the_escape_code() {
        assert_eq!(linux_key_code("Home"), 1);
        assert_eq!(linux_key_code("Home"), linux_key_code("Escape"));
    }

    #[test_timeout::timeout]
    fn unmapped_codes_use_the_sentinel() {
        for code in ["", "Fn", "Lang1", "KeyAB", "Digit10", "F25", "Numpad"] {
            assert_eq!(linux_key_code(code), KEY_UNKNOWN, "{code}");
        }
        assert_eq!(mouse_button_code(9), KEY_UNKNOWN);
    }

    #[test_timeout::timeout]
    fn standard_rows_match_linux_codes() {
        assert_eq!(linux_key_code("KeyA"), 30);
        assert_eq!(linux_key_code("KeyW"), 17);
        assert_eq!(linux_key_code("Digit1"), 2);
        assert_eq!(linux_key_code("Digit9"), 10);
        assert_eq!(linux_key_code("Digit0"), 11);
        assert_eq!(linux_key_code("F1"), 59);
        assert_eq!(linux_key_code("F10"), 68);
        assert_eq!(linux_key_code("F12"), 88);
        assert_eq!(linux_key_code("F13"), 183);
        assert_eq!(linux_key_code("F24"), 194);
        assert_eq!(linux_key_code("Numpad5"), 76);
        assert_eq!(linux_key_code("ArrowLeft"), 105);
        assert_eq!(linux_key_code("MediaPlayPause"), 164);
    }

    #[test_timeout::timeout]
    fn pointer_buttons() {
        assert_eq!(mouse_button_code(0), BTN_LEFT);
        assert_eq!(mouse_button_code(1), BTN_MIDDLE);
        assert_eq!(mouse_button_code(2), BTN_RIGHT);
        assert_eq!(mouse_button_code(3), BTN_SIDE);
        assert_eq!(mouse_button_code(4), BTN_EXTRA);
    }
}

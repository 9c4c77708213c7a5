//! Native key-code constants used by the emission layer.
//!
//! The codes follow the Linux evdev numbering, which the in-tree key table
//! passes through unchanged. A Windows host substitutes its own table behind
//! [`to_key`](crate::to_key) / [`to_keycode`](crate::to_keycode) without
//! touching the engines.

use crate::Modifiers;

pub const KEY_LEFTSHIFT: u16 = 42;
pub const KEY_RIGHTSHIFT: u16 = 54;
pub const KEY_LEFTCTRL: u16 = 29;
pub const KEY_RIGHTCTRL: u16 = 97;
pub const KEY_LEFTALT: u16 = 56;
pub const KEY_RIGHTALT: u16 = 100;
pub const KEY_LEFTMETA: u16 = 125;
pub const KEY_RIGHTMETA: u16 = 126;

pub const KEY_SCROLLLOCK: u16 = 70;

/// Modifier flag to native key code, in a fixed order so emission is
/// deterministic.
pub const MODIFIER_KEYCODES: [(Modifiers, u16); 8] = [
    (Modifiers::SHIFT_LEFT, KEY_LEFTSHIFT),
    (Modifiers::SHIFT_RIGHT, KEY_RIGHTSHIFT),
    (Modifiers::CONTROL_LEFT, KEY_LEFTCTRL),
    (Modifiers::CONTROL_RIGHT, KEY_RIGHTCTRL),
    (Modifiers::ALT_LEFT, KEY_LEFTALT),
    (Modifiers::ALT_RIGHT, KEY_RIGHTALT),
    (Modifiers::OS_LEFT, KEY_LEFTMETA),
    (Modifiers::OS_RIGHT, KEY_RIGHTMETA),
];

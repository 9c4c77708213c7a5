//! core-keys: key identifiers, fixed-capacity keysets, and sided modifiers.
//!
//! A `Key` is an opaque small integer in `[0, KEY_COUNT)`. Value 0 is the
//! "unknown" key and is ignored by every set operation; platform hooks are
//! expected to translate native scancodes through [`to_key`] before events
//! enter the pipeline. Everything downstream treats keys as abstract symbols.

use std::fmt;

pub mod keycode;
mod keyset;

pub use keyset::Keyset;

/// Number of representable keys, including the unknown key at index 0.
pub const KEY_COUNT: usize = 256;

/// Opaque identifier for a physical key.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key(u8);

impl Key {
    /// The ignored sentinel. Never a member of any [`Keyset`].
    pub const UNKNOWN: Key = Key(0);

    pub const fn index(self) -> usize {
        self.0 as usize
    }

    pub const fn is_unknown(self) -> bool {
        self.0 == 0
    }
}

/// Translate a native key code to a [`Key`]. Out-of-range codes collapse to
/// [`Key::UNKNOWN`].
pub const fn to_key(code: u16) -> Key {
    if code >= KEY_COUNT as u16 {
        return Key::UNKNOWN;
    }
    Key(code as u8)
}

/// Translate a [`Key`] back to its native key code.
pub const fn to_keycode(key: Key) -> u16 {
    key.0 as u16
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

bitflags::bitflags! {
    /// Sided modifier flags attached to emitted actions. These are an
    /// attribute of output, not of [`Key`]: a chorded layout may emit
    /// shifted characters from unshifted physical keys.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct Modifiers: u16 {
        const SHIFT_LEFT    = 1 << 0;
        const SHIFT_RIGHT   = 1 << 1;
        const CONTROL_LEFT  = 1 << 2;
        const CONTROL_RIGHT = 1 << 3;
        const ALT_LEFT      = 1 << 4;
        const ALT_RIGHT     = 1 << 5;
        const OS_LEFT       = 1 << 6;
        const OS_RIGHT      = 1 << 7;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn unknown_key_is_zero() {
        assert_eq!(Key::UNKNOWN, to_key(0));
        assert!(to_key(0).is_unknown());
        assert!(!to_key(1).is_unknown());
    }

    #[test]
    fn out_of_range_codes_collapse_to_unknown() {
        assert_eq!(to_key(KEY_COUNT as u16), Key::UNKNOWN);
        assert_eq!(to_key(u16::MAX), Key::UNKNOWN);
    }

    #[test]
    fn keycode_round_trip_for_every_known_key() {
        for code in 1..KEY_COUNT as u16 {
            let key = to_key(code);
            assert!(!key.is_unknown());
            assert_eq!(to_key(to_keycode(key)), key);
        }
    }

    #[test]
    fn modifiers_are_disjoint_flags() {
        let mods = Modifiers::SHIFT_LEFT | Modifiers::CONTROL_RIGHT;
        assert!(mods.contains(Modifiers::SHIFT_LEFT));
        assert!(!mods.contains(Modifiers::SHIFT_RIGHT));
        assert_eq!(mods - Modifiers::SHIFT_LEFT, Modifiers::CONTROL_RIGHT);
    }
}

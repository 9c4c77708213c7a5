//! Commands: ordered action sequences executed through a [`KeySink`].
//!
//! The transition forms (`press`/`repeat` with a previous command) let
//! adjacent commands elide redundant up/down events on modifiers they share,
//! so holding a chord while rolling between mapped keysets does not flap
//! Shift/Control on the output side.

use core_keys::keycode::MODIFIER_KEYCODES;
use core_keys::{Key, Modifiers, to_keycode};
use smallvec::SmallVec;

/// Emission interface implemented by the platform layer (uinput, SendInput,
/// or a test recorder). Codes are native key codes from the platform table.
pub trait KeySink {
    fn key_press(&mut self, code: u16);
    fn key_repeat(&mut self, code: u16);
    fn key_release(&mut self, code: u16);
    fn char_press(&mut self, ch: char);
    fn char_release(&mut self, ch: char);
}

/// Press or repeat of one key with a set of held modifiers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KeyAction {
    key: Key,
    modifiers: Modifiers,
}

impl KeyAction {
    pub fn new(key: Key, modifiers: Modifiers) -> Self {
        Self { key, modifiers }
    }

    pub fn key(&self) -> Key {
        self.key
    }

    pub fn modifiers(&self) -> Modifiers {
        self.modifiers
    }

    fn code(&self) -> u16 {
        to_keycode(self.key)
    }

    fn press(&self, sink: &mut dyn KeySink) {
        self.press_modifiers(sink);
        if self.code() != 0 {
            sink.key_press(self.code());
        }
    }

    fn press_after(&self, prev: &KeyAction, sink: &mut dyn KeySink) {
        // Not repeating, so the previous key always goes up first.
        if prev.code() != 0 {
            sink.key_release(prev.code());
        }
        self.update_modifiers(prev, sink);
        if self.code() != 0 {
            sink.key_press(self.code());
        }
    }

    fn repeat(&self, sink: &mut dyn KeySink) {
        self.press_modifiers(sink);
        if self.code() != 0 {
            sink.key_repeat(self.code());
        }
    }

    fn repeat_after(&self, prev: &KeyAction, sink: &mut dyn KeySink) {
        // Repeating: only a key change forces a release of the previous one.
        if prev.code() != 0 && self.code() != prev.code() {
            sink.key_release(prev.code());
        }
        self.update_modifiers(prev, sink);
        if self.code() != 0 {
            if self.code() != prev.code() {
                sink.key_press(self.code());
            } else {
                sink.key_repeat(self.code());
            }
        }
    }

    fn release(&self, sink: &mut dyn KeySink) {
        self.release_modifiers(sink);
        if self.code() != 0 {
            sink.key_release(self.code());
        }
    }

    /// Emit only the modifier deltas between `prev` and `self`.
    fn update_modifiers(&self, prev: &KeyAction, sink: &mut dyn KeySink) {
        let keyup = prev.modifiers - self.modifiers;
        let keydown = self.modifiers - prev.modifiers;
        for (flag, code) in MODIFIER_KEYCODES {
            if keyup.contains(flag) {
                sink.key_release(code);
            } else if keydown.contains(flag) {
                sink.key_press(code);
            }
        }
    }

    fn press_modifiers(&self, sink: &mut dyn KeySink) {
        for (flag, code) in MODIFIER_KEYCODES {
            if self.modifiers.contains(flag) {
                sink.key_press(code);
            }
        }
    }

    fn release_modifiers(&self, sink: &mut dyn KeySink) {
        for (flag, code) in MODIFIER_KEYCODES {
            if self.modifiers.contains(flag) {
                sink.key_release(code);
            }
        }
    }
}

/// One emitted step of a command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    Key(KeyAction),
    Char(char),
}

impl Action {
    fn press(&self, sink: &mut dyn KeySink) {
        match self {
            Action::Key(key) => key.press(sink),
            Action::Char(ch) => sink.char_press(*ch),
        }
    }

    fn press_after(&self, prev: &Action, sink: &mut dyn KeySink) {
        match (self, prev) {
            (Action::Key(key), Action::Key(prev_key)) => key.press_after(prev_key, sink),
            (Action::Char(ch), Action::Char(prev_ch)) => {
                sink.char_release(*prev_ch);
                sink.char_press(*ch);
            }
            _ => {
                prev.release(sink);
                self.press(sink);
            }
        }
    }

    fn repeat(&self, sink: &mut dyn KeySink) {
        match self {
            Action::Key(key) => key.repeat(sink),
            Action::Char(ch) => sink.char_press(*ch),
        }
    }

    fn repeat_after(&self, prev: &Action, sink: &mut dyn KeySink) {
        match (self, prev) {
            (Action::Key(key), Action::Key(prev_key)) => key.repeat_after(prev_key, sink),
            (Action::Char(ch), Action::Char(_)) => sink.char_press(*ch),
            _ => {
                prev.release(sink);
                self.repeat(sink);
            }
        }
    }

    fn release(&self, sink: &mut dyn KeySink) {
        match self {
            Action::Key(key) => key.release(sink),
            Action::Char(ch) => sink.char_release(*ch),
        }
    }
}

/// Ordered sequence of actions bound to a mapped keyset.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Command {
    actions: SmallVec<[Action; 4]>,
}

impl Command {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, action: Action) {
        self.actions.push(action);
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Execute a press, transitioning away from `prev` when given. An empty
    /// command only releases the previous one.
    pub fn press(&self, prev: Option<&Command>, sink: &mut dyn KeySink) {
        let Some(first) = self.actions.first() else {
            if let Some(prev) = prev {
                prev.release(sink);
            }
            return;
        };
        match prev.and_then(|p| p.actions.last()) {
            Some(prev_last) => first.press_after(prev_last, sink),
            None => first.press(sink),
        }
        for pair in self.actions.windows(2) {
            if let [a, b] = pair {
                b.press_after(a, sink);
            }
        }
    }

    /// Execute a system key repeat; only the first action repeats, the rest
    /// replay as presses.
    pub fn repeat(&self, prev: Option<&Command>, sink: &mut dyn KeySink) {
        let Some(first) = self.actions.first() else {
            if let Some(prev) = prev {
                prev.release(sink);
            }
            return;
        };
        match prev.and_then(|p| p.actions.last()) {
            Some(prev_last) => first.repeat_after(prev_last, sink),
            None => first.repeat(sink),
        }
        for pair in self.actions.windows(2) {
            if let [a, b] = pair {
                b.press_after(a, sink);
            }
        }
    }

    /// Release whatever the last action left held.
    pub fn release(&self, sink: &mut dyn KeySink) {
        if let Some(last) = self.actions.last() {
            last.release(sink);
        }
    }
}

impl FromIterator<Action> for Command {
    fn from_iter<I: IntoIterator<Item = Action>>(iter: I) -> Self {
        Self {
            actions: iter.into_iter().collect(),
        }
    }
}

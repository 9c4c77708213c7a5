use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use core_events::InputEvent;
use core_keys::{Key, Keyset};
use core_layout::{KeyProperty, KeyboardConfig, KeyboardLayout, KeysetProperty};

/// Mutable engine state: current config and layout, the pending event
/// buffer, and the four keysets tracking what the engine considers pressed.
///
/// Keyset roles:
/// * `active_keyset`: keys logically pressed as the current chord.
/// * `trigger_keyset`: subset of active whose release ends the chord.
/// * `modifier_keyset`: subset of active that merely qualifies.
/// * `dontcare_keyset`: physically held keys whose release is swallowed.
#[derive(Default)]
pub struct State {
    config: Option<Arc<KeyboardConfig>>,
    layout: Option<Arc<KeyboardLayout>>,
    events: VecDeque<InputEvent>,
    active_keyset: Keyset,
    trigger_keyset: Keyset,
    modifier_keyset: Keyset,
    dontcare_keyset: Keyset,
}

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    /// Interpret a key with no mapping: the chord ends, the key's eventual
    /// release is swallowed. The modifier keyset survives, since those keys
    /// are still physically held.
    pub fn press_none_key(&mut self, key: Key) {
        self.active_keyset.clear();
        self.trigger_keyset.clear();
        self.dontcare_keyset += key;
    }

    pub fn try_release_trigger_key(&mut self, key: Key) -> bool {
        if !self.trigger_keyset.contains(key) {
            return false;
        }
        self.active_keyset.clear();
        self.trigger_keyset.clear();
        self.dontcare_keyset -= key;
        true
    }

    pub fn try_release_modifier_key(&mut self, key: Key) -> bool {
        if !self.modifier_keyset.contains(key) {
            return false;
        }
        self.active_keyset -= key;
        self.modifier_keyset -= key;
        self.dontcare_keyset -= key;
        true
    }

    pub fn try_release_dontcare_key(&mut self, key: Key) -> bool {
        if !self.dontcare_keyset.contains(key) {
            return false;
        }
        self.dontcare_keyset -= key;
        true
    }

    /// Commit a chord, replacing the dontcare set wholesale.
    pub fn apply(
        &mut self,
        active_keyset: Keyset,
        trigger_keyset: Keyset,
        modifier_keyset: Keyset,
        dontcare_keyset: Keyset,
    ) {
        debug_assert!(active_keyset.contains_all(&trigger_keyset));
        debug_assert!((trigger_keyset - modifier_keyset) == trigger_keyset);
        self.active_keyset = active_keyset;
        self.trigger_keyset = trigger_keyset;
        self.modifier_keyset = modifier_keyset;
        self.dontcare_keyset = dontcare_keyset;
    }

    /// Commit a chord, adding one key to the existing dontcare set.
    pub fn apply_key(
        &mut self,
        active_keyset: Keyset,
        trigger_keyset: Keyset,
        modifier_keyset: Keyset,
        dontcare_key: Key,
    ) {
        debug_assert!(active_keyset.contains_all(&trigger_keyset));
        debug_assert!((trigger_keyset - modifier_keyset) == trigger_keyset);
        self.active_keyset = active_keyset;
        self.trigger_keyset = trigger_keyset;
        self.modifier_keyset = modifier_keyset;
        self.dontcare_keyset += dontcare_key;
    }

    /// Install a new config (or none) and return to the quiescent state.
    /// Pending events are kept; they are reinterpreted under the new config.
    pub fn reset(&mut self, config: Option<Arc<KeyboardConfig>>) {
        self.layout = config.as_ref().and_then(|c| c.default_layout().cloned());
        self.config = config;
        self.active_keyset.clear();
        self.trigger_keyset.clear();
        self.modifier_keyset.clear();
        self.dontcare_keyset.clear();
    }

    pub fn find_key_property(&self, key: Key) -> Option<&KeyProperty> {
        self.layout.as_ref()?.find_key_property(key)
    }

    pub fn find_keyset_property(&self, keyset: &Keyset) -> Option<&KeysetProperty> {
        self.layout.as_ref()?.find_keyset_property(keyset)
    }

    pub fn set_layout(&mut self, layout: Option<Arc<KeyboardLayout>>) {
        self.layout = layout;
    }

    /// Follow the committed chord's transition, if the current layout has
    /// one and the target is still alive.
    pub fn set_next_layout(&mut self) {
        let next = self
            .layout
            .as_ref()
            .and_then(|layout| layout.find_next_layout(&self.active_keyset));
        if let Some(next) = next {
            self.layout = Some(next);
        }
    }

    pub fn push_event(&mut self, event: InputEvent) {
        self.events.push_back(event);
    }

    pub fn pop_event(&mut self) {
        self.events.pop_front();
    }

    /// Drop the first `last` pending events: the prefix a committed mapping
    /// consumed. The remainder is left for the next interpretation.
    pub fn consume_events(&mut self, last: usize) {
        self.events.drain(..last);
    }

    /// Timing window for the timing-sensitive flows. Zero when no config is
    /// installed or none was configured.
    pub fn timeout_dur(&self) -> Duration {
        self.config
            .as_ref()
            .map(|c| c.timeout_dur())
            .unwrap_or(Duration::ZERO)
    }

    pub fn config(&self) -> Option<&Arc<KeyboardConfig>> {
        self.config.as_ref()
    }

    pub fn layout(&self) -> Option<&Arc<KeyboardLayout>> {
        self.layout.as_ref()
    }

    pub fn events(&self) -> &VecDeque<InputEvent> {
        &self.events
    }

    pub fn active_keyset(&self) -> Keyset {
        self.active_keyset
    }

    pub fn trigger_keyset(&self) -> Keyset {
        self.trigger_keyset
    }

    pub fn modifier_keyset(&self) -> Keyset {
        self.modifier_keyset
    }

    pub fn dontcare_keyset(&self) -> Keyset {
        self.dontcare_keyset
    }
}

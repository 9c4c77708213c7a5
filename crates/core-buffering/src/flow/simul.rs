use std::time::Instant;

use core_events::InputEvent;
use core_keys::{Key, Keyset};
use core_layout::FlowType;
use tracing::trace;

use crate::flow::FlowResult;
use crate::state::State;

/// Flow that judges overlapping presses of two (or three) keys as a
/// simultaneous chord, falling back to a single-key reading otherwise.
///
/// The decision window is half the configured timeout: the second key must
/// land inside it, and with a third key in play the gap to the second must
/// not exceed the gap from the second to the third. Modifier releases seen
/// during the lookahead split into pre-releases (early enough to drop the
/// modifier from the chord) and post-releases (applied after the commit).
pub struct SimulKeyFlow {
    timeout_tp: Option<Instant>,
    press_timeout_tp: Option<Instant>,
    release_timeout_tp: Option<Instant>,
    observed_event_last: usize,
    modifier_keyset: Keyset,
    dontcare_keyset: Keyset,
    pre_released_keyset: Keyset,
    post_released_keyset: Keyset,

    first_key: Key,
    first_begin_tp: Instant,

    second_key: Key,
    second_begin_tp: Option<Instant>,
    second_consumed_event_last: usize,
    second_dontcare_keyset: Keyset,
    second_post_released_keyset: Keyset,

    third_key: Key,
    third_begin_tp: Option<Instant>,
}

impl SimulKeyFlow {
    pub fn reset(state: &mut State) -> Option<Self> {
        let Some(&InputEvent::KeyPress { time, key }) = state.events().front() else {
            return None;
        };

        trace!(target: "buffering.flow", "begin SIMUL flow");
        let dur = state.timeout_dur();
        let flow = Self {
            timeout_tp: time.checked_add(dur),
            press_timeout_tp: time.checked_add(dur / 2),
            release_timeout_tp: time.checked_add(dur / 2),
            // The front press is popped below, so lookahead starts at 0.
            observed_event_last: 0,
            modifier_keyset: state.modifier_keyset(),
            dontcare_keyset: state.dontcare_keyset() + key,
            pre_released_keyset: Keyset::new(),
            post_released_keyset: Keyset::new(),
            first_key: key,
            first_begin_tp: time,
            second_key: Key::UNKNOWN,
            second_begin_tp: None,
            second_consumed_event_last: 0,
            second_dontcare_keyset: Keyset::new(),
            second_post_released_keyset: Keyset::new(),
            third_key: Key::UNKNOWN,
            third_begin_tp: None,
        };
        state.pop_event();
        Some(flow)
    }

    pub fn update(&mut self, state: &mut State) -> FlowResult {
        if self.observed_event_last >= state.events().len() {
            let now = Instant::now();
            if self.timed_out(now) {
                trace!(target: "buffering.flow", "timed out");
                self.commit(state);
                return FlowResult::Done;
            }
            return FlowResult::Continue;
        }

        let event = state.events()[self.observed_event_last].clone();
        self.observed_event_last += 1;
        match event {
            InputEvent::KeyPress { time, key } => self.update_press(time, key, state),
            InputEvent::KeyRelease { time, key } => self.update_release(time, key, state),
            _ => {
                trace!(target: "buffering.flow", "non-key event");
                self.commit(state);
                FlowResult::Done
            }
        }
    }

    fn update_press(&mut self, time: Instant, key: Key, state: &mut State) -> FlowResult {
        if self.timed_out(time) {
            trace!(target: "buffering.flow", %key, "timed out");
            self.commit(state);
            return FlowResult::Done;
        }

        let flow_type = state.find_key_property(key).map(|p| p.flow_type());
        if flow_type != Some(FlowType::Simul) {
            trace!(target: "buffering.flow", %key, "interrupt");
            self.commit(state);
            return FlowResult::Done;
        }

        if key == self.first_key {
            // System repeat of the first key counts as letting it settle.
            trace!(target: "buffering.flow", %key, "repeat");
            self.commit(state);
            return FlowResult::Done;
        }

        if !self.dontcare_keyset.contains(key) {
            if !self.third_key.is_unknown() {
                trace!(target: "buffering.flow", %key, "more keys");
            } else if !self.second_key.is_unknown() {
                trace!(target: "buffering.flow", %key, "register third key");
                self.dontcare_keyset += key;
                self.post_released_keyset -= key;
                self.third_key = key;
                self.third_begin_tp = Some(time);
            } else {
                trace!(target: "buffering.flow", %key, "register second key");
                self.dontcare_keyset += key;
                self.post_released_keyset -= key;
                self.second_key = key;
                self.second_begin_tp = Some(time);
                self.second_consumed_event_last = self.observed_event_last;
                self.second_dontcare_keyset = self.dontcare_keyset;
                self.second_post_released_keyset = self.post_released_keyset;
            }
        }
        FlowResult::Continue
    }

    fn update_release(&mut self, time: Instant, key: Key, state: &mut State) -> FlowResult {
        if self.timed_out(time) {
            trace!(target: "buffering.flow", %key, "timed out");
            self.commit(state);
            return FlowResult::Done;
        }

        let flow_type = state.find_key_property(key).map(|p| p.flow_type());
        if flow_type != Some(FlowType::Simul) {
            trace!(target: "buffering.flow", %key, "interrupt");
            self.commit(state);
            return FlowResult::Done;
        }

        if key == self.first_key {
            trace!(target: "buffering.flow", %key, "release first key");
            self.commit(state);
            return FlowResult::Done;
        }

        if self.modifier_keyset.contains(key) {
            if self.before_release_timeout(time) {
                // Early enough to drop the modifier from the chord itself.
                trace!(target: "buffering.flow", %key, "pre-release");
                self.pre_released_keyset += key;
            } else {
                trace!(target: "buffering.flow", %key, "post-release");
                self.post_released_keyset += key;
            }
            self.modifier_keyset -= key;
            self.dontcare_keyset -= key;
        } else if self.dontcare_keyset.contains(key) {
            trace!(target: "buffering.flow", %key, "release dontcare");
            self.dontcare_keyset -= key;
        }
        FlowResult::Continue
    }

    /// Decide simultaneous vs. single-key and apply the winning reading.
    fn commit(&self, state: &mut State) {
        let looks_simul = match (self.second_begin_tp, self.third_begin_tp) {
            (Some(second), Some(third)) => {
                second.duration_since(self.first_begin_tp) <= third.duration_since(second)
                    && self.before_press_timeout(second)
            }
            (Some(second), None) => self.before_press_timeout(second),
            _ => false,
        };

        if looks_simul {
            let fixed_modifiers = state.modifier_keyset() - self.pre_released_keyset;
            let active_keyset = fixed_modifiers + self.first_key + self.second_key;
            let property = state.find_keyset_property(&active_keyset).cloned();
            if let Some(property) = property
                && property.is_mapped()
            {
                trace!(target: "buffering.flow", keyset = ?active_keyset, "mapped");
                state.apply(
                    active_keyset,
                    *property.trigger_keyset(),
                    *property.modifier_keyset() - self.second_post_released_keyset,
                    self.second_dontcare_keyset,
                );
                state.consume_events(self.second_consumed_event_last);
                return;
            }
            // Simultaneous but unmapped: fall through to the single-key
            // reading; the second press stays buffered.
        }

        let active_keyset = state.modifier_keyset() - self.pre_released_keyset + self.first_key;
        let property = state.find_keyset_property(&active_keyset).cloned();
        match property {
            Some(property) if property.is_mapped() => {
                trace!(target: "buffering.flow", keyset = ?active_keyset, "mapped");
                state.apply_key(
                    active_keyset,
                    *property.trigger_keyset(),
                    *property.modifier_keyset(),
                    self.first_key,
                );
            }
            _ => {
                trace!(target: "buffering.flow", keyset = ?active_keyset, "unregistered or unmapped");
                state.press_none_key(self.first_key);
            }
        }
    }

    pub fn is_idle(&self, state: &State) -> bool {
        self.observed_event_last == state.events().len()
    }

    pub fn timeout_tp(&self) -> Option<Instant> {
        self.timeout_tp
    }

    fn timed_out(&self, time: Instant) -> bool {
        self.timeout_tp.is_some_and(|tp| tp <= time)
    }

    fn before_press_timeout(&self, time: Instant) -> bool {
        self.press_timeout_tp.is_none_or(|tp| time < tp)
    }

    fn before_release_timeout(&self, time: Instant) -> bool {
        self.release_timeout_tp.is_none_or(|tp| time < tp)
    }
}

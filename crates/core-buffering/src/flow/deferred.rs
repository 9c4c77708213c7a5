use std::time::Instant;

use core_events::InputEvent;
use core_keys::{Key, Keyset};
use core_layout::{FlowType, KeysetProperty};
use tracing::trace;

use crate::flow::FlowResult;
use crate::state::State;

/// Flow that interprets a run of key presses arriving within the timeout
/// window as a single chord, committing the longest mapped prefix.
///
/// The buffer is consumed lazily: `consumed_event_last` tracks the prefix
/// belonging to the most recently committed mapping, so a longer prefix that
/// maps can override a shorter one until the window closes, while events
/// past the committed prefix are left for the next interpretation.
pub struct DeferredKeyFlow {
    timeout_tp: Option<Instant>,
    observed_event_last: usize,
    consumed_event_last: usize,
    repeat_key: Key,
    pressed_keyset: Keyset,
    dontcare_keyset: Keyset,
    property: KeysetProperty,
}

impl DeferredKeyFlow {
    pub fn reset(state: &mut State) -> Option<Self> {
        let Some(&InputEvent::KeyPress { time, key }) = state.events().front() else {
            return None;
        };

        let active_keyset = state.modifier_keyset() + key;
        let Some(property) = state.find_keyset_property(&active_keyset).cloned() else {
            // No mapped keyset passes through this one.
            trace!(target: "buffering.flow", keyset = ?active_keyset, "unregistered");
            state.press_none_key(key);
            state.pop_event();
            return None;
        };

        if property.is_mapped() {
            trace!(target: "buffering.flow", keyset = ?active_keyset, "mapped");
            state.apply_key(
                active_keyset,
                *property.trigger_keyset(),
                *property.modifier_keyset(),
                key,
            );
        } else {
            trace!(target: "buffering.flow", keyset = ?active_keyset, "unmapped");
            state.press_none_key(key);
        }

        if property.is_leaf() {
            trace!(target: "buffering.flow", keyset = ?active_keyset, "leaf");
            state.pop_event();
            return None;
        }

        trace!(target: "buffering.flow", "begin DEFERRED flow");
        Some(Self {
            timeout_tp: time.checked_add(state.timeout_dur()),
            // Index 0 (the front press) has been examined and is always
            // consumed once the flow ends.
            observed_event_last: 1,
            consumed_event_last: 1,
            repeat_key: key,
            pressed_keyset: active_keyset,
            dontcare_keyset: state.dontcare_keyset(),
            property,
        })
    }

    pub fn update(&mut self, state: &mut State) -> FlowResult {
        if self.observed_event_last == state.events().len() {
            let now = Instant::now();
            if self.timed_out(now) {
                trace!(target: "buffering.flow", "timed out");
                state.consume_events(self.consumed_event_last);
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
                // A control-plane event ends the lookahead at once.
                state.consume_events(self.consumed_event_last);
                FlowResult::Done
            }
        }
    }

    fn update_press(&mut self, time: Instant, key: Key, state: &mut State) -> FlowResult {
        if self.timed_out(time) {
            trace!(target: "buffering.flow", %key, "timed out");
            return self.commit(state);
        }

        let flow_type = state.find_key_property(key).map(|p| p.flow_type());
        if flow_type != Some(FlowType::Deferred) {
            trace!(target: "buffering.flow", %key, "interrupt");
            return self.commit(state);
        }

        if key == self.repeat_key {
            // System key repeat of the newest chord member.
            trace!(target: "buffering.flow", %key, "repeat");
            return self.commit(state);
        }

        if !self.property.is_combinable(key) {
            trace!(
                target: "buffering.flow",
                %key,
                combinable = ?self.property.combinable_keyset(),
                "not combinable"
            );
            return self.commit(state);
        }

        self.repeat_key = key;
        self.pressed_keyset += key;
        self.dontcare_keyset += key;

        let Some(property) = state.find_keyset_property(&self.pressed_keyset).cloned() else {
            trace!(target: "buffering.flow", keyset = ?self.pressed_keyset, "unregistered");
            return self.commit(state);
        };
        self.property = property;

        if self.property.is_mapped() {
            trace!(target: "buffering.flow", keyset = ?self.pressed_keyset, "mapped");
            state.apply(
                self.pressed_keyset,
                *self.property.trigger_keyset(),
                *self.property.modifier_keyset(),
                self.dontcare_keyset,
            );
            self.consumed_event_last = self.observed_event_last;
        }

        if self.property.is_leaf() {
            trace!(target: "buffering.flow", "leaf");
            return self.commit(state);
        }

        FlowResult::Continue
    }

    fn update_release(&mut self, time: Instant, key: Key, state: &mut State) -> FlowResult {
        if self.timed_out(time) {
            trace!(target: "buffering.flow", %key, "timed out");
            return self.commit(state);
        }

        // Releasing any held chord member signals commitment to the current
        // combination.
        if self.pressed_keyset.contains(key) {
            return self.commit(state);
        }

        self.dontcare_keyset -= key;
        FlowResult::Continue
    }

    fn commit(&self, state: &mut State) -> FlowResult {
        state.consume_events(self.consumed_event_last);
        FlowResult::Done
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_layout::{Command, KeyRole, KeyboardConfigBuilder};
    use core_keys::to_key;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    const TIMEOUT: Duration = Duration::from_millis(1000);

    fn test_state() -> State {
        let k1 = to_key(1);
        let k2 = to_key(2);
        let k3 = to_key(3);
        let mut builder = KeyboardConfigBuilder::new();
        builder.set_timeout_dur(TIMEOUT);
        builder.set_default_layout("deferred-test");
        let layout = builder.layout("deferred-test");
        for key in [k1, k2, k3] {
            layout.create_flow(key, FlowType::Deferred);
        }
        layout
            .create_mapping(&[(k1, KeyRole::Trigger)], Command::new())
            .unwrap();
        layout
            .create_mapping(&[(k1, KeyRole::Trigger), (k2, KeyRole::Trigger)], Command::new())
            .unwrap();

        let mut state = State::new();
        state.reset(Some(builder.build()));
        state
    }

    fn keyset(codes: &[u16]) -> Keyset {
        codes.iter().map(|&c| to_key(c)).collect()
    }

    fn press(state: &mut State, time: Instant, code: u16) {
        state.push_event(InputEvent::KeyPress { time, key: to_key(code) });
    }

    fn release(state: &mut State, time: Instant, code: u16) {
        state.push_event(InputEvent::KeyRelease { time, key: to_key(code) });
    }

    #[test]
    fn two_presses_inside_window_commit_the_pair() {
        let mut state = test_state();
        let base = Instant::now() - TIMEOUT;
        press(&mut state, base, 1);
        press(&mut state, base + Duration::from_millis(5), 2);

        let mut flow = DeferredKeyFlow::reset(&mut state).expect("node keyset continues");
        assert_eq!(state.active_keyset(), keyset(&[1]), "prefix committed eagerly");
        // The pair is a leaf, so observing the second press finishes.
        assert_eq!(flow.update(&mut state), FlowResult::Done);
        assert_eq!(state.active_keyset(), keyset(&[1, 2]));
        assert_eq!(state.trigger_keyset(), keyset(&[1, 2]));
        assert_eq!(state.events().len(), 0, "both presses consumed");
    }

    #[test]
    fn timeout_falls_back_to_committed_prefix() {
        let mut state = test_state();
        let base = Instant::now() - TIMEOUT - Duration::from_millis(200);
        press(&mut state, base, 1);

        let mut flow = DeferredKeyFlow::reset(&mut state).expect("continues");
        assert!(flow.is_idle(&state));
        assert_eq!(flow.timeout_tp(), Some(base + TIMEOUT));
        // Deadline is in the past, so the next tick commits the singleton.
        assert_eq!(flow.update(&mut state), FlowResult::Done);
        assert_eq!(state.active_keyset(), keyset(&[1]));
        assert_eq!(state.events().len(), 0);
    }

    #[test]
    fn late_second_press_is_left_in_the_buffer() {
        let mut state = test_state();
        let base = Instant::now() - TIMEOUT - Duration::from_millis(200);
        press(&mut state, base, 1);
        press(&mut state, base + TIMEOUT + Duration::from_millis(100), 2);

        let mut flow = DeferredKeyFlow::reset(&mut state).expect("continues");
        assert_eq!(flow.update(&mut state), FlowResult::Done);
        assert_eq!(state.active_keyset(), keyset(&[1]));
        assert_eq!(state.events().len(), 1, "late press awaits reinterpretation");
    }

    #[test]
    fn release_of_held_member_commits() {
        let mut state = test_state();
        let base = Instant::now() - Duration::from_millis(100);
        press(&mut state, base, 1);
        release(&mut state, base + Duration::from_millis(50), 1);

        let mut flow = DeferredKeyFlow::reset(&mut state).expect("continues");
        assert_eq!(flow.update(&mut state), FlowResult::Done);
        assert_eq!(state.active_keyset(), keyset(&[1]));
        assert_eq!(state.events().len(), 1, "the release itself is not consumed");
    }

    #[test]
    fn system_repeat_of_front_key_commits() {
        let mut state = test_state();
        let base = Instant::now() - Duration::from_millis(100);
        press(&mut state, base, 1);
        press(&mut state, base + Duration::from_millis(30), 1);

        let mut flow = DeferredKeyFlow::reset(&mut state).expect("continues");
        assert_eq!(flow.update(&mut state), FlowResult::Done);
        assert_eq!(state.active_keyset(), keyset(&[1]));
        assert_eq!(state.events().len(), 1);
    }

    #[test]
    fn non_combinable_key_commits_prefix() {
        let mut state = test_state();
        let base = Instant::now() - Duration::from_millis(100);
        press(&mut state, base, 1);
        press(&mut state, base + Duration::from_millis(10), 3);

        let mut flow = DeferredKeyFlow::reset(&mut state).expect("continues");
        assert_eq!(flow.update(&mut state), FlowResult::Done);
        assert_eq!(state.active_keyset(), keyset(&[1]));
        assert_eq!(state.events().len(), 1);
    }

    #[test]
    fn unrelated_release_keeps_waiting() {
        let mut state = test_state();
        let base = Instant::now() - Duration::from_millis(100);
        press(&mut state, base, 1);
        release(&mut state, base + Duration::from_millis(10), 42);

        let mut flow = DeferredKeyFlow::reset(&mut state).expect("continues");
        assert_eq!(flow.update(&mut state), FlowResult::Continue);
        assert!(flow.is_idle(&state));
    }

    #[test]
    fn unregistered_front_key_finishes_immediately() {
        let mut state = test_state();
        press(&mut state, Instant::now(), 42);
        assert!(DeferredKeyFlow::reset(&mut state).is_none());
        assert!(state.active_keyset().is_empty());
        assert!(state.dontcare_keyset().contains(to_key(42)));
        assert_eq!(state.events().len(), 0);
    }
}

use std::time::Instant;

use core_events::InputEvent;
use tracing::trace;

use crate::flow::FlowResult;
use crate::state::State;

/// Flow for keys that are pressed on their own: one event in, one commit
/// out. Never stays active.
pub struct ImmediateKeyFlow;

impl ImmediateKeyFlow {
    pub fn reset(state: &mut State) -> Option<Self> {
        let Some(&InputEvent::KeyPress { key, .. }) = state.events().front() else {
            return None;
        };

        let active_keyset = state.modifier_keyset() + key;
        let property = state.find_keyset_property(&active_keyset).cloned();
        match property {
            Some(property) if property.is_mapped() => {
                trace!(target: "buffering.flow", keyset = ?active_keyset, "mapped");
                state.apply_key(
                    active_keyset,
                    *property.trigger_keyset(),
                    *property.modifier_keyset(),
                    key,
                );
            }
            _ => {
                trace!(target: "buffering.flow", keyset = ?active_keyset, "unregistered or unmapped");
                state.press_none_key(key);
            }
        }

        state.pop_event();
        None
    }

    pub fn update(&mut self, _state: &mut State) -> FlowResult {
        debug_assert!(false, "immediate flow never stays active");
        FlowResult::Done
    }

    pub fn is_idle(&self, _state: &State) -> bool {
        true
    }

    pub fn timeout_tp(&self) -> Option<Instant> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_keys::{Keyset, to_key};
    use core_layout::{Command, FlowType, KeyRole, KeyboardConfigBuilder};
    use pretty_assertions::assert_eq;

    fn press(state: &mut State, ms: u64, code: u16) {
        // Absolute times are irrelevant to this flow.
        let base = Instant::now();
        state.push_event(InputEvent::KeyPress {
            time: base + std::time::Duration::from_millis(ms),
            key: to_key(code),
        });
    }

    fn test_state() -> State {
        let trigger_key = to_key(1);
        let modifier_key = to_key(21);
        let mut builder = KeyboardConfigBuilder::new();
        builder.set_default_layout("immediate-test");
        let layout = builder.layout("immediate-test");
        layout.create_flow(trigger_key, FlowType::Immediate);
        layout.create_flow(modifier_key, FlowType::Immediate);
        layout
            .create_mapping(&[(trigger_key, KeyRole::Trigger)], Command::new())
            .unwrap();
        layout
            .create_mapping(&[(modifier_key, KeyRole::Modifier)], Command::new())
            .unwrap();
        layout
            .create_mapping(
                &[(trigger_key, KeyRole::Trigger), (modifier_key, KeyRole::Modifier)],
                Command::new(),
            )
            .unwrap();

        let mut state = State::new();
        state.reset(Some(builder.build()));
        state
    }

    fn assert_keysets(state: &State, trigger: &[u16], modifier: &[u16], dontcare: &[u16]) {
        let to_set = |codes: &[u16]| codes.iter().map(|&c| to_key(c)).collect::<Keyset>();
        assert_eq!(state.trigger_keyset(), to_set(trigger));
        assert_eq!(state.modifier_keyset(), to_set(modifier));
        assert_eq!(state.dontcare_keyset(), to_set(dontcare));
    }

    #[test]
    fn press_unmapped_key() {
        let mut state = test_state();
        press(&mut state, 0, 42);
        press(&mut state, 2, 42);
        for _ in 0..2 {
            let events_before = state.events().len();
            assert!(ImmediateKeyFlow::reset(&mut state).is_none());
            assert_eq!(state.events().len() + 1, events_before);
            assert_keysets(&state, &[], &[], &[42]);
        }
    }

    #[test]
    fn press_trigger_key_repeatedly() {
        let mut state = test_state();
        press(&mut state, 0, 1);
        press(&mut state, 2, 1);
        for _ in 0..2 {
            assert!(ImmediateKeyFlow::reset(&mut state).is_none());
            assert_keysets(&state, &[1], &[], &[1]);
        }
    }

    #[test]
    fn modifier_then_trigger_builds_chord() {
        let mut state = test_state();
        press(&mut state, 0, 21);
        press(&mut state, 1, 1);
        assert!(ImmediateKeyFlow::reset(&mut state).is_none());
        assert_keysets(&state, &[], &[21], &[21]);
        assert!(ImmediateKeyFlow::reset(&mut state).is_none());
        assert_keysets(&state, &[1], &[21], &[1, 21]);
    }

    #[test]
    fn trigger_then_modifier_does_not_chord() {
        let mut state = test_state();
        press(&mut state, 0, 1);
        press(&mut state, 1, 21);
        assert!(ImmediateKeyFlow::reset(&mut state).is_none());
        assert_keysets(&state, &[1], &[], &[1]);
        // Trigger was not released, so the modifier press starts over.
        assert!(ImmediateKeyFlow::reset(&mut state).is_none());
        assert_keysets(&state, &[], &[21], &[1, 21]);
    }

    #[test]
    fn is_idle_is_constant() {
        let state = State::new();
        let flow = ImmediateKeyFlow;
        assert!(flow.is_idle(&state));
        assert_eq!(flow.timeout_tp(), None);
    }
}

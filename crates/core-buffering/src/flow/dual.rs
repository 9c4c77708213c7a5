use std::time::Instant;

use core_events::InputEvent;
use core_keys::{Key, Keyset};
use tracing::trace;

use crate::flow::FlowResult;
use crate::state::State;

/// Flow for dual-role keys: modifier while held, trigger when tapped.
///
/// The committing event is deliberately left in the buffer. A press of a
/// different key commits the modifier role and is then reinterpreted under
/// the new state, which is how it joins the chord; the release of the dual
/// key commits the trigger role and then runs through the normal release
/// path.
pub struct DualKeyFlow {
    modifier_keyset: Keyset,
    dontcare_keyset: Keyset,
    first_key: Key,
}

impl DualKeyFlow {
    pub fn reset(state: &mut State) -> Option<Self> {
        let Some(&InputEvent::KeyPress { key, .. }) = state.events().front() else {
            return None;
        };

        trace!(target: "buffering.flow", "begin DUAL flow");
        let flow = Self {
            modifier_keyset: state.modifier_keyset(),
            dontcare_keyset: state.dontcare_keyset() + key,
            first_key: key,
        };
        state.pop_event();
        Some(flow)
    }

    pub fn update(&mut self, state: &mut State) -> FlowResult {
        let Some(event) = state.events().front().cloned() else {
            return FlowResult::Continue;
        };

        match event {
            InputEvent::KeyPress { key, .. } => {
                if key != self.first_key {
                    trace!(target: "buffering.flow", %key, "as modifier");
                    self.finish(state, true);
                    return FlowResult::Done;
                }
                // Autorepeat of the held dual key; wait for something else.
                trace!(target: "buffering.flow", %key, "repeat");
                state.pop_event();
                FlowResult::Continue
            }
            InputEvent::KeyRelease { key, .. } => {
                if key != self.first_key {
                    trace!(target: "buffering.flow", %key, "release");
                    self.modifier_keyset -= key;
                    self.dontcare_keyset -= key;
                    state.pop_event();
                    return FlowResult::Continue;
                }
                trace!(target: "buffering.flow", %key, "as trigger");
                self.finish(state, false);
                FlowResult::Done
            }
            _ => {
                trace!(target: "buffering.flow", "non-key event");
                self.finish(state, false);
                FlowResult::Done
            }
        }
    }

    fn finish(&self, state: &mut State, as_modifier: bool) {
        if as_modifier {
            let active_keyset = self.modifier_keyset + self.first_key;
            state.apply(active_keyset, Keyset::new(), active_keyset, self.dontcare_keyset);
            return;
        }

        let active_keyset = state.modifier_keyset() + self.first_key;
        let property = state.find_keyset_property(&active_keyset).cloned();
        match property {
            Some(property) if property.is_mapped() => {
                trace!(target: "buffering.flow", keyset = ?active_keyset, "mapped");
                state.apply(
                    active_keyset,
                    *property.trigger_keyset(),
                    *property.modifier_keyset(),
                    self.dontcare_keyset,
                );
            }
            _ => {
                trace!(target: "buffering.flow", keyset = ?active_keyset, "unregistered or unmapped");
                state.apply(
                    Keyset::new(),
                    Keyset::new(),
                    self.modifier_keyset,
                    self.dontcare_keyset,
                );
            }
        }
    }

    pub fn is_idle(&self, state: &State) -> bool {
        state.events().is_empty()
    }

    pub fn timeout_tp(&self) -> Option<Instant> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_layout::{Command, FlowType, KeyRole, KeyboardConfigBuilder};
    use core_keys::to_key;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn test_state() -> State {
        let dual_key = to_key(1);
        let other_key = to_key(2);
        let mut builder = KeyboardConfigBuilder::new();
        builder.set_default_layout("dual-test");
        let layout = builder.layout("dual-test");
        layout.create_flow(dual_key, FlowType::Dual);
        layout.create_flow(other_key, FlowType::Immediate);
        layout
            .create_mapping(&[(dual_key, KeyRole::Trigger)], Command::new())
            .unwrap();
        layout
            .create_mapping(
                &[(dual_key, KeyRole::Modifier), (other_key, KeyRole::Trigger)],
                Command::new(),
            )
            .unwrap();

        let mut state = State::new();
        state.reset(Some(builder.build()));
        state
    }

    fn keyset(codes: &[u16]) -> Keyset {
        codes.iter().map(|&c| to_key(c)).collect()
    }

    fn press(state: &mut State, ms: u64, code: u16) {
        state.push_event(InputEvent::KeyPress {
            time: Instant::now() + Duration::from_millis(ms),
            key: to_key(code),
        });
    }

    fn release(state: &mut State, ms: u64, code: u16) {
        state.push_event(InputEvent::KeyRelease {
            time: Instant::now() + Duration::from_millis(ms),
            key: to_key(code),
        });
    }

    #[test]
    fn tap_commits_trigger_role() {
        let mut state = test_state();
        press(&mut state, 0, 1);
        release(&mut state, 30, 1);

        let mut flow = DualKeyFlow::reset(&mut state).expect("dual continues");
        assert_eq!(flow.update(&mut state), FlowResult::Done);
        assert_eq!(state.trigger_keyset(), keyset(&[1]));
        assert_eq!(state.active_keyset(), keyset(&[1]));
        assert_eq!(
            state.events().len(),
            1,
            "the release is left for the dispatcher"
        );
    }

    #[test]
    fn press_of_other_key_commits_modifier_role() {
        let mut state = test_state();
        press(&mut state, 0, 1);
        press(&mut state, 20, 2);

        let mut flow = DualKeyFlow::reset(&mut state).expect("dual continues");
        assert_eq!(flow.update(&mut state), FlowResult::Done);
        assert_eq!(state.active_keyset(), keyset(&[1]));
        assert_eq!(state.modifier_keyset(), keyset(&[1]));
        assert!(state.trigger_keyset().is_empty());
        assert_eq!(state.events().len(), 1, "the other press is reinterpreted");
    }

    #[test]
    fn autorepeat_of_dual_key_is_discarded() {
        let mut state = test_state();
        press(&mut state, 0, 1);
        press(&mut state, 25, 1);

        let mut flow = DualKeyFlow::reset(&mut state).expect("dual continues");
        assert_eq!(flow.update(&mut state), FlowResult::Continue);
        assert!(flow.is_idle(&state));
        assert_eq!(flow.timeout_tp(), None, "dual never times out");
    }

    #[test]
    fn release_of_unrelated_key_is_consumed() {
        let mut state = test_state();
        press(&mut state, 0, 1);
        release(&mut state, 10, 42);
        release(&mut state, 20, 1);

        let mut flow = DualKeyFlow::reset(&mut state).expect("dual continues");
        assert_eq!(flow.update(&mut state), FlowResult::Continue);
        assert_eq!(flow.update(&mut state), FlowResult::Done);
        assert_eq!(state.trigger_keyset(), keyset(&[1]));
    }

    #[test]
    fn unmapped_tap_keeps_modifiers_only() {
        let mut state = test_state();
        // Seed a committed modifier chord, then tap an unmapped dual combo.
        state.apply(keyset(&[3]), Keyset::new(), keyset(&[3]), keyset(&[3]));
        press(&mut state, 0, 1);
        release(&mut state, 10, 1);

        let mut flow = DualKeyFlow::reset(&mut state).expect("dual continues");
        assert_eq!(flow.update(&mut state), FlowResult::Done);
        assert!(state.active_keyset().is_empty());
        assert!(state.trigger_keyset().is_empty());
        assert_eq!(state.modifier_keyset(), keyset(&[3]));
        assert_eq!(state.dontcare_keyset(), keyset(&[1, 3]));
    }
}

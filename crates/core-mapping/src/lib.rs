//! core-mapping: translates logical key events into command execution.
//!
//! Purely reactive: a `Layout` event swaps the lookup table, a press or
//! repeat looks up the active keyset in the current layout and executes the
//! command against the previously executed one (letting shared modifiers
//! elide), a release releases. An unmapped keyset simply releases whatever
//! was held.

use std::sync::Arc;

use core_events::MappingEvent;
use core_keys::Keyset;
use core_layout::{Command, KeySink, KeyboardLayout};
use tracing::{debug, trace};

/// The mapping engine. Owns no threads; the pipeline host drives it with
/// events and a sink.
#[derive(Default)]
pub struct Engine {
    layout: Option<Arc<KeyboardLayout>>,
    // Owned clone: the command must outlive layout hot-swaps until released.
    prev_command: Option<Command>,
}

impl Engine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, event: MappingEvent, sink: &mut dyn KeySink) {
        match event {
            MappingEvent::KeyPress(keyset) => self.press(&keyset, sink),
            MappingEvent::KeyRepeat(keyset) => self.repeat(&keyset, sink),
            MappingEvent::KeyRelease(_) => self.release(sink),
            MappingEvent::Layout(layout) => {
                debug!(target: "mapping.engine", layout = ?layout, "set layout");
                self.layout = layout;
            }
        }
    }

    /// Release any outstanding command and drop the layout. Also the
    /// shutdown path: the mapping worker calls this before exiting.
    pub fn reset(&mut self, sink: &mut dyn KeySink) {
        if let Some(prev) = self.prev_command.take() {
            prev.release(sink);
        }
        self.layout = None;
    }

    fn press(&mut self, keyset: &Keyset, sink: &mut dyn KeySink) {
        debug!(target: "mapping.engine", keyset = ?keyset, "press");
        match self.find_command(keyset) {
            Some(command) => {
                trace!(target: "mapping.engine", "execute command");
                command.press(self.prev_command.as_ref(), sink);
                self.prev_command = Some(command);
            }
            None => {
                if let Some(prev) = self.prev_command.take() {
                    prev.release(sink);
                }
            }
        }
    }

    fn repeat(&mut self, keyset: &Keyset, sink: &mut dyn KeySink) {
        debug!(target: "mapping.engine", keyset = ?keyset, "repeat");
        match self.find_command(keyset) {
            Some(command) => {
                trace!(target: "mapping.engine", "execute command");
                command.repeat(self.prev_command.as_ref(), sink);
                self.prev_command = Some(command);
            }
            None => {
                if let Some(prev) = self.prev_command.take() {
                    prev.release(sink);
                }
            }
        }
    }

    fn release(&mut self, sink: &mut dyn KeySink) {
        debug!(target: "mapping.engine", "release");
        if let Some(prev) = self.prev_command.take() {
            trace!(target: "mapping.engine", "release command");
            prev.release(sink);
        }
    }

    fn find_command(&self, keyset: &Keyset) -> Option<Command> {
        self.layout.as_ref()?.find_command(keyset).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_keys::{Modifiers, to_key};
    use core_layout::{Action, KeyAction, KeyRole, KeyboardConfigBuilder};
    use pretty_assertions::assert_eq;

    #[derive(Default)]
    struct Recorder {
        ops: Vec<String>,
    }

    impl KeySink for Recorder {
        fn key_press(&mut self, code: u16) {
            self.ops.push(format!("+{code}"));
        }
        fn key_repeat(&mut self, code: u16) {
            self.ops.push(format!("*{code}"));
        }
        fn key_release(&mut self, code: u16) {
            self.ops.push(format!("-{code}"));
        }
        fn char_press(&mut self, ch: char) {
            self.ops.push(format!("+'{ch}'"));
        }
        fn char_release(&mut self, ch: char) {
            self.ops.push(format!("-'{ch}'"));
        }
    }

    fn setup() -> (Engine, Recorder, Arc<KeyboardLayout>) {
        let mut builder = KeyboardConfigBuilder::new();
        builder.set_default_layout("base");
        let layout = builder.layout("base");
        layout
            .create_mapping(
                &[(to_key(1), KeyRole::Trigger)],
                Command::from_iter([Action::Key(KeyAction::new(to_key(30), Modifiers::empty()))]),
            )
            .unwrap();
        layout
            .create_mapping(
                &[(to_key(2), KeyRole::Trigger)],
                Command::from_iter([Action::Key(KeyAction::new(to_key(31), Modifiers::empty()))]),
            )
            .unwrap();
        layout
            .create_mapping(
                &[(to_key(3), KeyRole::Trigger)],
                Command::from_iter([Action::Char('あ')]),
            )
            .unwrap();
        let config = builder.build();
        let layout = config.default_layout().unwrap().clone();
        (Engine::new(), Recorder::default(), layout)
    }

    fn keyset(codes: &[u16]) -> Keyset {
        codes.iter().map(|&c| to_key(c)).collect()
    }

    #[test]
    fn press_then_release_executes_command() {
        let (mut engine, mut sink, layout) = setup();
        engine.update(MappingEvent::Layout(Some(layout)), &mut sink);
        engine.update(MappingEvent::KeyPress(keyset(&[1])), &mut sink);
        engine.update(MappingEvent::KeyRelease(Keyset::new()), &mut sink);
        assert_eq!(sink.ops, vec!["+30".to_string(), "-30".into()]);
    }

    #[test]
    fn transition_between_commands_releases_previous() {
        let (mut engine, mut sink, layout) = setup();
        engine.update(MappingEvent::Layout(Some(layout)), &mut sink);
        engine.update(MappingEvent::KeyPress(keyset(&[1])), &mut sink);
        engine.update(MappingEvent::KeyPress(keyset(&[2])), &mut sink);
        engine.update(MappingEvent::KeyRelease(Keyset::new()), &mut sink);
        assert_eq!(
            sink.ops,
            vec!["+30".to_string(), "-30".into(), "+31".into(), "-31".into()]
        );
    }

    #[test]
    fn repeat_reuses_held_key() {
        let (mut engine, mut sink, layout) = setup();
        engine.update(MappingEvent::Layout(Some(layout)), &mut sink);
        engine.update(MappingEvent::KeyPress(keyset(&[1])), &mut sink);
        engine.update(MappingEvent::KeyRepeat(keyset(&[1])), &mut sink);
        assert_eq!(sink.ops, vec!["+30".to_string(), "*30".into()]);
    }

    #[test]
    fn unmapped_press_releases_outstanding_command() {
        let (mut engine, mut sink, layout) = setup();
        engine.update(MappingEvent::Layout(Some(layout)), &mut sink);
        engine.update(MappingEvent::KeyPress(keyset(&[1])), &mut sink);
        engine.update(MappingEvent::KeyPress(keyset(&[9])), &mut sink);
        assert_eq!(sink.ops, vec!["+30".to_string(), "-30".into()]);

        // Nothing held anymore; a release is a no-op.
        engine.update(MappingEvent::KeyRelease(Keyset::new()), &mut sink);
        assert_eq!(sink.ops.len(), 2);
    }

    #[test]
    fn without_layout_nothing_is_emitted() {
        let (mut engine, mut sink, _layout) = setup();
        engine.update(MappingEvent::KeyPress(keyset(&[1])), &mut sink);
        assert!(sink.ops.is_empty());
    }

    #[test]
    fn layout_swap_does_not_orphan_held_command() {
        let (mut engine, mut sink, layout) = setup();
        engine.update(MappingEvent::Layout(Some(layout)), &mut sink);
        engine.update(MappingEvent::KeyPress(keyset(&[3])), &mut sink);
        engine.update(MappingEvent::Layout(None), &mut sink);
        engine.update(MappingEvent::KeyRelease(Keyset::new()), &mut sink);
        assert_eq!(sink.ops, vec!["+'あ'".to_string(), "-'あ'".into()]);
    }

    #[test]
    fn reset_releases_outstanding_command() {
        let (mut engine, mut sink, layout) = setup();
        engine.update(MappingEvent::Layout(Some(layout)), &mut sink);
        engine.update(MappingEvent::KeyPress(keyset(&[2])), &mut sink);
        engine.reset(&mut sink);
        assert_eq!(sink.ops, vec!["+31".to_string(), "-31".into()]);
        engine.reset(&mut sink);
        assert_eq!(sink.ops.len(), 2, "reset is idempotent");
    }
}

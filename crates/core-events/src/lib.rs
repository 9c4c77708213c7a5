//! Core event types and channel plumbing for the two-stage pipeline.
//!
//! The buffering engine consumes [`InputEvent`]s and produces
//! [`MappingEvent`]s; both travel through [`Channel`]s owned by the pipeline
//! host. Channel policy: unbounded, `send` is non-blocking and fails only
//! once the channel is closed. With a single producer per channel the
//! ordering guarantees come for free; a failed send is logged and dropped by
//! the producer.

use std::sync::Arc;
use std::time::Instant;

use core_keys::{Key, Keyset};
use core_layout::{KeyboardConfig, KeyboardLayout};

mod channel;

pub use channel::Channel;

/// Events entering the buffering engine.
#[derive(Clone, Debug)]
pub enum InputEvent {
    /// Physical key went down, timestamped by the capture hook.
    KeyPress { time: Instant, key: Key },
    /// Physical key came up.
    KeyRelease { time: Instant, key: Key },
    /// User switched the session's default layouts mid-run.
    DefaultLayout {
        default: Arc<KeyboardLayout>,
        default_im: Option<Arc<KeyboardLayout>>,
    },
    /// Install a new configuration, or clear with `None`.
    Control(Option<Arc<KeyboardConfig>>),
}

/// Events leaving the buffering engine for the mapping engine.
#[derive(Clone, Debug)]
pub enum MappingEvent {
    KeyPress(Keyset),
    KeyRepeat(Keyset),
    KeyRelease(Keyset),
    Layout(Option<Arc<KeyboardLayout>>),
}

/// Producer handle used by the buffering engine.
///
/// `send_press` emits the press immediately followed by the layout event so
/// the receiver always evaluates a committed chord under the layout that was
/// current when it committed.
pub struct MappingSender {
    channel: Arc<Channel<MappingEvent>>,
}

impl MappingSender {
    pub fn new(channel: Arc<Channel<MappingEvent>>) -> Self {
        Self { channel }
    }

    pub fn send_press(&self, active_keyset: Keyset, layout: Option<&Arc<KeyboardLayout>>) -> bool {
        self.send(MappingEvent::KeyPress(active_keyset))
            && self.send(MappingEvent::Layout(layout.cloned()))
    }

    pub fn send_repeat(&self, active_keyset: Keyset) -> bool {
        self.send(MappingEvent::KeyRepeat(active_keyset))
    }

    pub fn send_release(&self, active_keyset: Keyset) -> bool {
        self.send(MappingEvent::KeyRelease(active_keyset))
    }

    pub fn send_layout(&self, layout: Option<&Arc<KeyboardLayout>>) -> bool {
        self.send(MappingEvent::Layout(layout.cloned()))
    }

    fn send(&self, event: MappingEvent) -> bool {
        let sent = self.channel.send(event);
        if !sent {
            tracing::warn!(target: "events", "mapping channel closed, event dropped");
        }
        sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_keys::to_key;
    use core_layout::KeyboardConfigBuilder;
    use pretty_assertions::assert_eq;

    #[test]
    fn press_is_followed_by_layout() {
        let mut builder = KeyboardConfigBuilder::new();
        builder.set_default_layout("base");
        let config = builder.build();
        let layout = config.default_layout().unwrap();

        let channel = Arc::new(Channel::new());
        let sender = MappingSender::new(Arc::clone(&channel));
        let keyset = Keyset::from_keys(&[to_key(1)]);
        assert!(sender.send_press(keyset, Some(layout)));

        match channel.try_receive() {
            Some(MappingEvent::KeyPress(ks)) => assert_eq!(ks, keyset),
            other => panic!("expected press, got {other:?}"),
        }
        match channel.try_receive() {
            Some(MappingEvent::Layout(Some(l))) => assert_eq!(l.name(), "base"),
            other => panic!("expected layout, got {other:?}"),
        }
        assert!(channel.try_receive().is_none());
    }

    #[test]
    fn sends_fail_after_close() {
        let channel = Arc::new(Channel::new());
        let sender = MappingSender::new(Arc::clone(&channel));
        channel.close();
        assert!(!sender.send_repeat(Keyset::new()));
        assert!(!sender.send_release(Keyset::new()));
        assert!(!sender.send_layout(None));
    }
}

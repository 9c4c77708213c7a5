use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use core_keys::{Key, Keyset};
use tracing::debug;

use crate::layout::KeyboardLayout;

/// Frozen configuration: layouts, defaults, and the timing window shared by
/// the timing-sensitive flows.
pub struct KeyboardConfig {
    timeout_dur: Duration,
    layouts: Vec<Arc<KeyboardLayout>>,
    default_layout: Option<Arc<KeyboardLayout>>,
    default_im_layout: Option<Arc<KeyboardLayout>>,
    auto_layout: bool,
}

impl KeyboardConfig {
    /// Window for DEFERRED/SIMUL interpretation. Zero means "no window":
    /// those flows commit on their next tick.
    pub fn timeout_dur(&self) -> Duration {
        self.timeout_dur
    }

    pub fn default_layout(&self) -> Option<&Arc<KeyboardLayout>> {
        self.default_layout.as_ref()
    }

    /// Layout used while the OS input method is enabled, when `auto_layout`
    /// is on.
    pub fn default_im_layout(&self) -> Option<&Arc<KeyboardLayout>> {
        self.default_im_layout.as_ref()
    }

    pub fn auto_layout(&self) -> bool {
        self.auto_layout
    }

    pub fn layout_count(&self) -> usize {
        self.layouts.len()
    }

    pub fn find_layout(&self, name: &str) -> Option<&Arc<KeyboardLayout>> {
        self.layouts.iter().find(|l| l.name() == name)
    }
}

impl fmt::Debug for KeyboardConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyboardConfig")
            .field("timeout_dur", &self.timeout_dur)
            .field("layouts", &self.layouts.len())
            .field(
                "default_layout",
                &self.default_layout.as_deref().map(KeyboardLayout::name),
            )
            .field("auto_layout", &self.auto_layout)
            .finish()
    }
}

struct LayoutSlot {
    layout: KeyboardLayout,
    transitions: Vec<(Keyset, String)>,
}

/// Builds a [`KeyboardConfig`] and freezes it into an `Arc`.
///
/// Layout names are created on demand, so transitions and defaults may
/// reference layouts that are only populated later (or never; an empty
/// layout maps nothing). Transition targets are resolved to weak references
/// at [`build`](Self::build) time, which is what allows transition cycles.
#[derive(Default)]
pub struct KeyboardConfigBuilder {
    timeout_dur: Duration,
    auto_layout: bool,
    default_layout: Option<String>,
    default_im_layout: Option<String>,
    layouts: Vec<LayoutSlot>,
}

impl KeyboardConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_timeout_dur(&mut self, dur: Duration) -> &mut Self {
        self.timeout_dur = dur;
        self
    }

    pub fn set_auto_layout(&mut self, enabled: bool) -> &mut Self {
        self.auto_layout = enabled;
        self
    }

    pub fn set_default_layout(&mut self, name: &str) -> &mut Self {
        self.ensure_layout(name);
        self.default_layout = Some(name.to_string());
        self
    }

    pub fn set_default_im_layout(&mut self, name: &str) -> &mut Self {
        self.ensure_layout(name);
        self.default_im_layout = Some(name.to_string());
        self
    }

    /// Access (creating if needed) the layout with the given name.
    pub fn layout(&mut self, name: &str) -> &mut KeyboardLayout {
        let index = self.ensure_layout(name);
        &mut self.layouts[index].layout
    }

    /// Record a transition from `layout` to `target` on the given keyset.
    pub fn transition(&mut self, layout: &str, keys: &[Key], target: &str) -> &mut Self {
        let keyset = Keyset::from_keys(keys);
        if keyset.is_empty() {
            return self;
        }
        self.ensure_layout(target);
        let index = self.ensure_layout(layout);
        self.layouts[index]
            .transitions
            .push((keyset, target.to_string()));
        self
    }

    fn ensure_layout(&mut self, name: &str) -> usize {
        if let Some(index) = self.layouts.iter().position(|s| s.layout.name() == name) {
            return index;
        }
        debug!(target: "layout", name, "create layout");
        self.layouts.push(LayoutSlot {
            layout: KeyboardLayout::new(name),
            transitions: Vec::new(),
        });
        self.layouts.len() - 1
    }

    pub fn build(self) -> Arc<KeyboardConfig> {
        let mut arcs = Vec::with_capacity(self.layouts.len());
        let mut transitions = Vec::with_capacity(self.layouts.len());
        for slot in self.layouts {
            arcs.push(Arc::new(slot.layout));
            transitions.push(slot.transitions);
        }

        let by_name: HashMap<&str, &Arc<KeyboardLayout>> =
            arcs.iter().map(|arc| (arc.name(), arc)).collect();

        for (arc, slot_transitions) in arcs.iter().zip(transitions) {
            let mut map: HashMap<Keyset, Weak<KeyboardLayout>> = HashMap::new();
            for (keyset, target) in slot_transitions {
                if let Some(target_arc) = by_name.get(target.as_str()) {
                    map.entry(keyset).or_insert_with(|| Arc::downgrade(target_arc));
                }
            }
            arc.install_next_layouts(map);
        }

        let find = |name: &Option<String>| {
            name.as_deref()
                .and_then(|n| by_name.get(n))
                .map(|arc| Arc::clone(arc))
        };
        let default_layout = find(&self.default_layout);
        let default_im_layout = find(&self.default_im_layout);

        Arc::new(KeyboardConfig {
            timeout_dur: self.timeout_dur,
            layouts: arcs,
            default_layout,
            default_im_layout,
            auto_layout: self.auto_layout,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Command, FlowType, KeyRole};
    use core_keys::to_key;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_resolve_by_name() {
        let mut builder = KeyboardConfigBuilder::new();
        builder.set_timeout_dur(Duration::from_millis(100));
        builder.set_default_layout("base");
        builder.set_default_im_layout("kana");
        builder.layout("base").create_flow(to_key(1), FlowType::Immediate);
        let config = builder.build();

        assert_eq!(config.timeout_dur(), Duration::from_millis(100));
        assert_eq!(config.layout_count(), 2);
        assert_eq!(config.default_layout().unwrap().name(), "base");
        assert_eq!(config.default_im_layout().unwrap().name(), "kana");
        assert!(!config.auto_layout());
    }

    #[test]
    fn transitions_permit_cycles_without_leaks() {
        let mut builder = KeyboardConfigBuilder::new();
        builder.set_default_layout("base");
        builder
            .layout("base")
            .create_mapping(&[(to_key(41), KeyRole::Modifier)], Command::new())
            .unwrap();
        builder.transition("base", &[to_key(41)], "kana");
        builder.transition("kana", &[to_key(41)], "base");
        let config = builder.build();

        let base = config.find_layout("base").unwrap();
        let kana = config.find_layout("kana").unwrap();
        let keyset = Keyset::from_keys(&[to_key(41)]);

        let next = base.find_next_layout(&keyset).expect("base -> kana");
        assert_eq!(next.name(), "kana");
        let back = kana.find_next_layout(&keyset).expect("kana -> base");
        assert_eq!(back.name(), "base");
        drop(next);
        drop(back);

        // Weak back-references: dropping the config tears the cycle down.
        let base_weak = Arc::downgrade(base);
        drop(config);
        assert!(base_weak.upgrade().is_none(), "cycle must not leak");
    }

    #[test]
    fn transition_to_unpopulated_layout_creates_it_empty() {
        let mut builder = KeyboardConfigBuilder::new();
        builder.set_default_layout("base");
        builder.transition("base", &[to_key(5)], "ghost");
        let config = builder.build();

        let ghost = config.find_layout("ghost").expect("created on demand");
        assert!(ghost.find_keyset_property(&Keyset::from_keys(&[to_key(5)])).is_none());
    }

    #[test]
    fn empty_transition_keyset_is_ignored() {
        let mut builder = KeyboardConfigBuilder::new();
        builder.set_default_layout("base");
        builder.transition("base", &[], "kana");
        let config = builder.build();
        assert!(config.find_layout("kana").is_none());
    }
}

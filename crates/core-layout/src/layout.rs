use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock, Weak};

use core_keys::{KEY_COUNT, Key, Keyset};
use tracing::{debug, warn};

use crate::command::Command;
use crate::keyset_property::KeysetProperty;
use crate::{FlowType, KeyProperty, KeyRole};

/// Upper bound on keys per mapping; subset enumeration is `2^n`.
pub const MAX_ACTIVE_KEY_COUNT: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum LayoutError {
    #[error("mapping uses {count} keys, limit is {MAX_ACTIVE_KEY_COUNT}")]
    TooManyKeys { count: usize },
}

/// A named, immutable-after-freeze bundle of key properties, keyset
/// properties, commands, and transitions to successor layouts.
///
/// Construction happens through [`crate::KeyboardConfigBuilder`]: mappings
/// and flows are added while the layout is still exclusively owned; the
/// next-layout table is installed
/// once, after every layout of the config has been wrapped in an `Arc`, so
/// transition graphs may contain cycles without leaking.
pub struct KeyboardLayout {
    name: String,
    key_property_set: Keyset,
    key_properties: Vec<KeyProperty>,
    keyset_property_map: HashMap<Keyset, KeysetProperty>,
    command_map: HashMap<Keyset, Command>,
    next_layout_map: OnceLock<HashMap<Keyset, Weak<KeyboardLayout>>>,
}

impl KeyboardLayout {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key_property_set: Keyset::new(),
            key_properties: vec![KeyProperty::default(); KEY_COUNT],
            keyset_property_map: HashMap::new(),
            command_map: HashMap::new(),
            next_layout_map: OnceLock::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Assign a flow to a key. Returns false when the key already has one.
    pub fn create_flow(&mut self, key: Key, flow_type: FlowType) -> bool {
        if key.is_unknown() || self.key_property_set.contains(key) {
            return false;
        }
        self.key_property_set += key;
        self.key_properties[key.index()] = KeyProperty::new(flow_type);
        true
    }

    /// Register a command for the full keyset and derive keyset properties
    /// for every prefix.
    ///
    /// Every non-empty proper subset of the keys becomes (or extends) a NODE
    /// whose combinable keys are the complement; the full set becomes MAPPED
    /// with the trigger/modifier partition taken from the roles. Returns
    /// `Ok(false)` without touching the layout when an identical keyset is
    /// already mapped.
    pub fn create_mapping(
        &mut self,
        keys: &[(Key, KeyRole)],
        command: Command,
    ) -> Result<bool, LayoutError> {
        if keys.len() >= MAX_ACTIVE_KEY_COUNT {
            return Err(LayoutError::TooManyKeys { count: keys.len() });
        }

        let mut active_keyset = Keyset::new();
        let mut trigger_keyset = Keyset::new();
        let mut modifier_keyset = Keyset::new();
        for &(key, role) in keys {
            active_keyset += key;
            match role {
                KeyRole::Trigger => trigger_keyset += key,
                KeyRole::Modifier => modifier_keyset += key,
                KeyRole::None => {}
            }
        }
        if active_keyset.is_empty() {
            return Ok(false);
        }

        if self.command_map.contains_key(&active_keyset) {
            warn!(
                target: "layout",
                layout = %self.name,
                keyset = ?active_keyset,
                "mapping already exists"
            );
            return Ok(false);
        }
        debug!(
            target: "layout",
            layout = %self.name,
            keyset = ?active_keyset,
            "new mapping"
        );
        self.command_map.insert(active_keyset, command);

        self.map_subsets(keys);
        self.keyset_property_map
            .entry(active_keyset)
            .or_default()
            .make_mapped(trigger_keyset, modifier_keyset);
        Ok(true)
    }

    /// Record every non-empty proper subset of `keys` as a node whose
    /// combinable set is the complement.
    fn map_subsets(&mut self, keys: &[(Key, KeyRole)]) {
        let all_mask: u64 = (1u64 << keys.len()) - 1;
        for mask in 1..all_mask {
            let mut subset = Keyset::new();
            let mut combinable = Keyset::new();
            for (i, &(key, _)) in keys.iter().enumerate() {
                if mask & (1 << i) != 0 {
                    subset += key;
                } else {
                    combinable += key;
                }
            }
            self.keyset_property_map
                .entry(subset)
                .or_default()
                .make_node(combinable);
        }
    }

    pub fn find_key_property(&self, key: Key) -> Option<&KeyProperty> {
        if !self.key_property_set.contains(key) {
            return None;
        }
        Some(&self.key_properties[key.index()])
    }

    pub fn find_keyset_property(&self, keyset: &Keyset) -> Option<&KeysetProperty> {
        self.keyset_property_map.get(keyset)
    }

    pub fn find_command(&self, keyset: &Keyset) -> Option<&Command> {
        self.command_map.get(keyset)
    }

    /// Look up the successor layout for a committed keyset, if the weak link
    /// is still alive.
    pub fn find_next_layout(&self, keyset: &Keyset) -> Option<Arc<KeyboardLayout>> {
        self.next_layout_map.get()?.get(keyset)?.upgrade()
    }

    pub(crate) fn install_next_layouts(&self, map: HashMap<Keyset, Weak<KeyboardLayout>>) {
        // A config builder freezes each layout exactly once.
        let _ = self.next_layout_map.set(map);
    }
}

impl fmt::Debug for KeyboardLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyboardLayout({})", self.name)
    }
}

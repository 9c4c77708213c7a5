use core_keys::{Key, Keyset};

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct KeysetFlags: u8 {
        /// A command exists for exactly this keyset.
        const MAPPED = 1 << 0;
        /// At least one longer mapped keyset extends this one.
        const NODE = 1 << 1;
    }
}

/// Metadata attached to a keyset at layout build time.
///
/// For a MAPPED keyset, `trigger_keyset` and `modifier_keyset` partition the
/// keys that produce output from the keys that merely qualify. For a NODE
/// keyset, `combinable_keyset` lists the keys that can still be added while
/// staying on the way to some mapped keyset; it is always disjoint from the
/// keyset itself.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KeysetProperty {
    flags: KeysetFlags,
    combinable_keyset: Keyset,
    trigger_keyset: Keyset,
    modifier_keyset: Keyset,
}

impl KeysetProperty {
    pub fn is_mapped(&self) -> bool {
        self.flags.contains(KeysetFlags::MAPPED)
    }

    pub fn is_node(&self) -> bool {
        self.flags.contains(KeysetFlags::NODE)
    }

    pub fn is_leaf(&self) -> bool {
        !self.is_node()
    }

    pub fn is_combinable(&self, key: Key) -> bool {
        self.combinable_keyset.contains(key)
    }

    pub fn combinable_keyset(&self) -> &Keyset {
        &self.combinable_keyset
    }

    pub fn trigger_keyset(&self) -> &Keyset {
        &self.trigger_keyset
    }

    pub fn modifier_keyset(&self) -> &Keyset {
        &self.modifier_keyset
    }

    /// Accumulate combinable keys from another mapping that passes through
    /// this keyset.
    pub(crate) fn make_node(&mut self, combinable_keyset: Keyset) {
        self.combinable_keyset += combinable_keyset;
        self.flags
            .set(KeysetFlags::NODE, !self.combinable_keyset.is_empty());
    }

    pub(crate) fn make_mapped(&mut self, trigger_keyset: Keyset, modifier_keyset: Keyset) {
        self.flags |= KeysetFlags::MAPPED;
        self.trigger_keyset = trigger_keyset;
        self.modifier_keyset = modifier_keyset;
    }
}

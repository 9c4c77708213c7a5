//! Fixed-capacity key set, one bit per representable key.
//!
//! Equality, hashing and the set operations are O(words). The 256-bit
//! capacity is deliberate: mapping construction enumerates subsets of up to
//! 64 keys per mapping, and set algebra inside the flows runs on every key
//! event.

use std::fmt;
use std::ops::{Add, AddAssign, Sub, SubAssign};

use crate::{KEY_COUNT, Key};

const WORD_BITS: usize = u64::BITS as usize;
const WORDS: usize = KEY_COUNT / WORD_BITS;

/// Unordered set of [`Key`], bitmask-encoded.
///
/// Adding or removing [`Key::UNKNOWN`] is a no-op, so the unknown key can
/// never become active, trigger, modifier or dontcare state.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Keyset {
    bits: [u64; WORDS],
}

impl Keyset {
    pub const EMPTY: Keyset = Keyset { bits: [0; WORDS] };

    pub fn new() -> Self {
        Self::EMPTY
    }

    pub fn from_keys(keys: &[Key]) -> Self {
        let mut set = Self::EMPTY;
        for &key in keys {
            set.insert(key);
        }
        set
    }

    pub fn insert(&mut self, key: Key) {
        if key.is_unknown() {
            return;
        }
        self.bits[key.index() / WORD_BITS] |= 1 << (key.index() % WORD_BITS);
    }

    pub fn remove(&mut self, key: Key) {
        if key.is_unknown() {
            return;
        }
        self.bits[key.index() / WORD_BITS] &= !(1 << (key.index() % WORD_BITS));
    }

    pub fn contains(&self, key: Key) -> bool {
        if key.is_unknown() {
            return false;
        }
        self.bits[key.index() / WORD_BITS] & (1 << (key.index() % WORD_BITS)) != 0
    }

    /// True when every member of `other` is also a member of `self`.
    pub fn contains_all(&self, other: &Keyset) -> bool {
        self.bits
            .iter()
            .zip(other.bits.iter())
            .all(|(a, b)| a & b == *b)
    }

    pub fn is_empty(&self) -> bool {
        self.bits.iter().all(|w| *w == 0)
    }

    pub fn count(&self) -> usize {
        self.bits.iter().map(|w| w.count_ones() as usize).sum()
    }

    pub fn clear(&mut self) {
        self.bits = [0; WORDS];
    }

    /// Iterate members in ascending key order.
    pub fn iter(&self) -> impl Iterator<Item = Key> + '_ {
        (1..KEY_COUNT as u16)
            .map(crate::to_key)
            .filter(|key| self.contains(*key))
    }
}

impl FromIterator<Key> for Keyset {
    fn from_iter<I: IntoIterator<Item = Key>>(iter: I) -> Self {
        let mut set = Self::EMPTY;
        for key in iter {
            set.insert(key);
        }
        set
    }
}

impl Add<Key> for Keyset {
    type Output = Keyset;
    fn add(mut self, key: Key) -> Keyset {
        self.insert(key);
        self
    }
}

impl Sub<Key> for Keyset {
    type Output = Keyset;
    fn sub(mut self, key: Key) -> Keyset {
        self.remove(key);
        self
    }
}

impl Add<Keyset> for Keyset {
    type Output = Keyset;
    fn add(mut self, other: Keyset) -> Keyset {
        self += other;
        self
    }
}

impl Sub<Keyset> for Keyset {
    type Output = Keyset;
    fn sub(mut self, other: Keyset) -> Keyset {
        self -= other;
        self
    }
}

impl AddAssign<Key> for Keyset {
    fn add_assign(&mut self, key: Key) {
        self.insert(key);
    }
}

impl SubAssign<Key> for Keyset {
    fn sub_assign(&mut self, key: Key) {
        self.remove(key);
    }
}

impl AddAssign<Keyset> for Keyset {
    fn add_assign(&mut self, other: Keyset) {
        for (a, b) in self.bits.iter_mut().zip(other.bits.iter()) {
            *a |= b;
        }
    }
}

impl SubAssign<Keyset> for Keyset {
    fn sub_assign(&mut self, other: Keyset) {
        for (a, b) in self.bits.iter_mut().zip(other.bits.iter()) {
            *a &= !b;
        }
    }
}

impl fmt::Debug for Keyset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::to_key;
    use pretty_assertions::assert_eq;
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    fn hash_of(set: &Keyset) -> u64 {
        let mut hasher = DefaultHasher::new();
        set.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn unknown_key_is_never_a_member() {
        let mut set = Keyset::new();
        set.insert(Key::UNKNOWN);
        assert!(set.is_empty());
        assert!(!set.contains(Key::UNKNOWN));
        set.remove(Key::UNKNOWN);
        assert!(set.is_empty());
    }

    #[test]
    fn equality_ignores_insertion_order() {
        let a = Keyset::from_keys(&[to_key(1), to_key(200), to_key(64)]);
        let b = Keyset::from_keys(&[to_key(64), to_key(1), to_key(200)]);
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
    }

    #[test]
    fn set_algebra() {
        let a = Keyset::from_keys(&[to_key(1), to_key(2)]);
        let b = Keyset::from_keys(&[to_key(2), to_key(3)]);

        assert_eq!(
            a + b,
            Keyset::from_keys(&[to_key(1), to_key(2), to_key(3)])
        );
        assert_eq!(a - b, Keyset::from_keys(&[to_key(1)]));
        assert_eq!(a + to_key(3) - to_key(1), b);
    }

    #[test]
    fn containment_and_count() {
        let sub = Keyset::from_keys(&[to_key(10), to_key(70)]);
        let sup = sub + to_key(130);
        assert!(sup.contains_all(&sub));
        assert!(!sub.contains_all(&sup));
        assert_eq!(sup.count(), 3);
        assert!(sup.contains(to_key(130)));
    }

    #[test]
    fn iteration_is_sorted_and_complete() {
        let set = Keyset::from_keys(&[to_key(255), to_key(3), to_key(64)]);
        let keys: Vec<Key> = set.iter().collect();
        assert_eq!(keys, vec![to_key(3), to_key(64), to_key(255)]);
    }

    #[test]
    fn word_boundary_membership() {
        for code in [63u16, 64, 127, 128, 191, 192, 255] {
            let set = Keyset::from_keys(&[to_key(code)]);
            assert!(set.contains(to_key(code)), "code {code}");
            assert_eq!(set.count(), 1);
        }
    }
}

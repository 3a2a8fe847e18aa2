//! Key/value chain state and its merkle digest.

use std::collections::BTreeMap;

use borsh::{BorshDeserialize, BorshSerialize};
use tessera_primitives::{buf::Buf32, hash};

const LEAF_TAG: u8 = 0x00;
const NODE_TAG: u8 = 0x01;

/// Chain state, computed as a function of a pre-state and a block.
///
/// The version counts the transitions applied since genesis.  It isn't part
/// of the digest, two states with the same contents digest the same.
#[derive(Clone, Debug, Default, Eq, PartialEq, BorshSerialize, BorshDeserialize)]
pub struct State {
    entries: BTreeMap<Vec<u8>, Vec<u8>>,
    version: u64,
}

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a state from some initial entries, used for genesis.
    pub fn from_entries(entries: impl IntoIterator<Item = (Vec<u8>, Vec<u8>)>) -> Self {
        Self {
            entries: entries.into_iter().collect(),
            version: 0,
        }
    }

    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        self.entries.get(key).map(|v| v.as_slice())
    }

    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.entries.contains_key(key)
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &[u8])> {
        self.entries.iter().map(|(k, v)| (k.as_slice(), v.as_slice()))
    }

    pub(crate) fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.entries.insert(key, value);
    }

    pub(crate) fn delete(&mut self, key: &[u8]) {
        self.entries.remove(key);
    }

    /// Bumps the version after a full transition.
    pub fn bump_version(&mut self) {
        self.version += 1;
    }

    /// Computes the merkle root over the sorted entries.
    ///
    /// Leaves are `H(0x00 || borsh(key, value))`, inner nodes are
    /// `H(0x01 || left || right)` and an odd node at the end of a layer is
    /// carried up as is.  The empty state is all zeroes.
    pub fn digest(&self) -> Buf32 {
        let mut layer: Vec<Buf32> = self
            .entries
            .iter()
            .map(|(k, v)| {
                let enc = borsh::to_vec(&(k, v)).expect("state: enc leaf");
                hash::concat(&[&[LEAF_TAG], &enc])
            })
            .collect();

        if layer.is_empty() {
            return Buf32::zero();
        }

        while layer.len() > 1 {
            layer = layer
                .chunks(2)
                .map(|pair| match pair {
                    [l, r] => hash::concat(&[&[NODE_TAG], l.as_slice(), r.as_slice()]),
                    [single] => *single,
                    _ => unreachable!(),
                })
                .collect();
        }

        layer[0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kv(k: &str, v: &str) -> (Vec<u8>, Vec<u8>) {
        (k.as_bytes().to_vec(), v.as_bytes().to_vec())
    }

    #[test]
    fn test_empty_digest_is_zero() {
        assert!(State::new().digest().is_zero());
    }

    #[test]
    fn test_digest_ignores_insertion_order_and_version() {
        let a = State::from_entries(vec![kv("a", "1"), kv("b", "2"), kv("c", "3")]);
        let mut b = State::from_entries(vec![kv("c", "3"), kv("a", "1"), kv("b", "2")]);
        b.bump_version();
        assert_eq!(a.digest(), b.digest());
        assert_ne!(a.version(), b.version());
    }

    #[test]
    fn test_digest_changes_with_contents() {
        let a = State::from_entries(vec![kv("a", "1"), kv("b", "2")]);
        let b = State::from_entries(vec![kv("a", "1"), kv("b", "3")]);
        let c = State::from_entries(vec![kv("a", "1")]);
        assert_ne!(a.digest(), b.digest());
        assert_ne!(a.digest(), c.digest());
        assert!(!c.digest().is_zero());
    }

    #[test]
    fn test_digest_key_value_boundary() {
        // Same concatenated bytes, split differently.
        let a = State::from_entries(vec![kv("ab", "c")]);
        let b = State::from_entries(vec![kv("a", "bc")]);
        assert_ne!(a.digest(), b.digest());
    }
}

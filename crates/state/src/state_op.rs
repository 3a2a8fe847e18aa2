//! Low-level operations we can make to write to the chain state.

use borsh::{BorshDeserialize, BorshSerialize};

use crate::state::State;

#[derive(Clone, Debug, Eq, PartialEq, BorshDeserialize, BorshSerialize)]
pub enum StateOp {
    /// Writes a value, replacing whatever was there.
    Put(Vec<u8>, Vec<u8>),

    /// Removes a key if present.
    Delete(Vec<u8>),
}

/// Collection of writes we're making to the state, produced by a single
/// extrinsic and applied all together or not at all.
#[derive(Clone, Debug, Default, Eq, PartialEq, BorshDeserialize, BorshSerialize)]
pub struct WriteBatch {
    ops: Vec<StateOp>,
}

impl WriteBatch {
    pub fn new_empty() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.ops.push(StateOp::Put(key, value));
    }

    pub fn delete(&mut self, key: Vec<u8>) {
        self.ops.push(StateOp::Delete(key));
    }

    pub fn ops(&self) -> &[StateOp] {
        &self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// On a given in-memory state, applies a write batch.  Later ops on the same
/// key win.
pub fn apply_write_batch_to_state(state: &mut State, batch: WriteBatch) {
    for op in batch.ops {
        match op {
            StateOp::Put(k, v) => state.put(k, v),
            StateOp::Delete(k) => state.delete(&k),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_in_order() {
        let mut state = State::from_entries(vec![(b"a".to_vec(), b"0".to_vec())]);
        let mut batch = WriteBatch::new_empty();
        batch.put(b"b".to_vec(), b"1".to_vec());
        batch.delete(b"a".to_vec());
        batch.put(b"b".to_vec(), b"2".to_vec());
        apply_write_batch_to_state(&mut state, batch);

        assert_eq!(state.get(b"a"), None);
        assert_eq!(state.get(b"b"), Some(&b"2"[..]));
        assert_eq!(state.len(), 1);
    }
}

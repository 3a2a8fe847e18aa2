//! Blocks waiting on a parent we haven't seen yet.

use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};

use tessera_primitives::prelude::*;
use tessera_state::prelude::*;
use tracing::*;

/// Holds orphan blocks keyed by the parent they're waiting for.  When full the
/// oldest orphan is dropped.
pub struct OrphanPool {
    capacity: usize,

    /// Orphans indexed by the parent they're waiting on.
    by_parent: HashMap<BlockId, Vec<Arc<Block>>>,

    /// Orphan id to the parent it's filed under.
    parents: HashMap<BlockId, BlockId>,

    /// Insertion order, for eviction.
    order: VecDeque<BlockId>,
}

impl OrphanPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            by_parent: HashMap::new(),
            parents: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.parents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parents.is_empty()
    }

    pub fn contains(&self, id: &BlockId) -> bool {
        self.parents.contains_key(id)
    }

    /// Adds an orphan.  Returns `false` if we can't hold anything at all or
    /// already have it.
    pub fn insert(&mut self, block: Arc<Block>) -> bool {
        if self.capacity == 0 {
            return false;
        }

        let blkid = block.get_blockid();
        if self.parents.contains_key(&blkid) {
            return false;
        }

        while self.parents.len() >= self.capacity {
            self.evict_oldest();
        }

        let parent = *block.parent();
        self.by_parent.entry(parent).or_default().push(block);
        self.parents.insert(blkid, parent);
        self.order.push_back(blkid);
        true
    }

    fn evict_oldest(&mut self) {
        while let Some(id) = self.order.pop_front() {
            // Entries can already be gone if they were released.
            if let Some(parent) = self.parents.remove(&id) {
                self.remove_from_parent(&parent, &id);
                debug!(blkid = %id, "evicted orphan block");
                return;
            }
        }
    }

    fn remove_from_parent(&mut self, parent: &BlockId, id: &BlockId) {
        if let Some(list) = self.by_parent.get_mut(parent) {
            list.retain(|b| b.get_blockid() != *id);
            if list.is_empty() {
                self.by_parent.remove(parent);
            }
        }
    }

    /// Removes and returns all the orphans waiting on a parent.
    pub fn take_children(&mut self, parent: &BlockId) -> Vec<Arc<Block>> {
        let children = self.by_parent.remove(parent).unwrap_or_default();
        for child in &children {
            self.parents.remove(&child.get_blockid());
        }
        self.order.retain(|id| self.parents.contains_key(id));
        children
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(parent: BlockId, tag: u8) -> Arc<Block> {
        let tmplt = HeaderTemplate::new(parent, 5, Buf32::zero(), Buf32::zero());
        Arc::new(Block::new(
            tmplt.complete_with(Seal::new(EngineTag::Work, vec![tag])),
            vec![],
        ))
    }

    #[test]
    fn test_hold_and_take() {
        let mut pool = OrphanPool::new(8);
        let p = BlockId::from([1; 32]);
        let a = block(p, 1);
        let b = block(p, 2);
        let c = block(BlockId::from([2; 32]), 3);

        assert!(pool.insert(a.clone()));
        assert!(!pool.insert(a.clone()));
        assert!(pool.insert(b));
        assert!(pool.insert(c.clone()));
        assert_eq!(pool.len(), 3);

        let children = pool.take_children(&p);
        assert_eq!(children.len(), 2);
        assert_eq!(pool.len(), 1);
        assert!(!pool.contains(&a.get_blockid()));
        assert!(pool.contains(&c.get_blockid()));
        assert!(pool.take_children(&p).is_empty());
    }

    #[test]
    fn test_evicts_oldest() {
        let mut pool = OrphanPool::new(2);
        let p = BlockId::from([1; 32]);
        let blocks: Vec<_> = (0..3).map(|i| block(p, i)).collect();
        for b in &blocks {
            assert!(pool.insert(b.clone()));
        }

        assert_eq!(pool.len(), 2);
        assert!(!pool.contains(&blocks[0].get_blockid()));
        assert!(pool.contains(&blocks[2].get_blockid()));
        assert_eq!(pool.take_children(&p).len(), 2);
    }

    #[test]
    fn test_zero_capacity() {
        let mut pool = OrphanPool::new(0);
        assert!(!pool.insert(block(BlockId::from([1; 32]), 0)));
        assert!(pool.is_empty());
    }
}

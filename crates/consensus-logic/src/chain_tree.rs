//! Tree of validated blocks that haven't been finalized yet, rooted at the
//! finalized block.

use std::{collections::*, sync::Arc};

use tessera_primitives::prelude::*;
use tessera_state::prelude::*;
use tracing::*;

use crate::errors::ChainTreeError;

/// Entry in the tree relating a block with its immediate relatives.
#[derive(Clone, Debug)]
pub struct BlockEntry {
    parent: BlockId,
    children: HashSet<BlockId>,
    height: u64,

    /// Sum of block weights from the finalized root (inclusive) to here.
    cumulative_weight: u128,

    tip: ChainTip,
}

impl BlockEntry {
    pub fn parent(&self) -> &BlockId {
        &self.parent
    }

    pub fn height(&self) -> u64 {
        self.height
    }

    pub fn cumulative_weight(&self) -> u128 {
        self.cumulative_weight
    }

    pub fn block(&self) -> &Arc<Block> {
        self.tip.block()
    }

    pub fn state(&self) -> &Arc<State> {
        self.tip.state()
    }
}

/// Tracks the unfinalized block tree on top of the finalized tip.
pub struct ChainTree {
    /// Block that we treat as a base that all of the other blocks build on.
    finalized_tip: BlockId,

    /// Every block in the tree, including the finalized tip.
    pending_table: HashMap<BlockId, BlockEntry>,

    /// Leaves of the tree.  This is just the finalized tip if there's no
    /// pending blocks.
    chain_tips: HashSet<BlockId>,
}

impl ChainTree {
    /// Creates a new tree with just a finalized tip and no pending blocks.
    pub fn new_empty(finalized: ChainTip, cumulative_weight: u128) -> Self {
        let blkid = finalized.blkid();
        let ent = BlockEntry {
            parent: *finalized.parent(),
            children: HashSet::new(),
            height: finalized.height(),
            cumulative_weight,
            tip: finalized,
        };

        Self {
            finalized_tip: blkid,
            pending_table: HashMap::from([(blkid, ent)]),
            chain_tips: HashSet::from([blkid]),
        }
    }

    /// Returns the "finalized tip", which is the base of the tree.
    pub fn finalized_tip(&self) -> &BlockId {
        &self.finalized_tip
    }

    pub fn finalized_height(&self) -> u64 {
        self.pending_table
            .get(&self.finalized_tip)
            .map(|e| e.height)
            .unwrap_or_default()
    }

    /// Returns `true` if the block is the finalized tip or is already in the
    /// tree.
    pub fn is_seen_block(&self, id: &BlockId) -> bool {
        self.pending_table.contains_key(id)
    }

    pub fn get_entry(&self, id: &BlockId) -> Option<&BlockEntry> {
        self.pending_table.get(id)
    }

    /// Gets the parent of a block from within the tree.  Returns `None` for
    /// the finalized tip, since its parent isn't in the tree.
    pub fn get_parent(&self, id: &BlockId) -> Option<&BlockId> {
        if *id == self.finalized_tip {
            return None;
        }
        self.pending_table.get(id).map(|ent| &ent.parent)
    }

    pub fn get_tip(&self, id: &BlockId) -> Option<&ChainTip> {
        self.pending_table.get(id).map(|ent| &ent.tip)
    }

    /// Returns an iterator over the chain tips.
    pub fn chain_tips_iter(&self) -> impl Iterator<Item = &BlockId> {
        self.chain_tips.iter()
    }

    pub fn num_blocks(&self) -> usize {
        self.pending_table.len()
    }

    /// Checks if the block is traceable all the way back to the finalized tip.
    fn sanity_check_parent_seq(&self, blkid: &BlockId) -> bool {
        let mut at = *blkid;
        loop {
            if at == self.finalized_tip {
                return true;
            }

            match self.pending_table.get(&at) {
                Some(ent) => at = ent.parent,
                None => return false,
            }
        }
    }

    /// Tries to attach a validated block to the tree.
    ///
    /// Returns if this new block forks off and creates a new tip instead of
    /// extending an existing one.
    pub fn attach_block(&mut self, tip: ChainTip) -> Result<bool, ChainTreeError> {
        let blkid = tip.blkid();
        if self.pending_table.contains_key(&blkid) {
            warn!(%blkid, "block already attached");
            return Ok(false);
        }

        let parent_blkid = *tip.parent();
        let Some(parent_ent) = self.pending_table.get_mut(&parent_blkid) else {
            return Err(ChainTreeError::AttachMissingParent(blkid, parent_blkid));
        };

        if tip.height() != parent_ent.height + 1 {
            return Err(ChainTreeError::AttachBadHeight(
                blkid,
                tip.height(),
                parent_ent.height,
            ));
        }

        parent_ent.children.insert(blkid);
        let ent = BlockEntry {
            parent: parent_blkid,
            children: HashSet::new(),
            height: tip.height(),
            cumulative_weight: parent_ent.cumulative_weight + tip.block_weight(),
            tip,
        };
        self.pending_table.insert(blkid, ent);

        // Also update the tips table, removing the parent if it's there.
        let did_replace = self.chain_tips.remove(&parent_blkid);
        self.chain_tips.insert(blkid);

        Ok(!did_replace)
    }

    /// Walks back from a block to its ancestor at some height.
    pub fn ancestor_at_height(&self, id: &BlockId, height: u64) -> Option<BlockId> {
        let mut at = *id;
        loop {
            let ent = self.pending_table.get(&at)?;
            if ent.height == height {
                return Some(at);
            }
            if ent.height < height || at == self.finalized_tip {
                return None;
            }
            at = ent.parent;
        }
    }

    /// Updates the finalized block tip, returning a report that includes the
    /// precise blocks that were finalized transitively and any blocks on
    /// competing chains that were rejected.
    pub fn update_finalized_tip(
        &mut self,
        blkid: &BlockId,
    ) -> Result<FinalizeReport, ChainTreeError> {
        if !self.pending_table.contains_key(blkid) {
            return Err(ChainTreeError::MissingBlock(*blkid));
        }

        if !self.sanity_check_parent_seq(blkid) {
            return Err(ChainTreeError::NotDescendant(*blkid));
        }

        if *blkid == self.finalized_tip {
            return Ok(FinalizeReport {
                prev_tip: *blkid,
                finalized: Vec::new(),
                rejected: Vec::new(),
            });
        }

        let mut finalized = vec![];
        let mut at = *blkid;

        // Walk down to the current finalized tip and put everything as finalized.
        while at != self.finalized_tip {
            finalized.push(at);
            at = self.pending_table[&at].parent;
        }

        let finalized_set: HashSet<BlockId> = finalized.iter().copied().collect();
        let mut to_evict = vec![];

        // Walk down from the parent of blkid and find the chains that need to
        // be evicted.
        for ancestor in finalized.iter().skip(1).chain([&self.finalized_tip]) {
            // The first block in `finalized` is the new tip, so its siblings
            // show up as children of the next one down.
            let ent = &self.pending_table[ancestor];
            for child in &ent.children {
                if !finalized_set.contains(child) {
                    to_evict.push(*child);
                }
            }
        }

        // Put all the blocks of the chains that need to be evicted.
        let mut evicted = to_evict.clone();
        for b in to_evict {
            evicted.extend(self.get_all_descendants(&b));
        }

        for b in &evicted {
            self.remove(b);
        }

        // And also remove blocks that we're finalizing, *except* the new
        // finalized tip, and the old tip which is now below it.
        let old_tip = self.finalized_tip;
        for b in finalized.iter().skip(1).chain([&old_tip]) {
            if b != blkid {
                self.pending_table.remove(b);
                self.chain_tips.remove(b);
            }
        }

        self.finalized_tip = *blkid;
        if self.pending_table[blkid].children.is_empty() {
            self.chain_tips.insert(*blkid);
        }

        Ok(FinalizeReport {
            prev_tip: old_tip,
            finalized,
            rejected: evicted,
        })
    }

    pub fn get_all_descendants(&self, blkid: &BlockId) -> HashSet<BlockId> {
        let mut descendants = HashSet::new();
        let mut to_visit = vec![*blkid];

        while let Some(curr_blk) = to_visit.pop() {
            if let Some(entry) = self.pending_table.get(&curr_blk) {
                for child in &entry.children {
                    descendants.insert(*child);
                    to_visit.push(*child);
                }
            }
        }

        descendants
    }

    /// Removes a single block, leaving its descendants dangling.
    pub fn remove(&mut self, blkid: &BlockId) {
        let parent = self.get_parent(blkid).copied();
        self.pending_table.remove(blkid);

        if let Some(parent) = parent {
            if let Some(parent_entry) = self.pending_table.get_mut(&parent) {
                parent_entry.children.remove(blkid);
                if parent_entry.children.is_empty() {
                    self.chain_tips.insert(parent);
                }
            }
        }

        self.chain_tips.remove(blkid);
    }
}

/// Report of blocks that we finalized when finalizing a new tip and blocks
/// that we've permanently rejected.
#[derive(Clone, Debug)]
pub struct FinalizeReport {
    /// Previous tip.
    prev_tip: BlockId,

    /// Blocks we've newly finalized, new tip first.
    finalized: Vec<BlockId>,

    /// Any blocks that were on competing chains than the one we finalized.
    rejected: Vec<BlockId>,
}

impl FinalizeReport {
    /// Returns the blkid that was the previously finalized tip.  It's still
    /// finalized, but there's newer blocks that are also finalized now.
    pub fn prev_tip(&self) -> &BlockId {
        &self.prev_tip
    }

    /// The new finalized tip.
    pub fn new_tip(&self) -> &BlockId {
        self.finalized.first().unwrap_or(&self.prev_tip)
    }

    pub fn finalized(&self) -> &[BlockId] {
        &self.finalized
    }

    /// Returns a slice of the blkids that were rejected.
    pub fn rejected(&self) -> &[BlockId] {
        &self.rejected
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use tessera_state::header::{EngineTag, HeaderTemplate, Seal};

    use super::*;

    /// Builds a block with no extrinsics on top of a parent, with a seal tag
    /// so siblings get distinct ids.
    pub(crate) fn child_tip(parent: &ChainTip, tag: u8, weight: u128) -> ChainTip {
        let tmplt =
            HeaderTemplate::new(parent.blkid(), parent.height() + 1, Buf32::zero(), Buf32::zero());
        let block = Block::new(tmplt.complete_with(Seal::new(EngineTag::Work, vec![tag])), vec![]);
        ChainTip::new(Arc::new(block), parent.state().clone(), weight)
    }

    pub(crate) fn genesis_tip() -> ChainTip {
        let tmplt = HeaderTemplate::new(BlockId::null(), 0, Buf32::zero(), Buf32::zero());
        let block = Block::new(tmplt.complete_with(Seal::new(EngineTag::Work, vec![])), vec![]);
        ChainTip::new(Arc::new(block), Arc::new(State::new()), 0)
    }

    /// Extends a chain by `n` blocks, returning the new tips in order.
    pub(crate) fn extend(
        tree: &mut ChainTree,
        from: &ChainTip,
        n: usize,
        tag: u8,
    ) -> Vec<ChainTip> {
        let mut out: Vec<ChainTip> = Vec::new();
        for _ in 0..n {
            let parent = out.last().unwrap_or(from);
            let tip = child_tip(parent, tag, 1);
            tree.attach_block(tip.clone()).unwrap();
            out.push(tip);
        }
        out
    }
}

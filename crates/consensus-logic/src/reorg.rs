//! Reorg planning types.

use tessera_primitives::prelude::*;

use crate::chain_tree::ChainTree;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Reorg {
    /// Blocks we're removing, in the order we're removing them.
    down: Vec<BlockId>,

    /// Pivot block that's shared on both chains.
    pivot: BlockId,

    /// Blocks we're adding, in the order we're adding them.
    up: Vec<BlockId>,
}

impl Reorg {
    pub fn revert_iter(&self) -> impl Iterator<Item = &BlockId> {
        self.down.iter()
    }

    pub fn pivot(&self) -> &BlockId {
        &self.pivot
    }

    pub fn apply_iter(&self) -> impl Iterator<Item = &BlockId> {
        self.up.iter()
    }

    /// Number of blocks we'd take off the canonical chain.
    pub fn depth(&self) -> usize {
        self.down.len()
    }
}

/// Computes the reorg path from one block to a new tip.  This behaves sensibly
/// when one block is an ancestor of another or are the same.  Returns `None`
/// if either block isn't in the tree or they don't share an ancestor in it.
pub fn compute_reorg(start: &BlockId, dest: &BlockId, tree: &ChainTree) -> Option<Reorg> {
    let height_of = |id: &BlockId| tree.get_entry(id).map(|e| e.height());

    let mut down_at = *start;
    let mut up_at = *dest;
    let mut down_height = height_of(&down_at)?;
    let mut up_height = height_of(&up_at)?;

    let mut down = Vec::new();
    let mut up = Vec::new();

    // Step whichever side is higher (or both) until they meet, the heights
    // make sure they meet at the first shared block.
    while down_at != up_at {
        if down_height >= up_height {
            down.push(down_at);
            down_at = *tree.get_parent(&down_at)?;
            down_height = height_of(&down_at)?;
        }

        if up_height > down_height {
            up.push(up_at);
            up_at = *tree.get_parent(&up_at)?;
            up_height = height_of(&up_at)?;
        }
    }

    up.reverse();
    Some(Reorg {
        down,
        pivot: down_at,
        up,
    })
}

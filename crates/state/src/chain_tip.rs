use std::sync::Arc;

use tessera_primitives::prelude::*;

use crate::{block::Block, header::BlockHeader, state::State};

/// A fully validated block together with the state it produces and the weight
/// the consensus engine assigned to it.  The parent is found through the
/// header's parent id.
#[derive(Clone, Debug)]
pub struct ChainTip {
    block: Arc<Block>,
    state: Arc<State>,
    block_weight: u128,
}

impl ChainTip {
    pub fn new(block: Arc<Block>, state: Arc<State>, block_weight: u128) -> Self {
        Self {
            block,
            state,
            block_weight,
        }
    }

    pub fn block(&self) -> &Arc<Block> {
        &self.block
    }

    pub fn state(&self) -> &Arc<State> {
        &self.state
    }

    pub fn header(&self) -> &BlockHeader {
        self.block.header()
    }

    pub fn block_weight(&self) -> u128 {
        self.block_weight
    }

    pub fn blkid(&self) -> BlockId {
        self.block.get_blockid()
    }

    pub fn height(&self) -> u64 {
        self.block.height()
    }

    pub fn parent(&self) -> &BlockId {
        self.block.parent()
    }
}

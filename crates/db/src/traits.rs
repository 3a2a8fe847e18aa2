//! Trait definitions for the storage interface the chain core writes through.
//!
//! Operations are NOT VALIDATED at this level, callers only ever store blocks
//! that passed consensus and state transition checks.

use std::sync::Arc;

use tessera_primitives::prelude::*;
use tessera_state::prelude::*;

use crate::DbResult;

/// Block, state and chain pointer storage.
pub trait BlockStore {
    /// Stores a validated block along with the state it produces.  Storing
    /// the same block again is a no-op.
    fn put_block_and_state(&self, block: Arc<Block>, state: Arc<State>) -> DbResult<()>;

    fn get_block(&self, id: &BlockId) -> DbResult<Option<Arc<Block>>>;

    /// Gets the state produced by a block.
    fn get_state(&self, id: &BlockId) -> DbResult<Option<Arc<State>>>;

    /// Gets the ids of all the blocks we have at a height, in the order we
    /// stored them.
    fn get_blocks_at_height(&self, height: u64) -> DbResult<Vec<BlockId>>;

    /// Moves the canonical tip pointer.  The block must have been stored.
    fn set_canonical(&self, id: &BlockId) -> DbResult<()>;

    fn get_canonical_tip(&self) -> DbResult<Option<BlockId>>;

    /// Moves the finalized block pointer.  The block must have been stored.
    fn set_finalized(&self, id: &BlockId) -> DbResult<()>;

    fn get_finalized_tip(&self) -> DbResult<Option<BlockId>>;

    /// Makes sure everything written so far is durable.
    fn flush(&self) -> DbResult<()> {
        Ok(())
    }
}

impl<T: BlockStore + ?Sized> BlockStore for Arc<T> {
    fn put_block_and_state(&self, block: Arc<Block>, state: Arc<State>) -> DbResult<()> {
        self.as_ref().put_block_and_state(block, state)
    }

    fn get_block(&self, id: &BlockId) -> DbResult<Option<Arc<Block>>> {
        self.as_ref().get_block(id)
    }

    fn get_state(&self, id: &BlockId) -> DbResult<Option<Arc<State>>> {
        self.as_ref().get_state(id)
    }

    fn get_blocks_at_height(&self, height: u64) -> DbResult<Vec<BlockId>> {
        self.as_ref().get_blocks_at_height(height)
    }

    fn set_canonical(&self, id: &BlockId) -> DbResult<()> {
        self.as_ref().set_canonical(id)
    }

    fn get_canonical_tip(&self) -> DbResult<Option<BlockId>> {
        self.as_ref().get_canonical_tip()
    }

    fn set_finalized(&self, id: &BlockId) -> DbResult<()> {
        self.as_ref().set_finalized(id)
    }

    fn get_finalized_tip(&self) -> DbResult<Option<BlockId>> {
        self.as_ref().get_finalized_tip()
    }

    fn flush(&self) -> DbResult<()> {
        self.as_ref().flush()
    }
}

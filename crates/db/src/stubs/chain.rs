use std::{
    collections::*,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use parking_lot::Mutex;
use tessera_primitives::prelude::*;
use tessera_state::prelude::*;
use tracing::*;

use crate::{errors::*, traits::*, DbResult};

/// In-memory store for tests.  Writes can be made to fail on demand so we can
/// check how callers deal with storage errors.
#[derive(Default)]
pub struct StubChainDb {
    blocks: Mutex<HashMap<BlockId, (Arc<Block>, Arc<State>)>>,
    heights: Mutex<BTreeMap<u64, Vec<BlockId>>>,
    canonical: Mutex<Option<BlockId>>,
    finalized: Mutex<Option<BlockId>>,
    fail_block_writes: AtomicBool,
    fail_pointer_writes: AtomicBool,
    fail_finalized_writes: AtomicBool,
}

impl StubChainDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `put_block_and_state` fail until turned back off.
    pub fn set_fail_block_writes(&self, fail: bool) {
        self.fail_block_writes.store(fail, Ordering::SeqCst);
    }

    /// Makes `set_canonical` and `set_finalized` fail until turned back off.
    pub fn set_fail_pointer_writes(&self, fail: bool) {
        self.fail_pointer_writes.store(fail, Ordering::SeqCst);
    }

    /// Makes only `set_finalized` fail until turned back off.
    pub fn set_fail_finalized_writes(&self, fail: bool) {
        self.fail_finalized_writes.store(fail, Ordering::SeqCst);
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.lock().len()
    }

    fn check_pointer_write(&self, id: &BlockId, what: &'static str) -> DbResult<()> {
        if self.fail_pointer_writes.load(Ordering::SeqCst) {
            warn!(blkid = %id, %what, "injected pointer write failure");
            return Err(DbError::StorageIo(format!("injected failure writing {what}")));
        }

        if !self.blocks.lock().contains_key(id) {
            return Err(DbError::UnknownBlock(*id, what));
        }

        Ok(())
    }
}

impl BlockStore for StubChainDb {
    fn put_block_and_state(&self, block: Arc<Block>, state: Arc<State>) -> DbResult<()> {
        if self.fail_block_writes.load(Ordering::SeqCst) {
            return Err(DbError::StorageIo("injected failure writing block".to_owned()));
        }

        let blkid = block.get_blockid();
        let height = block.height();

        let mut tbl = self.blocks.lock();
        if tbl.contains_key(&blkid) {
            return Ok(());
        }
        tbl.insert(blkid, (block, state));

        self.heights.lock().entry(height).or_default().push(blkid);
        Ok(())
    }

    fn get_block(&self, id: &BlockId) -> DbResult<Option<Arc<Block>>> {
        Ok(self.blocks.lock().get(id).map(|(b, _)| b.clone()))
    }

    fn get_state(&self, id: &BlockId) -> DbResult<Option<Arc<State>>> {
        Ok(self.blocks.lock().get(id).map(|(_, s)| s.clone()))
    }

    fn get_blocks_at_height(&self, height: u64) -> DbResult<Vec<BlockId>> {
        Ok(self.heights.lock().get(&height).cloned().unwrap_or_default())
    }

    fn set_canonical(&self, id: &BlockId) -> DbResult<()> {
        self.check_pointer_write(id, "canonical")?;
        *self.canonical.lock() = Some(*id);
        Ok(())
    }

    fn get_canonical_tip(&self) -> DbResult<Option<BlockId>> {
        Ok(*self.canonical.lock())
    }

    fn set_finalized(&self, id: &BlockId) -> DbResult<()> {
        if self.fail_finalized_writes.load(Ordering::SeqCst) {
            warn!(blkid = %id, "injected finalized write failure");
            return Err(DbError::StorageIo("injected failure writing finalized".to_owned()));
        }
        self.check_pointer_write(id, "finalized")?;
        *self.finalized.lock() = Some(*id);
        Ok(())
    }

    fn get_finalized_tip(&self) -> DbResult<Option<BlockId>> {
        Ok(*self.finalized.lock())
    }
}

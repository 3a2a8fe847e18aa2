use std::sync::Arc;

use tessera_primitives::prelude::*;
use tessera_state::prelude::*;

use crate::PoolResult;

/// Interface the chain core uses to get at pending extrinsics.  Methods take
/// `&self`, implementations do their own synchronization.
pub trait TransactionPool {
    /// Removes and returns up to `max` extrinsics in inclusion order.
    fn pull(&self, max: usize) -> Vec<Extrinsic>;

    /// Admits a newly submitted extrinsic.
    fn admit(&self, ext: Extrinsic) -> PoolResult<()>;

    /// Puts back extrinsics that were pulled or retracted but never made it
    /// into the canonical chain.  Failures are logged, not returned.
    /// Returns how many were taken back.
    fn re_admit(&self, exts: Vec<Extrinsic>) -> usize;

    /// Drops extrinsics that were included in a canonical block.
    fn prune(&self, ids: &[ExtrinsicId]);

    fn contains(&self, id: &ExtrinsicId) -> bool;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: TransactionPool + ?Sized> TransactionPool for Arc<T> {
    fn pull(&self, max: usize) -> Vec<Extrinsic> {
        self.as_ref().pull(max)
    }

    fn admit(&self, ext: Extrinsic) -> PoolResult<()> {
        self.as_ref().admit(ext)
    }

    fn re_admit(&self, exts: Vec<Extrinsic>) -> usize {
        self.as_ref().re_admit(exts)
    }

    fn prune(&self, ids: &[ExtrinsicId]) {
        self.as_ref().prune(ids)
    }

    fn contains(&self, id: &ExtrinsicId) -> bool {
        self.as_ref().contains(id)
    }

    fn len(&self) -> usize {
        self.as_ref().len()
    }
}

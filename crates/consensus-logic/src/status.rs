//! Handle to inspect the canonical chain and wait for updates when there are
//! any.

use tessera_primitives::prelude::*;

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CanonicalStatus {
    /// Canonical tip's block ID.
    pub tip: BlockId,

    /// Height of the canonical tip.
    pub height: u64,

    /// Cumulative weight of the canonical chain above the finalized root.
    pub cumulative_weight: u128,

    /// Finalized block ID.
    pub finalized: BlockId,
}

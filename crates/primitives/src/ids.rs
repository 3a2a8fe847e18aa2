use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use crate::{buf::Buf32, impl_buf_wrapper};

/// ID of a block, the hash of its full header.
///
/// Ordering is the lexicographic order of the hash bytes, which fork choice
/// relies on for tie-breaking.
#[derive(
    Copy,
    Clone,
    Eq,
    Default,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    BorshSerialize,
    BorshDeserialize,
    Serialize,
    Deserialize,
)]
pub struct BlockId(Buf32);

impl_buf_wrapper!(BlockId, Buf32, 32);

impl BlockId {
    /// Returns a dummy blkid that is all zeroes, used as the genesis parent.
    pub fn null() -> Self {
        Self::from(Buf32::zero())
    }

    /// Checks to see if this is the dummy "zero" blkid.
    pub fn is_null(&self) -> bool {
        self.0.is_zero()
    }

    pub fn as_buf(&self) -> &Buf32 {
        &self.0
    }
}

/// ID of an extrinsic, the hash of its encoding.
#[derive(
    Copy,
    Clone,
    Eq,
    Default,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    BorshSerialize,
    BorshDeserialize,
    Serialize,
    Deserialize,
)]
pub struct ExtrinsicId(Buf32);

impl_buf_wrapper!(ExtrinsicId, Buf32, 32);

impl ExtrinsicId {
    pub fn as_buf(&self) -> &Buf32 {
        &self.0
    }
}

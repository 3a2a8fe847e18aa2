//! Blocks, their ids and wire encoding.

use borsh::{BorshDeserialize, BorshSerialize};
use thiserror::Error;
use tessera_primitives::{constants::BLOCK_ENCODING_VERSION, hash, prelude::*};

use crate::{extrinsic::Extrinsic, header::BlockHeader};

#[derive(Debug, Error)]
pub enum BlockDecodeError {
    #[error("unsupported block encoding version {0}")]
    UnsupportedVersion(u16),

    #[error("decode block: {0}")]
    Borsh(#[from] borsh::io::Error),
}

/// Full contents of a block.
#[derive(Clone, Debug, Eq, PartialEq, BorshSerialize, BorshDeserialize)]
pub struct Block {
    header: BlockHeader,

    /// Extrinsics in application order.
    extrinsics: Vec<Extrinsic>,
}

impl Block {
    pub fn new(header: BlockHeader, extrinsics: Vec<Extrinsic>) -> Self {
        Self { header, extrinsics }
    }

    pub fn header(&self) -> &BlockHeader {
        &self.header
    }

    pub fn extrinsics(&self) -> &[Extrinsic] {
        &self.extrinsics
    }

    pub fn height(&self) -> u64 {
        self.header.height()
    }

    pub fn parent(&self) -> &BlockId {
        self.header.parent()
    }

    pub fn get_blockid(&self) -> BlockId {
        self.header.get_blockid()
    }

    /// Encodes the block for the wire and for storage.
    pub fn encode(&self) -> Vec<u8> {
        borsh::to_vec(self).expect("block: enc")
    }

    /// Decodes a block, rejecting trailing bytes and unknown versions.
    pub fn decode(buf: &[u8]) -> Result<Self, BlockDecodeError> {
        let block: Self = borsh::from_slice(buf)?;
        if block.header.version() != BLOCK_ENCODING_VERSION {
            return Err(BlockDecodeError::UnsupportedVersion(block.header.version()));
        }
        Ok(block)
    }

    /// Recomputes the extrinsics digest from the body.  Callers compare this
    /// against the header, it's never taken on trust.
    pub fn compute_extrinsics_digest(&self) -> Buf32 {
        compute_extrinsics_digest(&self.extrinsics)
    }
}

/// Hash of the ordered extrinsic list.
pub fn compute_extrinsics_digest(extrinsics: &[Extrinsic]) -> Buf32 {
    hash::compute_borsh_hash(&extrinsics)
}

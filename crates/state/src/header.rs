//! Block headers, seals and the commitment a seal signs over.

use borsh::{BorshDeserialize, BorshSerialize};
use tessera_primitives::{constants::BLOCK_ENCODING_VERSION, hash, prelude::*};

/// Which consensus engine produced a seal.
#[derive(
    Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, BorshSerialize, BorshDeserialize,
)]
pub enum EngineTag {
    Work,
    Authority,
}

/// Consensus proof attached to a header.  The proof bytes are only
/// meaningful to the engine named by the tag.
#[derive(Clone, Debug, Eq, PartialEq, BorshSerialize, BorshDeserialize)]
pub struct Seal {
    tag: EngineTag,
    proof: Vec<u8>,
}

impl Seal {
    pub fn new(tag: EngineTag, proof: Vec<u8>) -> Self {
        Self { tag, proof }
    }

    pub fn tag(&self) -> EngineTag {
        self.tag
    }

    pub fn proof(&self) -> &[u8] {
        &self.proof
    }
}

/// Block header that links blocks into a chain and carries the seal.
#[derive(Clone, Debug, Eq, PartialEq, BorshSerialize, BorshDeserialize)]
pub struct BlockHeader {
    /// Encoding version, must be [`BLOCK_ENCODING_VERSION`].
    pub(crate) version: u16,

    /// Id of the previous block, to form the blockchain.
    pub(crate) parent: BlockId,

    /// Parent height plus one.  Genesis is height 0.
    pub(crate) height: u64,

    /// Digest of the state produced by applying this block's extrinsics to
    /// the parent state.
    pub(crate) state_digest: Buf32,

    /// Hash of the ordered extrinsic list.
    pub(crate) extrinsics_digest: Buf32,

    pub(crate) seal: Seal,
}

impl BlockHeader {
    pub fn version(&self) -> u16 {
        self.version
    }

    pub fn parent(&self) -> &BlockId {
        &self.parent
    }

    pub fn height(&self) -> u64 {
        self.height
    }

    pub fn state_digest(&self) -> &Buf32 {
        &self.state_digest
    }

    pub fn extrinsics_digest(&self) -> &Buf32 {
        &self.extrinsics_digest
    }

    pub fn seal(&self) -> &Seal {
        &self.seal
    }

    /// Computes the block id, which is the hash of the whole header including
    /// the seal.
    pub fn get_blockid(&self) -> BlockId {
        BlockId::from(hash::compute_borsh_hash(self))
    }

    /// Computes what a seal for this header must commit to, taking the state
    /// digest from the caller since that's what's actually being checked.
    pub fn seal_commitment(&self, tag: EngineTag, resulting_state_digest: &Buf32) -> Buf32 {
        SealCommitment {
            version: &self.version,
            tag: &tag,
            parent: &self.parent,
            height: &self.height,
            extrinsics_digest: &self.extrinsics_digest,
            state_digest: resulting_state_digest,
        }
        .hash()
    }
}

/// Header before it has been sealed.
#[derive(Clone, Debug, Eq, PartialEq, BorshSerialize, BorshDeserialize)]
pub struct HeaderTemplate {
    version: u16,
    parent: BlockId,
    height: u64,
    state_digest: Buf32,
    extrinsics_digest: Buf32,
}

impl HeaderTemplate {
    pub fn new(parent: BlockId, height: u64, state_digest: Buf32, extrinsics_digest: Buf32) -> Self {
        Self {
            version: BLOCK_ENCODING_VERSION,
            parent,
            height,
            state_digest,
            extrinsics_digest,
        }
    }

    /// Derives the template back from the header, dropping the seal.
    pub fn from_header(header: &BlockHeader) -> Self {
        Self {
            version: header.version,
            parent: header.parent,
            height: header.height,
            state_digest: header.state_digest,
            extrinsics_digest: header.extrinsics_digest,
        }
    }

    pub fn parent(&self) -> &BlockId {
        &self.parent
    }

    pub fn height(&self) -> u64 {
        self.height
    }

    pub fn state_digest(&self) -> &Buf32 {
        &self.state_digest
    }

    pub fn extrinsics_digest(&self) -> &Buf32 {
        &self.extrinsics_digest
    }

    pub fn seal_commitment(&self, tag: EngineTag, resulting_state_digest: &Buf32) -> Buf32 {
        SealCommitment {
            version: &self.version,
            tag: &tag,
            parent: &self.parent,
            height: &self.height,
            extrinsics_digest: &self.extrinsics_digest,
            state_digest: resulting_state_digest,
        }
        .hash()
    }

    /// Completes the header with a given seal.
    pub fn complete_with(self, seal: Seal) -> BlockHeader {
        BlockHeader {
            version: self.version,
            parent: self.parent,
            height: self.height,
            state_digest: self.state_digest,
            extrinsics_digest: self.extrinsics_digest,
            seal,
        }
    }
}

#[derive(BorshSerialize)]
struct SealCommitment<'a> {
    version: &'a u16,
    tag: &'a EngineTag,
    parent: &'a BlockId,
    height: &'a u64,
    extrinsics_digest: &'a Buf32,
    state_digest: &'a Buf32,
}

impl SealCommitment<'_> {
    fn hash(&self) -> Buf32 {
        hash::compute_borsh_hash(self)
    }
}
